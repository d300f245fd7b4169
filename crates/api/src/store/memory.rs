//! In-process ticket store
//!
//! Everything lives behind one lock, so each trait call is atomic the same
//! way a database transaction is. Used by the test suites and when the
//! service runs without `DATABASE_URL`.

use super::{
    NewInternalNote, NewMessage, NewNotification, NewRating, NewTicket, NewTicketEvent,
    distinct_ids, NotificationQuery, StatsUpdate, TicketChange, TicketQuery, TicketStore,
};
use async_trait::async_trait;
use helpdesk_shared::{
    ClientProfile, InternalNote, Message, Notification, OperatorStats, StoreError, StoreResult,
    Ticket, TicketCategory, TicketEvent, TicketRating, TicketStatus, TicketSummary, User,
};
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    client_profiles: HashMap<Uuid, ClientProfile>,
    operator_stats: HashMap<Uuid, OperatorStats>,
    /// Uploaded file ids known to the store
    files: HashSet<Uuid>,
    ticket_seq: i64,
    tickets: HashMap<Uuid, Ticket>,
    /// Insertion order is creation order
    messages: Vec<Message>,
    notes: Vec<InternalNote>,
    ratings: HashMap<Uuid, TicketRating>,
    events: Vec<TicketEvent>,
    notifications: Vec<Notification>,
}

impl Inner {
    fn check_files(&self, ids: &[Uuid]) -> StoreResult<()> {
        match ids.iter().find(|id| !self.files.contains(id)) {
            Some(id) => Err(StoreError::MissingReference(format!("file {}", id))),
            None => Ok(()),
        }
    }

    fn push_event(&mut self, event: NewTicketEvent, at: OffsetDateTime) {
        self.events.push(TicketEvent {
            id: Uuid::new_v4(),
            ticket_id: event.ticket_id,
            event_type: event.event_type,
            description: event.description,
            user_id: event.user_id,
            metadata: event.metadata,
            created_at: at,
        });
    }

    fn apply_stats(&mut self, stats: &[StatsUpdate]) {
        for update in stats {
            match *update {
                StatsUpdate::ClientTicketOpened { client_id } => {
                    self.client_profile_mut(client_id).total_tickets += 1;
                }
                StatsUpdate::ClientTicketResolved { client_id } => {
                    self.client_profile_mut(client_id).resolved_tickets += 1;
                }
                StatsUpdate::OperatorResolved { operator_id, minutes } => {
                    self.operator_stats
                        .entry(operator_id)
                        .or_insert_with(|| OperatorStats::new(operator_id))
                        .record_resolution(minutes);
                }
                StatsUpdate::OperatorRated { operator_id, rating } => {
                    self.operator_stats
                        .entry(operator_id)
                        .or_insert_with(|| OperatorStats::new(operator_id))
                        .record_rating(rating);
                }
            }
        }
    }

    fn client_profile_mut(&mut self, client_id: Uuid) -> &mut ClientProfile {
        self.client_profiles
            .entry(client_id)
            .or_insert_with(|| ClientProfile {
                user_id: client_id,
                ..ClientProfile::default()
            })
    }

    fn unread_for(&self, ticket_id: Uuid, viewer_id: Uuid) -> i64 {
        self.messages
            .iter()
            .filter(|m| {
                m.ticket_id == ticket_id
                    && !m.is_internal
                    && m.read_at.is_none()
                    && m.author_id != viewer_id
            })
            .count() as i64
    }

    fn summarize(&self, ticket: &Ticket, viewer_id: Uuid) -> TicketSummary {
        TicketSummary {
            ticket: ticket.clone(),
            unread_count: self.unread_for(ticket.id, viewer_id),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an uploaded file so tickets and messages may reference it
    pub async fn register_file(&self, id: Uuid) {
        self.inner.write().await.files.insert(id);
    }
}

fn window<T: Clone>(items: &[T], offset: i64, limit: u32) -> Vec<T> {
    items
        .iter()
        .skip(usize::try_from(offset).unwrap_or(0))
        .take(limit as usize)
        .cloned()
        .collect()
}

#[async_trait]
impl TicketStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn upsert_user(&self, user: &User) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner
            .users
            .values()
            .any(|u| u.email == user.email && u.id != user.id)
        {
            return Err(StoreError::Conflict(format!(
                "email already registered: {}",
                user.email
            )));
        }
        inner.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn list_active_operator_class(&self) -> StoreResult<Vec<User>> {
        let inner = self.inner.read().await;
        let mut users: Vec<User> = inner
            .users
            .values()
            .filter(|u| u.is_active && u.role.is_operator_class())
            .cloned()
            .collect();
        users.sort_by_key(|u| u.id);
        Ok(users)
    }

    async fn operator_stats(&self, user_id: Uuid) -> StoreResult<Option<OperatorStats>> {
        Ok(self.inner.read().await.operator_stats.get(&user_id).cloned())
    }

    async fn client_profile(&self, user_id: Uuid) -> StoreResult<Option<ClientProfile>> {
        Ok(self.inner.read().await.client_profiles.get(&user_id).cloned())
    }

    async fn create_ticket(
        &self,
        ticket: NewTicket,
        event: NewTicketEvent,
        stats: &[StatsUpdate],
    ) -> StoreResult<Ticket> {
        let mut inner = self.inner.write().await;
        if inner.tickets.contains_key(&ticket.id) {
            return Err(StoreError::Conflict(format!("ticket {} exists", ticket.id)));
        }
        let attachment_ids = distinct_ids(ticket.attachment_ids);
        inner.check_files(&attachment_ids)?;
        inner.ticket_seq += 1;
        let created = Ticket {
            id: ticket.id,
            number: Ticket::format_number(inner.ticket_seq),
            title: ticket.title,
            description: ticket.description,
            category: ticket.category,
            status: TicketStatus::New,
            priority: ticket.priority,
            client_id: ticket.client_id,
            operator_id: None,
            context_data: ticket.context_data,
            attachment_ids,
            created_at: ticket.created_at,
            updated_at: ticket.created_at,
            assigned_at: None,
            resolved_at: None,
            closed_at: None,
        };
        inner.tickets.insert(created.id, created.clone());
        inner.push_event(event, created.created_at);
        inner.apply_stats(stats);
        Ok(created)
    }

    async fn find_ticket(&self, id: Uuid) -> StoreResult<Option<Ticket>> {
        Ok(self.inner.read().await.tickets.get(&id).cloned())
    }

    async fn update_ticket(
        &self,
        id: Uuid,
        change: TicketChange,
        event: Option<NewTicketEvent>,
        stats: &[StatsUpdate],
    ) -> StoreResult<Option<Ticket>> {
        let mut inner = self.inner.write().await;
        let Some(ticket) = inner.tickets.get_mut(&id) else {
            return Ok(None);
        };
        change.apply(ticket)?;
        let updated = ticket.clone();
        if let Some(event) = event {
            inner.push_event(event, change.updated_at);
        }
        inner.apply_stats(stats);
        Ok(Some(updated))
    }

    async fn list_tickets(&self, query: &TicketQuery) -> StoreResult<(Vec<TicketSummary>, i64)> {
        let inner = self.inner.read().await;
        let mut matched: Vec<&Ticket> = inner
            .tickets
            .values()
            .filter(|t| query.scope.admits(t) && query.filter.matches(t))
            .collect();
        matched.sort_by_key(|t| (Reverse(t.priority.rank()), Reverse(t.created_at), t.id));
        let total = matched.len() as i64;
        let page: Vec<TicketSummary> = window(&matched, query.page.offset(), query.page.limit)
            .into_iter()
            .map(|t| inner.summarize(t, query.viewer_id))
            .collect();
        Ok((page, total))
    }

    async fn ticket_queue(&self) -> StoreResult<Vec<Ticket>> {
        let inner = self.inner.read().await;
        let mut queue: Vec<Ticket> = inner
            .tickets
            .values()
            .filter(|t| t.operator_id.is_none() && t.status == TicketStatus::New)
            .cloned()
            .collect();
        queue.sort_by_key(|t| (Reverse(t.priority.rank()), t.created_at, t.id));
        Ok(queue)
    }

    async fn active_tickets_for(&self, operator_id: Uuid) -> StoreResult<Vec<TicketSummary>> {
        let inner = self.inner.read().await;
        let mut active: Vec<&Ticket> = inner
            .tickets
            .values()
            .filter(|t| t.operator_id == Some(operator_id) && t.status.is_active())
            .collect();
        active.sort_by_key(|t| (Reverse(t.priority.rank()), Reverse(t.updated_at), t.id));
        Ok(active
            .into_iter()
            .map(|t| inner.summarize(t, operator_id))
            .collect())
    }

    async fn similar_resolved(
        &self,
        category: TicketCategory,
        exclude: Uuid,
        limit: i64,
    ) -> StoreResult<Vec<Ticket>> {
        let inner = self.inner.read().await;
        let mut resolved: Vec<Ticket> = inner
            .tickets
            .values()
            .filter(|t| {
                t.category == category && t.status == TicketStatus::Resolved && t.id != exclude
            })
            .cloned()
            .collect();
        resolved.sort_by_key(|t| Reverse(t.resolved_at));
        resolved.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(resolved)
    }

    async fn ticket_events(&self, ticket_id: Uuid) -> StoreResult<Vec<TicketEvent>> {
        let inner = self.inner.read().await;
        Ok(inner
            .events
            .iter()
            .filter(|e| e.ticket_id == ticket_id)
            .cloned()
            .collect())
    }

    async fn insert_internal_note(
        &self,
        note: NewInternalNote,
        event: NewTicketEvent,
    ) -> StoreResult<InternalNote> {
        let mut inner = self.inner.write().await;
        let now = OffsetDateTime::now_utc();
        let created = InternalNote {
            id: Uuid::new_v4(),
            ticket_id: note.ticket_id,
            author_id: note.author_id,
            content: note.content,
            created_at: now,
        };
        inner.notes.push(created.clone());
        inner.push_event(event, now);
        Ok(created)
    }

    async fn internal_notes(&self, ticket_id: Uuid) -> StoreResult<Vec<InternalNote>> {
        let inner = self.inner.read().await;
        Ok(inner
            .notes
            .iter()
            .filter(|n| n.ticket_id == ticket_id)
            .cloned()
            .collect())
    }

    async fn find_rating(&self, ticket_id: Uuid) -> StoreResult<Option<TicketRating>> {
        Ok(self.inner.read().await.ratings.get(&ticket_id).cloned())
    }

    async fn insert_rating(
        &self,
        rating: NewRating,
        stats: &[StatsUpdate],
    ) -> StoreResult<TicketRating> {
        let mut inner = self.inner.write().await;
        if inner.ratings.contains_key(&rating.ticket_id) {
            return Err(StoreError::Conflict(format!(
                "ticket {} already rated",
                rating.ticket_id
            )));
        }
        let created = TicketRating {
            id: Uuid::new_v4(),
            ticket_id: rating.ticket_id,
            client_id: rating.client_id,
            rating: rating.rating,
            feedback: rating.feedback,
            liked_speed: rating.liked_speed,
            liked_clarity: rating.liked_clarity,
            liked_politeness: rating.liked_politeness,
            liked_completeness: rating.liked_completeness,
            created_at: OffsetDateTime::now_utc(),
        };
        inner.ratings.insert(created.ticket_id, created.clone());
        inner.apply_stats(stats);
        Ok(created)
    }

    async fn insert_message(&self, message: NewMessage, event: NewTicketEvent) -> StoreResult<Message> {
        let mut inner = self.inner.write().await;
        let attachment_ids = distinct_ids(message.attachment_ids);
        inner.check_files(&attachment_ids)?;
        let Some(ticket) = inner.tickets.get_mut(&message.ticket_id) else {
            return Err(StoreError::Database(format!(
                "ticket {} does not exist",
                message.ticket_id
            )));
        };
        ticket.updated_at = message.created_at;
        let created = Message {
            id: message.id,
            ticket_id: message.ticket_id,
            author_id: message.author_id,
            content: message.content,
            is_internal: message.is_internal,
            attachment_ids,
            created_at: message.created_at,
            read_at: None,
        };
        inner.messages.push(created.clone());
        inner.push_event(event, created.created_at);
        Ok(created)
    }

    async fn find_message(&self, id: Uuid) -> StoreResult<Option<Message>> {
        let inner = self.inner.read().await;
        Ok(inner.messages.iter().find(|m| m.id == id).cloned())
    }

    async fn list_messages(&self, ticket_id: Uuid, include_internal: bool) -> StoreResult<Vec<Message>> {
        let inner = self.inner.read().await;
        Ok(inner
            .messages
            .iter()
            .filter(|m| m.ticket_id == ticket_id && (include_internal || !m.is_internal))
            .cloned()
            .collect())
    }

    async fn mark_message_read(
        &self,
        id: Uuid,
        reader_id: Uuid,
        at: OffsetDateTime,
    ) -> StoreResult<Option<Message>> {
        let mut inner = self.inner.write().await;
        let stamped = inner
            .messages
            .iter_mut()
            .find(|m| m.id == id && m.author_id != reader_id && m.read_at.is_none())
            .map(|m| {
                m.read_at = Some(at);
                m.clone()
            });
        Ok(stamped)
    }

    async fn mark_messages_read(
        &self,
        ids: &[Uuid],
        reader_id: Uuid,
        at: OffsetDateTime,
    ) -> StoreResult<Vec<Message>> {
        let mut inner = self.inner.write().await;
        let mut stamped = Vec::new();
        for message in inner.messages.iter_mut() {
            if ids.contains(&message.id)
                && message.author_id != reader_id
                && message.read_at.is_none()
            {
                message.read_at = Some(at);
                stamped.push(message.clone());
            }
        }
        Ok(stamped)
    }

    async fn count_unread_messages(&self, ticket_id: Uuid, viewer_id: Uuid) -> StoreResult<i64> {
        Ok(self.inner.read().await.unread_for(ticket_id, viewer_id))
    }

    async fn insert_notification(&self, notification: NewNotification) -> StoreResult<Notification> {
        let mut inner = self.inner.write().await;
        let (entity_type, entity_id) = match notification.entity {
            Some((kind, id)) => (Some(kind), Some(id)),
            None => (None, None),
        };
        let created = Notification {
            id: Uuid::new_v4(),
            user_id: notification.user_id,
            notification_type: notification.notification_type,
            title: notification.title,
            message: notification.message,
            entity_id,
            entity_type,
            is_read: false,
            read_at: None,
            created_at: OffsetDateTime::now_utc(),
        };
        inner.notifications.push(created.clone());
        Ok(created)
    }

    async fn list_notifications(
        &self,
        user_id: Uuid,
        query: &NotificationQuery,
    ) -> StoreResult<(Vec<Notification>, i64)> {
        let inner = self.inner.read().await;
        // Newest first: later pushes win ties on created_at
        let matched: Vec<Notification> = inner
            .notifications
            .iter()
            .rev()
            .filter(|n| {
                n.user_id == user_id
                    && (!query.unread_only || !n.is_read)
                    && query
                        .notification_type
                        .map_or(true, |kind| n.notification_type == kind)
            })
            .cloned()
            .collect();
        let total = matched.len() as i64;
        Ok((window(&matched, query.page.offset(), query.page.limit), total))
    }

    async fn count_unread_notifications(&self, user_id: Uuid) -> StoreResult<i64> {
        let inner = self.inner.read().await;
        Ok(inner
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id && !n.is_read)
            .count() as i64)
    }

    async fn mark_notification_read(
        &self,
        id: Uuid,
        owner_id: Uuid,
        at: OffsetDateTime,
    ) -> StoreResult<Option<Notification>> {
        let mut inner = self.inner.write().await;
        let found = inner
            .notifications
            .iter_mut()
            .find(|n| n.id == id && n.user_id == owner_id)
            .map(|n| {
                if !n.is_read {
                    n.is_read = true;
                    n.read_at = Some(at);
                }
                n.clone()
            });
        Ok(found)
    }

    async fn mark_notifications_read(
        &self,
        ids: &[Uuid],
        owner_id: Uuid,
        at: OffsetDateTime,
    ) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let mut updated = 0;
        for n in inner.notifications.iter_mut() {
            if n.user_id == owner_id && !n.is_read && ids.contains(&n.id) {
                n.is_read = true;
                n.read_at = Some(at);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn mark_all_notifications_read(&self, owner_id: Uuid, at: OffsetDateTime) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let mut updated = 0;
        for n in inner.notifications.iter_mut() {
            if n.user_id == owner_id && !n.is_read {
                n.is_read = true;
                n.read_at = Some(at);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn delete_notification(&self, id: Uuid, owner_id: Uuid) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let before = inner.notifications.len();
        inner
            .notifications
            .retain(|n| !(n.id == id && n.user_id == owner_id));
        Ok(inner.notifications.len() < before)
    }

    async fn delete_all_notifications(&self, owner_id: Uuid) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let before = inner.notifications.len();
        inner.notifications.retain(|n| n.user_id != owner_id);
        Ok((before - inner.notifications.len()) as u64)
    }
}
