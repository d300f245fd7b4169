//! Ticket Store port
//!
//! The durable record of users, tickets, messages, notifications and the
//! audit log. Every multi-row write (a transition plus its audit event plus
//! its stats accumulation) is a single store call so adapters can apply it
//! atomically; services never mutate durable state piecemeal.
//!
//! - [`PgStore`]: PostgreSQL adapter (production)
//! - [`MemoryStore`]: in-process adapter for tests and local development

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use helpdesk_shared::{
    ClientProfile, EntityKind, InternalNote, Message, Notification, NotificationType,
    OperatorStats, PageRequest, StoreError, StoreResult, Ticket, TicketCategory, TicketEvent,
    TicketEventType, TicketPriority, TicketRating, TicketStatus, TicketSummary, User,
};
use time::OffsetDateTime;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgStore;

// =============================================================================
// Write Models
// =============================================================================

#[derive(Debug, Clone)]
pub struct NewTicket {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub category: TicketCategory,
    pub priority: TicketPriority,
    pub client_id: Uuid,
    pub context_data: Option<serde_json::Value>,
    pub attachment_ids: Vec<Uuid>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewTicketEvent {
    pub ticket_id: Uuid,
    pub event_type: TicketEventType,
    pub description: String,
    pub user_id: Uuid,
    pub metadata: Option<serde_json::Value>,
}

impl NewTicketEvent {
    pub fn new(
        ticket_id: Uuid,
        event_type: TicketEventType,
        description: impl Into<String>,
        user_id: Uuid,
    ) -> Self {
        Self {
            ticket_id,
            event_type,
            description: description.into(),
            user_id,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Field-level ticket mutation; `None` leaves the column unchanged.
/// `updated_at` is always stamped. With `expected_status` set, the write only
/// lands if the stored status still matches, otherwise [`StoreError::Stale`].
#[derive(Debug, Clone)]
pub struct TicketChange {
    pub expected_status: Option<TicketStatus>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<TicketCategory>,
    pub context_data: Option<serde_json::Value>,
    pub status: Option<TicketStatus>,
    pub priority: Option<TicketPriority>,
    pub operator_id: Option<Uuid>,
    pub assigned_at: Option<OffsetDateTime>,
    pub resolved_at: Option<OffsetDateTime>,
    pub closed_at: Option<OffsetDateTime>,
    pub updated_at: OffsetDateTime,
}

impl TicketChange {
    pub fn at(updated_at: OffsetDateTime) -> Self {
        Self {
            expected_status: None,
            title: None,
            description: None,
            category: None,
            context_data: None,
            status: None,
            priority: None,
            operator_id: None,
            assigned_at: None,
            resolved_at: None,
            closed_at: None,
            updated_at,
        }
    }

    /// Guard the write on the status the caller validated against
    pub fn expecting(mut self, status: TicketStatus) -> Self {
        self.expected_status = Some(status);
        self
    }

    pub(crate) fn apply(&self, ticket: &mut Ticket) -> StoreResult<()> {
        if let Some(expected) = self.expected_status {
            if ticket.status != expected {
                return Err(StoreError::Stale(format!(
                    "ticket {} is {}, expected {}",
                    ticket.id, ticket.status, expected
                )));
            }
        }
        if let Some(title) = &self.title {
            ticket.title = title.clone();
        }
        if let Some(description) = &self.description {
            ticket.description = description.clone();
        }
        if let Some(category) = self.category {
            ticket.category = category;
        }
        if let Some(context) = &self.context_data {
            ticket.context_data = Some(context.clone());
        }
        if let Some(status) = self.status {
            ticket.status = status;
        }
        if let Some(priority) = self.priority {
            ticket.priority = priority;
        }
        if let Some(operator_id) = self.operator_id {
            ticket.operator_id = Some(operator_id);
        }
        if let Some(at) = self.assigned_at {
            ticket.assigned_at = Some(at);
        }
        if let Some(at) = self.resolved_at {
            ticket.resolved_at = Some(at);
        }
        if let Some(at) = self.closed_at {
            ticket.closed_at = Some(at);
        }
        ticket.updated_at = self.updated_at;
        Ok(())
    }
}

/// Attachment ids in first-seen order without repeats
pub fn distinct_ids(ids: Vec<Uuid>) -> Vec<Uuid> {
    let mut seen = std::collections::HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

/// Counter accumulation applied in the same unit of work as a transition
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatsUpdate {
    ClientTicketOpened { client_id: Uuid },
    ClientTicketResolved { client_id: Uuid },
    OperatorResolved { operator_id: Uuid, minutes: i32 },
    OperatorRated { operator_id: Uuid, rating: i16 },
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    pub is_internal: bool,
    pub attachment_ids: Vec<Uuid>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: Uuid,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub entity: Option<(EntityKind, Uuid)>,
}

#[derive(Debug, Clone)]
pub struct NewRating {
    pub ticket_id: Uuid,
    pub client_id: Uuid,
    pub rating: i16,
    pub feedback: Option<String>,
    pub liked_speed: bool,
    pub liked_clarity: bool,
    pub liked_politeness: bool,
    pub liked_completeness: bool,
}

#[derive(Debug, Clone)]
pub struct NewInternalNote {
    pub ticket_id: Uuid,
    pub author_id: Uuid,
    pub content: String,
}

// =============================================================================
// Query Models
// =============================================================================

/// Which tickets a viewer may list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketScope {
    All,
    /// Tickets owned by this client
    Client(Uuid),
    /// Tickets assigned to this operator plus the unassigned NEW queue
    Operator(Uuid),
}

#[derive(Debug, Clone, Default)]
pub struct TicketFilter {
    pub statuses: Vec<TicketStatus>,
    pub priorities: Vec<TicketPriority>,
    pub categories: Vec<TicketCategory>,
    /// Case-insensitive match on title, description or number
    pub search: Option<String>,
    pub created_from: Option<OffsetDateTime>,
    pub created_to: Option<OffsetDateTime>,
}

impl TicketFilter {
    pub(crate) fn matches(&self, ticket: &Ticket) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&ticket.status) {
            return false;
        }
        if !self.priorities.is_empty() && !self.priorities.contains(&ticket.priority) {
            return false;
        }
        if !self.categories.is_empty() && !self.categories.contains(&ticket.category) {
            return false;
        }
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            let hit = ticket.title.to_lowercase().contains(&needle)
                || ticket.description.to_lowercase().contains(&needle)
                || ticket.number.to_lowercase().contains(&needle);
            if !hit {
                return false;
            }
        }
        if self.created_from.is_some_and(|from| ticket.created_at < from) {
            return false;
        }
        if self.created_to.is_some_and(|to| ticket.created_at > to) {
            return false;
        }
        true
    }
}

impl TicketScope {
    pub(crate) fn admits(&self, ticket: &Ticket) -> bool {
        match self {
            TicketScope::All => true,
            TicketScope::Client(client_id) => ticket.client_id == *client_id,
            TicketScope::Operator(operator_id) => {
                ticket.operator_id == Some(*operator_id)
                    || (ticket.operator_id.is_none() && ticket.status == TicketStatus::New)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct TicketQuery {
    pub scope: TicketScope,
    pub filter: TicketFilter,
    /// Unread counts are computed for this user
    pub viewer_id: Uuid,
    pub page: PageRequest,
}

#[derive(Debug, Clone)]
pub struct NotificationQuery {
    pub unread_only: bool,
    pub notification_type: Option<NotificationType>,
    pub page: PageRequest,
}

impl NotificationQuery {
    /// Defaults: all notifications, page 1, 50 per page
    pub fn new(
        unread_only: bool,
        notification_type: Option<NotificationType>,
        page: Option<u32>,
        limit: Option<u32>,
    ) -> Self {
        Self {
            unread_only,
            notification_type,
            page: PageRequest::new(page, limit, 50),
        }
    }
}

// =============================================================================
// Port
// =============================================================================

#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Short adapter name for health output
    fn backend_name(&self) -> &'static str;

    /// Cheap connectivity probe
    async fn ping(&self) -> StoreResult<()>;

    // -- Users ---------------------------------------------------------------

    async fn upsert_user(&self, user: &User) -> StoreResult<()>;
    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>>;
    /// Active OPERATOR, SPECIALIST and MANAGER accounts
    async fn list_active_operator_class(&self) -> StoreResult<Vec<User>>;
    async fn operator_stats(&self, user_id: Uuid) -> StoreResult<Option<OperatorStats>>;
    async fn client_profile(&self, user_id: Uuid) -> StoreResult<Option<ClientProfile>>;

    // -- Tickets -------------------------------------------------------------

    /// Allocates the next ticket number, links attachments, and records the
    /// creation event and stats in one unit of work. Unknown file ids fail
    /// with `MissingReference`.
    async fn create_ticket(
        &self,
        ticket: NewTicket,
        event: NewTicketEvent,
        stats: &[StatsUpdate],
    ) -> StoreResult<Ticket>;

    async fn find_ticket(&self, id: Uuid) -> StoreResult<Option<Ticket>>;

    /// Applies `change`, the audit event and stats together. `None` if the
    /// ticket does not exist; `Stale` if `expected_status` no longer holds.
    async fn update_ticket(
        &self,
        id: Uuid,
        change: TicketChange,
        event: Option<NewTicketEvent>,
        stats: &[StatsUpdate],
    ) -> StoreResult<Option<Ticket>>;

    /// Ordered by priority desc, then newest first
    async fn list_tickets(&self, query: &TicketQuery) -> StoreResult<(Vec<TicketSummary>, i64)>;

    /// Unassigned NEW tickets, priority desc then oldest first
    async fn ticket_queue(&self) -> StoreResult<Vec<Ticket>>;

    /// The operator's NEW/IN_PROGRESS/WAITING tickets, priority desc then
    /// most recently updated first
    async fn active_tickets_for(&self, operator_id: Uuid) -> StoreResult<Vec<TicketSummary>>;

    /// Other RESOLVED tickets of the category, most recently resolved first
    async fn similar_resolved(
        &self,
        category: TicketCategory,
        exclude: Uuid,
        limit: i64,
    ) -> StoreResult<Vec<Ticket>>;

    async fn ticket_events(&self, ticket_id: Uuid) -> StoreResult<Vec<TicketEvent>>;

    async fn insert_internal_note(
        &self,
        note: NewInternalNote,
        event: NewTicketEvent,
    ) -> StoreResult<InternalNote>;

    async fn internal_notes(&self, ticket_id: Uuid) -> StoreResult<Vec<InternalNote>>;

    async fn find_rating(&self, ticket_id: Uuid) -> StoreResult<Option<TicketRating>>;

    /// Fails with `StoreError::Conflict` if the ticket is already rated
    async fn insert_rating(
        &self,
        rating: NewRating,
        stats: &[StatsUpdate],
    ) -> StoreResult<TicketRating>;

    // -- Messages ------------------------------------------------------------

    /// Persists the message with its attachment links, touches the ticket's
    /// `updated_at` and appends the audit event.
    async fn insert_message(&self, message: NewMessage, event: NewTicketEvent) -> StoreResult<Message>;

    async fn find_message(&self, id: Uuid) -> StoreResult<Option<Message>>;

    /// Oldest first
    async fn list_messages(&self, ticket_id: Uuid, include_internal: bool) -> StoreResult<Vec<Message>>;

    /// Stamps `read_at` if the message is unread and not authored by
    /// `reader_id`. Returns the message only when this call stamped it.
    async fn mark_message_read(
        &self,
        id: Uuid,
        reader_id: Uuid,
        at: OffsetDateTime,
    ) -> StoreResult<Option<Message>>;

    /// Batch form of [`TicketStore::mark_message_read`]; returns the
    /// messages actually stamped.
    async fn mark_messages_read(
        &self,
        ids: &[Uuid],
        reader_id: Uuid,
        at: OffsetDateTime,
    ) -> StoreResult<Vec<Message>>;

    /// Unread, non-internal messages in the ticket not authored by `viewer_id`
    async fn count_unread_messages(&self, ticket_id: Uuid, viewer_id: Uuid) -> StoreResult<i64>;

    // -- Notifications -------------------------------------------------------

    async fn insert_notification(&self, notification: NewNotification) -> StoreResult<Notification>;

    /// Newest first
    async fn list_notifications(
        &self,
        user_id: Uuid,
        query: &NotificationQuery,
    ) -> StoreResult<(Vec<Notification>, i64)>;

    async fn count_unread_notifications(&self, user_id: Uuid) -> StoreResult<i64>;

    /// Marks one of the owner's notifications read. Already-read
    /// notifications are returned unchanged; `None` if the owner has no
    /// such notification.
    async fn mark_notification_read(
        &self,
        id: Uuid,
        owner_id: Uuid,
        at: OffsetDateTime,
    ) -> StoreResult<Option<Notification>>;

    async fn mark_notifications_read(
        &self,
        ids: &[Uuid],
        owner_id: Uuid,
        at: OffsetDateTime,
    ) -> StoreResult<u64>;

    async fn mark_all_notifications_read(&self, owner_id: Uuid, at: OffsetDateTime) -> StoreResult<u64>;

    async fn delete_notification(&self, id: Uuid, owner_id: Uuid) -> StoreResult<bool>;

    async fn delete_all_notifications(&self, owner_id: Uuid) -> StoreResult<u64>;
}
