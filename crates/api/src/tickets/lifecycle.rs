use helpdesk_shared::{
    InternalNote, Paginated, PageRequest, Ticket, TicketCategory, TicketEvent, TicketEventType,
    TicketPriority, TicketRating, TicketStatus, TicketSummary, UserRole,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

use super::priority::PriorityRule;
use super::sla::SlaReport;
use crate::auth::{authorize, Action, AuthUser};
use crate::error::{ApiError, ApiResult};
use crate::notifications::NotificationService;
use crate::store::{
    distinct_ids, NewInternalNote, NewRating, NewTicket, NewTicketEvent, StatsUpdate, TicketChange,
    TicketFilter, TicketQuery, TicketScope, TicketStore,
};
use crate::websocket::{events::ServerEvent, room::Audience, WebSocketState};

const TITLE_MIN: usize = 5;
const TITLE_MAX: usize = 200;
const DESCRIPTION_MIN: usize = 10;
const NOTE_MIN: usize = 5;
const ESCALATION_REASON_MIN: usize = 10;
const SUGGESTION_LIMIT: i64 = 5;

// =============================================================================
// Inputs & Outputs
// =============================================================================

#[derive(Debug, Clone)]
pub struct CreateTicket {
    pub title: String,
    pub description: String,
    pub category: TicketCategory,
    pub attachment_ids: Vec<Uuid>,
    pub context_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateTicket {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<TicketCategory>,
    pub context_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct RateTicket {
    pub rating: i16,
    pub feedback: Option<String>,
    pub liked_speed: bool,
    pub liked_clarity: bool,
    pub liked_politeness: bool,
    pub liked_completeness: bool,
}

/// Ticket as shown on its detail page
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketDetail {
    #[serde(flatten)]
    pub ticket: Ticket,
    pub sla: SlaReport,
    pub unread_count: i64,
    pub rating: Option<TicketRating>,
    /// Staff only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<Ticket>>,
    /// Staff only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal_notes: Option<Vec<InternalNote>>,
}

fn check_length(field: &str, value: &str, min: usize, max: Option<usize>) -> ApiResult<()> {
    let len = value.trim().chars().count();
    if len < min {
        return Err(ApiError::Validation(format!(
            "{} must be at least {} characters",
            field, min
        )));
    }
    if let Some(max) = max {
        if len > max {
            return Err(ApiError::Validation(format!(
                "{} must be at most {} characters",
                field, max
            )));
        }
    }
    Ok(())
}

// =============================================================================
// Service
// =============================================================================

#[derive(Clone)]
pub struct TicketService {
    store: Arc<dyn TicketStore>,
    ws: WebSocketState,
    notifications: NotificationService,
    priority: Arc<PriorityRule>,
}

impl TicketService {
    pub fn new(
        store: Arc<dyn TicketStore>,
        ws: WebSocketState,
        notifications: NotificationService,
        priority: PriorityRule,
    ) -> Self {
        Self {
            store,
            ws,
            notifications,
            priority: Arc::new(priority),
        }
    }

    async fn load(&self, ticket_id: Uuid) -> ApiResult<Ticket> {
        self.store
            .find_ticket(ticket_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Ticket".into()))
    }

    /// Load a ticket the actor may act on
    pub async fn load_for(&self, actor: &AuthUser, ticket_id: Uuid, action: Action) -> ApiResult<Ticket> {
        let ticket = self.load(ticket_id).await?;
        authorize(actor, action, Some(&ticket))?;
        Ok(ticket)
    }

    async fn apply(
        &self,
        ticket_id: Uuid,
        change: TicketChange,
        event: NewTicketEvent,
        stats: &[StatsUpdate],
    ) -> ApiResult<Ticket> {
        self.store
            .update_ticket(ticket_id, change, Some(event), stats)
            .await?
            .ok_or_else(|| ApiError::NotFound("Ticket".into()))
    }

    /// Push the persisted state to everyone watching the ticket
    async fn publish(&self, ticket: &Ticket) {
        self.ws
            .broadcast_ticket(
                ticket.id,
                ServerEvent::TicketUpdated {
                    ticket_id: ticket.id,
                    status: ticket.status,
                    priority: ticket.priority,
                    operator_id: ticket.operator_id,
                },
                Audience::Everyone,
            )
            .await;
    }

    // -- Creation & reads ----------------------------------------------------

    pub async fn create(&self, actor: &AuthUser, input: CreateTicket) -> ApiResult<Ticket> {
        if !actor.role.is_client() {
            return Err(ApiError::Forbidden("Only clients can open tickets".into()));
        }
        check_length("Title", &input.title, TITLE_MIN, Some(TITLE_MAX))?;
        check_length("Description", &input.description, DESCRIPTION_MIN, None)?;
        if let Some(context) = &input.context_data {
            if !context.is_object() {
                return Err(ApiError::Validation("contextData must be an object".into()));
            }
        }

        let priority = self.priority.classify(&input.description, input.category);
        let id = Uuid::new_v4();
        let event = NewTicketEvent::new(id, TicketEventType::Created, "Ticket created", actor.user_id)
            .with_metadata(json!({ "priority": priority, "category": input.category }));

        let ticket = self
            .store
            .create_ticket(
                NewTicket {
                    id,
                    title: input.title.trim().to_string(),
                    description: input.description.trim().to_string(),
                    category: input.category,
                    priority,
                    client_id: actor.user_id,
                    context_data: input.context_data,
                    attachment_ids: distinct_ids(input.attachment_ids),
                    created_at: OffsetDateTime::now_utc(),
                },
                event,
                &[StatsUpdate::ClientTicketOpened {
                    client_id: actor.user_id,
                }],
            )
            .await?;

        tracing::info!(
            ticket_id = %ticket.id,
            ticket_number = %ticket.number,
            client_id = %actor.user_id,
            priority = %ticket.priority,
            "Ticket created"
        );

        self.notifications.ticket_created(&ticket).await;
        Ok(ticket)
    }

    /// Role-scoped, filtered, paginated list
    pub async fn list(
        &self,
        actor: &AuthUser,
        filter: TicketFilter,
        page: PageRequest,
    ) -> ApiResult<Paginated<TicketSummary>> {
        let scope = match actor.role {
            UserRole::Client => TicketScope::Client(actor.user_id),
            UserRole::Operator | UserRole::Specialist => TicketScope::Operator(actor.user_id),
            UserRole::Manager | UserRole::Admin => TicketScope::All,
        };
        let query = TicketQuery {
            scope,
            filter,
            viewer_id: actor.user_id,
            page,
        };
        let (items, total) = self.store.list_tickets(&query).await?;
        Ok(Paginated::new(items, total, page))
    }

    pub async fn queue(&self, actor: &AuthUser) -> ApiResult<Vec<Ticket>> {
        authorize(actor, Action::ViewQueue, None)?;
        Ok(self.store.ticket_queue().await?)
    }

    pub async fn my_active(&self, actor: &AuthUser) -> ApiResult<Vec<TicketSummary>> {
        authorize(actor, Action::ViewOwnWorkload, None)?;
        Ok(self.store.active_tickets_for(actor.user_id).await?)
    }

    pub async fn detail(&self, actor: &AuthUser, ticket_id: Uuid) -> ApiResult<TicketDetail> {
        let ticket = self.load_for(actor, ticket_id, Action::ViewTicket).await?;
        let unread_count = self.store.count_unread_messages(ticket.id, actor.user_id).await?;
        let rating = self.store.find_rating(ticket.id).await?;

        let (suggestions, internal_notes) = if actor.role.is_staff() {
            (
                Some(
                    self.store
                        .similar_resolved(ticket.category, ticket.id, SUGGESTION_LIMIT)
                        .await?,
                ),
                Some(self.store.internal_notes(ticket.id).await?),
            )
        } else {
            (None, None)
        };

        Ok(TicketDetail {
            sla: SlaReport::for_ticket(&ticket),
            ticket,
            unread_count,
            rating,
            suggestions,
            internal_notes,
        })
    }

    pub async fn history(&self, actor: &AuthUser, ticket_id: Uuid) -> ApiResult<Vec<TicketEvent>> {
        let ticket = self.load_for(actor, ticket_id, Action::ViewTicket).await?;
        Ok(self.store.ticket_events(ticket.id).await?)
    }

    pub async fn suggestions(&self, actor: &AuthUser, ticket_id: Uuid) -> ApiResult<Vec<Ticket>> {
        let ticket = self.load_for(actor, ticket_id, Action::ManageTicket).await?;
        Ok(self
            .store
            .similar_resolved(ticket.category, ticket.id, SUGGESTION_LIMIT)
            .await?)
    }

    // -- Transitions ---------------------------------------------------------

    pub async fn update(&self, actor: &AuthUser, ticket_id: Uuid, input: UpdateTicket) -> ApiResult<Ticket> {
        let ticket = self.load_for(actor, ticket_id, Action::EditTicket).await?;
        if ticket.status.is_terminal() {
            return Err(ApiError::InvalidState("Closed tickets cannot be edited".into()));
        }
        if let Some(title) = &input.title {
            check_length("Title", title, TITLE_MIN, Some(TITLE_MAX))?;
        }
        if let Some(description) = &input.description {
            check_length("Description", description, DESCRIPTION_MIN, None)?;
        }

        let mut change = TicketChange::at(OffsetDateTime::now_utc()).expecting(ticket.status);
        change.title = input.title.map(|t| t.trim().to_string());
        change.description = input.description.map(|d| d.trim().to_string());
        change.category = input.category;
        change.context_data = input.context_data;

        let updated = self
            .store
            .update_ticket(ticket.id, change, None, &[])
            .await?
            .ok_or_else(|| ApiError::NotFound("Ticket".into()))?;

        tracing::info!(ticket_id = %ticket.id, user_id = %actor.user_id, "Ticket edited");
        self.publish(&updated).await;
        Ok(updated)
    }

    /// Give the ticket to an operator-class user (the actor by default)
    pub async fn assign(&self, actor: &AuthUser, ticket_id: Uuid, operator_id: Option<Uuid>) -> ApiResult<Ticket> {
        let ticket = self.load_for(actor, ticket_id, Action::ManageTicket).await?;
        if ticket.status.is_terminal() {
            return Err(ApiError::InvalidState("Closed tickets cannot be reassigned".into()));
        }

        let target_id = operator_id.unwrap_or(actor.user_id);
        let target = self.store.find_user(target_id).await?;
        let eligible = target
            .as_ref()
            .is_some_and(|u| u.is_active && u.role.is_operator_class());
        if !eligible {
            return Err(ApiError::InvalidOperator(format!(
                "User {} cannot be assigned tickets",
                target_id
            )));
        }

        let now = OffsetDateTime::now_utc();
        let mut change = TicketChange::at(now).expecting(ticket.status);
        change.operator_id = Some(target_id);
        change.assigned_at = Some(now);
        if ticket.status == TicketStatus::New {
            change.status = Some(TicketStatus::InProgress);
        }

        let event = NewTicketEvent::new(ticket.id, TicketEventType::Assigned, "Ticket assigned", actor.user_id)
            .with_metadata(json!({
                "previousOperatorId": ticket.operator_id,
                "operatorId": target_id,
            }));
        let updated = self.apply(ticket.id, change, event, &[]).await?;

        tracing::info!(
            ticket_id = %updated.id,
            operator_id = %target_id,
            assigned_by = %actor.user_id,
            "Ticket assigned"
        );

        self.notifications.ticket_assigned(&updated, target_id).await;
        self.publish(&updated).await;
        Ok(updated)
    }

    pub async fn change_status(
        &self,
        actor: &AuthUser,
        ticket_id: Uuid,
        new_status: TicketStatus,
        comment: Option<String>,
    ) -> ApiResult<Ticket> {
        let ticket = self.load_for(actor, ticket_id, Action::ManageTicket).await?;
        if ticket.status.is_terminal() {
            return Err(ApiError::InvalidState("Ticket is closed".into()));
        }
        if ticket.status == new_status {
            return Err(ApiError::InvalidState(format!("Ticket is already {}", new_status)));
        }

        let now = OffsetDateTime::now_utc();
        let mut change = TicketChange::at(now).expecting(ticket.status);
        change.status = Some(new_status);
        let mut stats = Vec::new();

        match new_status {
            TicketStatus::Resolved => {
                change.resolved_at = Some(now);
                stats.push(StatsUpdate::ClientTicketResolved {
                    client_id: ticket.client_id,
                });
                if let Some(operator_id) = ticket.operator_id {
                    let minutes = (now - ticket.created_at).whole_minutes().max(0);
                    stats.push(StatsUpdate::OperatorResolved {
                        operator_id,
                        minutes: i32::try_from(minutes).unwrap_or(i32::MAX),
                    });
                }
            }
            TicketStatus::Closed => change.closed_at = Some(now),
            _ => {}
        }

        let event = NewTicketEvent::new(
            ticket.id,
            TicketEventType::StatusChanged,
            format!("Status changed from {} to {}", ticket.status, new_status),
            actor.user_id,
        )
        .with_metadata(json!({
            "oldStatus": ticket.status,
            "newStatus": new_status,
            "comment": comment,
        }));
        let updated = self.apply(ticket.id, change, event, &stats).await?;

        tracing::info!(
            ticket_id = %updated.id,
            old_status = %ticket.status,
            new_status = %new_status,
            user_id = %actor.user_id,
            "Ticket status changed"
        );

        self.notifications.status_changed(&updated, ticket.status).await;
        self.publish(&updated).await;
        Ok(updated)
    }

    pub async fn change_priority(
        &self,
        actor: &AuthUser,
        ticket_id: Uuid,
        new_priority: TicketPriority,
        reason: Option<String>,
    ) -> ApiResult<Ticket> {
        let ticket = self.load_for(actor, ticket_id, Action::ManageTicket).await?;
        if ticket.status.is_terminal() {
            return Err(ApiError::InvalidState("Ticket is closed".into()));
        }

        let mut change = TicketChange::at(OffsetDateTime::now_utc()).expecting(ticket.status);
        change.priority = Some(new_priority);
        let event = NewTicketEvent::new(
            ticket.id,
            TicketEventType::PriorityChanged,
            format!("Priority changed from {} to {}", ticket.priority, new_priority),
            actor.user_id,
        )
        .with_metadata(json!({
            "oldPriority": ticket.priority,
            "newPriority": new_priority,
            "reason": reason,
        }));
        let updated = self.apply(ticket.id, change, event, &[]).await?;

        tracing::info!(
            ticket_id = %updated.id,
            old_priority = %ticket.priority,
            new_priority = %new_priority,
            "Ticket priority changed"
        );

        self.publish(&updated).await;
        Ok(updated)
    }

    /// Hand the ticket to a specialist at HIGH priority, from any status
    pub async fn escalate(
        &self,
        actor: &AuthUser,
        ticket_id: Uuid,
        specialist_id: Uuid,
        reason: String,
        notify_client: bool,
    ) -> ApiResult<Ticket> {
        authorize(actor, Action::Escalate, None)?;
        check_length("Reason", &reason, ESCALATION_REASON_MIN, None)?;
        let ticket = self.load(ticket_id).await?;

        let specialist = self.store.find_user(specialist_id).await?;
        if !specialist
            .as_ref()
            .is_some_and(|u| u.is_active && u.role == UserRole::Specialist)
        {
            return Err(ApiError::InvalidOperator(format!(
                "User {} is not an active specialist",
                specialist_id
            )));
        }

        let now = OffsetDateTime::now_utc();
        let mut change = TicketChange::at(now);
        change.operator_id = Some(specialist_id);
        change.assigned_at = Some(now);
        change.priority = Some(TicketPriority::High);
        change.status = Some(TicketStatus::InProgress);

        let reason = reason.trim().to_string();
        let event = NewTicketEvent::new(
            ticket.id,
            TicketEventType::Escalated,
            "Ticket escalated to a specialist",
            actor.user_id,
        )
        .with_metadata(json!({
            "reason": reason,
            "previousOperatorId": ticket.operator_id,
            "newOperatorId": specialist_id,
        }));
        let updated = self.apply(ticket.id, change, event, &[]).await?;

        tracing::info!(
            ticket_id = %updated.id,
            specialist_id = %specialist_id,
            previous_operator_id = ?ticket.operator_id,
            "Ticket escalated"
        );

        self.notifications
            .escalated(&updated, specialist_id, &reason, notify_client)
            .await;
        self.publish(&updated).await;
        Ok(updated)
    }

    pub async fn add_internal_note(&self, actor: &AuthUser, ticket_id: Uuid, content: String) -> ApiResult<InternalNote> {
        let ticket = self.load_for(actor, ticket_id, Action::InternalContent).await?;
        check_length("Note", &content, NOTE_MIN, None)?;

        let note = self
            .store
            .insert_internal_note(
                NewInternalNote {
                    ticket_id: ticket.id,
                    author_id: actor.user_id,
                    content: content.trim().to_string(),
                },
                NewTicketEvent::new(ticket.id, TicketEventType::NoteAdded, "Internal note added", actor.user_id),
            )
            .await?;

        tracing::debug!(ticket_id = %ticket.id, note_id = %note.id, "Internal note added");
        Ok(note)
    }

    /// Client feedback, at most once per finished ticket
    pub async fn rate(&self, actor: &AuthUser, ticket_id: Uuid, input: RateTicket) -> ApiResult<TicketRating> {
        if !(1..=5).contains(&input.rating) {
            return Err(ApiError::Validation("Rating must be between 1 and 5".into()));
        }
        let ticket = self.load_for(actor, ticket_id, Action::Rate).await?;
        if !ticket.status.is_finished() {
            return Err(ApiError::InvalidState(
                "Only resolved or closed tickets can be rated".into(),
            ));
        }
        if self.store.find_rating(ticket.id).await?.is_some() {
            return Err(ApiError::AlreadyDone("Ticket has already been rated".into()));
        }

        let stats: Vec<StatsUpdate> = ticket
            .operator_id
            .map(|operator_id| StatsUpdate::OperatorRated {
                operator_id,
                rating: input.rating,
            })
            .into_iter()
            .collect();

        let rating = self
            .store
            .insert_rating(
                NewRating {
                    ticket_id: ticket.id,
                    client_id: actor.user_id,
                    rating: input.rating,
                    feedback: input.feedback.filter(|f| !f.trim().is_empty()),
                    liked_speed: input.liked_speed,
                    liked_clarity: input.liked_clarity,
                    liked_politeness: input.liked_politeness,
                    liked_completeness: input.liked_completeness,
                },
                &stats,
            )
            .await
            .map_err(|e| match e {
                // Lost a race with a concurrent rating
                helpdesk_shared::StoreError::Conflict(_) => {
                    ApiError::AlreadyDone("Ticket has already been rated".into())
                }
                other => other.into(),
            })?;

        tracing::info!(ticket_id = %ticket.id, rating = rating.rating, "Ticket rated");
        Ok(rating)
    }

    /// SLA figures for a ticket the actor may view
    pub async fn sla(&self, actor: &AuthUser, ticket_id: Uuid) -> ApiResult<SlaReport> {
        let ticket = self.load_for(actor, ticket_id, Action::ViewTicket).await?;
        Ok(SlaReport::for_ticket(&ticket))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use helpdesk_shared::{NotificationType, User};
    use tokio::sync::mpsc;

    struct Harness {
        service: TicketService,
        store: Arc<dyn TicketStore>,
        ws: WebSocketState,
    }

    fn harness() -> Harness {
        let ws = WebSocketState::new();
        let store: Arc<dyn TicketStore> = Arc::new(MemoryStore::new());
        let notifications = NotificationService::new(Arc::clone(&store), ws.clone());
        let service = TicketService::new(
            Arc::clone(&store),
            ws.clone(),
            notifications,
            PriorityRule::default(),
        );
        Harness { service, store, ws }
    }

    async fn seed(store: &Arc<dyn TicketStore>, role: UserRole) -> AuthUser {
        let user = User {
            id: Uuid::new_v4(),
            email: format!("{}@example.com", role.as_str().to_lowercase()),
            first_name: "Test".into(),
            last_name: role.as_str().into(),
            role,
            is_active: true,
        };
        store.upsert_user(&user).await.unwrap();
        AuthUser {
            user_id: user.id,
            role,
            email: user.email,
        }
    }

    fn input(description: &str, category: TicketCategory) -> CreateTicket {
        CreateTicket {
            title: "Cannot log in".into(),
            description: description.into(),
            category,
            attachment_ids: Vec::new(),
            context_data: None,
        }
    }

    fn rating(value: i16) -> RateTicket {
        RateTicket {
            rating: value,
            feedback: Some("Quick and clear".into()),
            liked_speed: true,
            liked_clarity: true,
            liked_politeness: false,
            liked_completeness: false,
        }
    }

    #[tokio::test]
    async fn test_create_classifies_priority_and_notifies_staff() {
        let h = harness();
        let client = seed(&h.store, UserRole::Client).await;
        let operator = seed(&h.store, UserRole::Operator).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        h.ws.connect(operator.user_id, operator.role, tx).await;

        let urgent = h
            .service
            .create(&client, input("Account LOCKED after password reset", TicketCategory::MobileApp))
            .await
            .unwrap();
        assert_eq!(urgent.priority, TicketPriority::High);
        assert_eq!(urgent.status, TicketStatus::New);
        assert_eq!(urgent.number, "TKT-000001");

        let calm = h
            .service
            .create(&client, input("Please update my invoice address", TicketCategory::Payments))
            .await
            .unwrap();
        assert_eq!(calm.priority, TicketPriority::Medium);

        match rx.try_recv().unwrap() {
            ServerEvent::Notification { notification } => {
                assert_eq!(notification.notification_type, NotificationType::TicketCreated);
                assert_eq!(notification.entity_id, Some(urgent.id));
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let profile = h.store.client_profile(client.user_id).await.unwrap().unwrap();
        assert_eq!(profile.total_tickets, 2);
    }

    #[tokio::test]
    async fn test_create_validation() {
        let h = harness();
        let client = seed(&h.store, UserRole::Client).await;
        let operator = seed(&h.store, UserRole::Operator).await;

        let mut short = input("Long enough description", TicketCategory::Other);
        short.title = "Hey".into();
        assert!(matches!(h.service.create(&client, short).await, Err(ApiError::Validation(_))));

        assert!(matches!(
            h.service.create(&client, input("too short", TicketCategory::Other)).await,
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            h.service
                .create(&operator, input("Long enough description", TicketCategory::Other))
                .await,
            Err(ApiError::Forbidden(_))
        ));

        let mut unknown_file = input("Long enough description", TicketCategory::Other);
        unknown_file.attachment_ids = vec![Uuid::new_v4()];
        assert!(matches!(
            h.service.create(&client, unknown_file).await,
            Err(ApiError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_assign_moves_new_ticket_in_progress() {
        let h = harness();
        let client = seed(&h.store, UserRole::Client).await;
        let operator = seed(&h.store, UserRole::Operator).await;
        let ticket = h
            .service
            .create(&client, input("Printer is jammed again", TicketCategory::MobileApp))
            .await
            .unwrap();

        let assigned = h.service.assign(&operator, ticket.id, None).await.unwrap();
        assert_eq!(assigned.operator_id, Some(operator.user_id));
        assert_eq!(assigned.status, TicketStatus::InProgress);
        assert!(assigned.assigned_at.is_some());

        let events = h.store.ticket_events(ticket.id).await.unwrap();
        assert_eq!(events.last().unwrap().event_type, TicketEventType::Assigned);

        // Clients and non-operator targets are rejected
        assert!(matches!(
            h.service.assign(&client, ticket.id, None).await,
            Err(ApiError::Forbidden(_))
        ));
        assert!(matches!(
            h.service.assign(&operator, ticket.id, Some(client.user_id)).await,
            Err(ApiError::InvalidOperator(_))
        ));
        assert!(matches!(
            h.service.assign(&operator, Uuid::new_v4(), None).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_resolution_updates_stats_and_allows_one_rating() {
        let h = harness();
        let client = seed(&h.store, UserRole::Client).await;
        let operator = seed(&h.store, UserRole::Operator).await;
        let ticket = h
            .service
            .create(&client, input("Cannot export my report", TicketCategory::MobileApp))
            .await
            .unwrap();

        // Unfinished tickets cannot be rated
        assert!(matches!(
            h.service.rate(&client, ticket.id, rating(5)).await,
            Err(ApiError::InvalidState(_))
        ));

        h.service.assign(&operator, ticket.id, None).await.unwrap();
        let resolved = h
            .service
            .change_status(&operator, ticket.id, TicketStatus::Resolved, Some("Fixed".into()))
            .await
            .unwrap();
        assert!(resolved.resolved_at.is_some());
        assert!(matches!(
            h.service
                .change_status(&operator, ticket.id, TicketStatus::Resolved, None)
                .await,
            Err(ApiError::InvalidState(_))
        ));

        let stats = h.store.operator_stats(operator.user_id).await.unwrap().unwrap();
        assert_eq!(stats.total_resolved, 1);

        assert!(matches!(
            h.service.rate(&client, ticket.id, rating(0)).await,
            Err(ApiError::Validation(_))
        ));
        let rated = h.service.rate(&client, ticket.id, rating(4)).await.unwrap();
        assert_eq!(rated.rating, 4);
        assert!(matches!(
            h.service.rate(&client, ticket.id, rating(5)).await,
            Err(ApiError::AlreadyDone(_))
        ));

        let stats = h.store.operator_stats(operator.user_id).await.unwrap().unwrap();
        assert_eq!(stats.total_ratings, 1);
        assert_eq!(stats.average_rating, 4.0);
    }

    #[tokio::test]
    async fn test_closed_ticket_is_frozen() {
        let h = harness();
        let client = seed(&h.store, UserRole::Client).await;
        let manager = seed(&h.store, UserRole::Manager).await;
        let ticket = h
            .service
            .create(&client, input("Wrong charge on my account", TicketCategory::Payments))
            .await
            .unwrap();

        let closed = h
            .service
            .change_status(&manager, ticket.id, TicketStatus::Closed, None)
            .await
            .unwrap();
        assert!(closed.closed_at.is_some());
        assert!(closed.resolved_at.is_none());

        assert!(matches!(
            h.service
                .change_status(&manager, ticket.id, TicketStatus::InProgress, None)
                .await,
            Err(ApiError::InvalidState(_))
        ));
        assert!(matches!(
            h.service
                .change_priority(&manager, ticket.id, TicketPriority::Low, None)
                .await,
            Err(ApiError::InvalidState(_))
        ));
        assert!(matches!(
            h.service.assign(&manager, ticket.id, None).await,
            Err(ApiError::InvalidState(_))
        ));
        let edit = UpdateTicket {
            title: Some("Changed title".into()),
            ..Default::default()
        };
        assert!(matches!(
            h.service.update(&client, ticket.id, edit).await,
            Err(ApiError::InvalidState(_))
        ));

        // Closed tickets are still rateable
        assert!(h.service.rate(&client, ticket.id, rating(2)).await.is_ok());
    }

    #[tokio::test]
    async fn test_escalate_hands_over_to_specialist() {
        let h = harness();
        let client = seed(&h.store, UserRole::Client).await;
        let operator = seed(&h.store, UserRole::Operator).await;
        let specialist = seed(&h.store, UserRole::Specialist).await;
        let ticket = h
            .service
            .create(&client, input("Data sync keeps failing", TicketCategory::MobileApp))
            .await
            .unwrap();
        h.service.assign(&operator, ticket.id, None).await.unwrap();

        assert!(matches!(
            h.service
                .escalate(&operator, ticket.id, specialist.user_id, "short".into(), false)
                .await,
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            h.service
                .escalate(&operator, ticket.id, operator.user_id, "Needs deeper analysis".into(), false)
                .await,
            Err(ApiError::InvalidOperator(_))
        ));
        assert!(matches!(
            h.service
                .escalate(&client, ticket.id, specialist.user_id, "Needs deeper analysis".into(), false)
                .await,
            Err(ApiError::Forbidden(_))
        ));

        let escalated = h
            .service
            .escalate(&operator, ticket.id, specialist.user_id, "Needs deeper analysis".into(), true)
            .await
            .unwrap();
        assert_eq!(escalated.operator_id, Some(specialist.user_id));
        assert_eq!(escalated.priority, TicketPriority::High);
        assert_eq!(escalated.status, TicketStatus::InProgress);

        let event = h.store.ticket_events(ticket.id).await.unwrap().pop().unwrap();
        assert_eq!(event.event_type, TicketEventType::Escalated);
        let metadata = event.metadata.unwrap();
        assert_eq!(metadata["previousOperatorId"], json!(operator.user_id));
        assert_eq!(metadata["newOperatorId"], json!(specialist.user_id));

        assert_eq!(h.store.count_unread_notifications(client.user_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_transitions_broadcast_to_ticket_room() {
        let h = harness();
        let client = seed(&h.store, UserRole::Client).await;
        let operator = seed(&h.store, UserRole::Operator).await;
        let ticket = h
            .service
            .create(&client, input("Mobile app crashes on start", TicketCategory::MobileApp))
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = h.ws.connect(client.user_id, client.role, tx).await;
        h.ws.join_ticket(&conn, ticket.id).await;
        while rx.try_recv().is_ok() {}

        h.service
            .change_priority(&operator, ticket.id, TicketPriority::Low, Some("Cosmetic".into()))
            .await
            .unwrap();

        match rx.try_recv().unwrap() {
            ServerEvent::TicketUpdated { ticket_id, priority, .. } => {
                assert_eq!(ticket_id, ticket.id);
                assert_eq!(priority, TicketPriority::Low);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_detail_hides_staff_fields_from_clients() {
        let h = harness();
        let client = seed(&h.store, UserRole::Client).await;
        let operator = seed(&h.store, UserRole::Operator).await;
        let ticket = h
            .service
            .create(&client, input("Question about my plan", TicketCategory::Payments))
            .await
            .unwrap();
        h.service
            .add_internal_note(&operator, ticket.id, "Client on legacy plan".into())
            .await
            .unwrap();
        assert!(matches!(
            h.service
                .add_internal_note(&client, ticket.id, "Let me see notes".into())
                .await,
            Err(ApiError::Forbidden(_))
        ));

        let for_client = h.service.detail(&client, ticket.id).await.unwrap();
        assert!(for_client.internal_notes.is_none());
        assert!(for_client.suggestions.is_none());

        let for_staff = h.service.detail(&operator, ticket.id).await.unwrap();
        assert_eq!(for_staff.internal_notes.unwrap().len(), 1);

        let stranger = seed(&h.store, UserRole::Client).await;
        assert!(matches!(
            h.service.detail(&stranger, ticket.id).await,
            Err(ApiError::Forbidden(_))
        ));
    }
}
