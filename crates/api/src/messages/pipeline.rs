use helpdesk_shared::{Message, Ticket, TicketEventType};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::{authorize, is_allowed, Action, AuthUser};
use crate::error::{ApiError, ApiResult};
use crate::notifications::NotificationService;
use crate::store::{distinct_ids, NewMessage, NewTicketEvent, TicketStore};
use crate::websocket::{events::ServerEvent, room::Audience, WebSocketState};

const MAX_CONTENT_CHARS: usize = 50_000;

#[derive(Debug, Clone)]
pub struct SendMessage {
    pub ticket_id: Uuid,
    pub content: String,
    pub attachment_ids: Vec<Uuid>,
    pub is_internal: bool,
}

/// Pull `@<uuid>` mentions out of a message body, first occurrence order
fn mentioned_ids(content: &str) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    content
        .split('@')
        .skip(1)
        .filter_map(|rest| rest.get(..36))
        .filter_map(|candidate| Uuid::parse_str(candidate).ok())
        .filter(|id| seen.insert(*id))
        .collect()
}

#[derive(Clone)]
pub struct MessagePipeline {
    store: Arc<dyn TicketStore>,
    ws: WebSocketState,
    notifications: NotificationService,
}

impl MessagePipeline {
    pub fn new(store: Arc<dyn TicketStore>, ws: WebSocketState, notifications: NotificationService) -> Self {
        Self {
            store,
            ws,
            notifications,
        }
    }

    async fn load_ticket(&self, ticket_id: Uuid) -> ApiResult<Ticket> {
        self.store
            .find_ticket(ticket_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Ticket".into()))
    }

    async fn author_name(&self, author: &AuthUser) -> String {
        match self.store.find_user(author.user_id).await {
            Ok(Some(user)) if !user.display_name().is_empty() => user.display_name(),
            _ => author.email.clone(),
        }
    }

    /// Validate, persist, notify, then broadcast into the ticket room
    pub async fn send(&self, author: &AuthUser, input: SendMessage) -> ApiResult<Message> {
        let ticket = self.load_ticket(input.ticket_id).await?;
        authorize(author, Action::PostMessage, Some(&ticket))?;
        if input.is_internal {
            authorize(author, Action::InternalContent, Some(&ticket))?;
        }

        let content = input.content.trim();
        if content.is_empty() {
            return Err(ApiError::Validation("Message content is required".into()));
        }
        if content.chars().count() > MAX_CONTENT_CHARS {
            return Err(ApiError::Validation(format!(
                "Message content must be at most {} characters",
                MAX_CONTENT_CHARS
            )));
        }

        let id = Uuid::new_v4();
        let description = if input.is_internal {
            "Internal note added"
        } else {
            "Message sent"
        };
        let event = NewTicketEvent::new(ticket.id, TicketEventType::MessageSent, description, author.user_id)
            .with_metadata(json!({ "messageId": id, "isInternal": input.is_internal }));

        let message = self
            .store
            .insert_message(
                NewMessage {
                    id,
                    ticket_id: ticket.id,
                    author_id: author.user_id,
                    content: content.to_string(),
                    is_internal: input.is_internal,
                    attachment_ids: distinct_ids(input.attachment_ids),
                    created_at: OffsetDateTime::now_utc(),
                },
                event,
            )
            .await?;

        tracing::info!(
            ticket_id = %ticket.id,
            message_id = %message.id,
            author_id = %author.user_id,
            is_internal = message.is_internal,
            "Message sent"
        );

        let author_name = self.author_name(author).await;
        if !message.is_internal {
            if let Some(recipient_id) = ticket.counterpart_of(author.user_id) {
                self.notifications
                    .new_message(&ticket, recipient_id, &author_name, &message)
                    .await;
            }
        }
        self.notify_mentions(&ticket, author, &author_name, &message).await;

        let audience = if message.is_internal {
            Audience::StaffOnly
        } else {
            Audience::Everyone
        };
        self.ws
            .broadcast_ticket(
                ticket.id,
                ServerEvent::NewMessage {
                    message: message.clone(),
                },
                audience,
            )
            .await;

        Ok(message)
    }

    async fn notify_mentions(&self, ticket: &Ticket, author: &AuthUser, author_name: &str, message: &Message) {
        for user_id in mentioned_ids(&message.content) {
            if user_id == author.user_id {
                continue;
            }
            let user = match self.store.find_user(user_id).await {
                Ok(Some(user)) => user,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(user_id = %user_id, error = %e, "Failed to resolve mention");
                    continue;
                }
            };
            // Mentioned users must already see the ticket; internal content never reaches clients
            let mentioned = AuthUser::from(&user);
            if !is_allowed(&mentioned, Action::ViewTicket, Some(ticket))
                || (message.is_internal && !user.role.is_staff())
            {
                tracing::debug!(user_id = %user_id, ticket_id = %ticket.id, "Mention skipped: no access");
                continue;
            }
            self.notifications.mention(ticket, &user, author_name, message).await;
        }
    }

    /// Conversation for a ticket, oldest first; internal messages for staff
    pub async fn list(&self, viewer: &AuthUser, ticket_id: Uuid) -> ApiResult<Vec<Message>> {
        let ticket = self.load_ticket(ticket_id).await?;
        authorize(viewer, Action::ViewTicket, Some(&ticket))?;
        Ok(self
            .store
            .list_messages(ticket.id, viewer.role.is_staff())
            .await?)
    }

    pub async fn unread_count(&self, viewer: &AuthUser, ticket_id: Uuid) -> ApiResult<i64> {
        let ticket = self.load_ticket(ticket_id).await?;
        authorize(viewer, Action::ViewTicket, Some(&ticket))?;
        Ok(self.store.count_unread_messages(ticket.id, viewer.user_id).await?)
    }

    async fn send_receipt(&self, message: &Message, reader_id: Uuid) {
        let Some(read_at) = message.read_at else {
            return;
        };
        for conn in self.ws.registry.lookup(&message.author_id).await {
            conn.send(ServerEvent::MessageRead {
                message_id: message.id,
                read_at,
                read_by: reader_id,
            });
        }
    }

    /// Idempotent; only the first effective read produces a receipt
    pub async fn mark_read(&self, reader: &AuthUser, message_id: Uuid) -> ApiResult<Message> {
        let message = self
            .store
            .find_message(message_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Message".into()))?;
        let ticket = self.load_ticket(message.ticket_id).await?;
        authorize(reader, Action::ViewTicket, Some(&ticket))?;
        if message.is_internal && !reader.role.is_staff() {
            return Err(ApiError::NotFound("Message".into()));
        }

        match self
            .store
            .mark_message_read(message.id, reader.user_id, OffsetDateTime::now_utc())
            .await?
        {
            Some(stamped) => {
                tracing::debug!(message_id = %stamped.id, reader_id = %reader.user_id, "Message read");
                self.send_receipt(&stamped, reader.user_id).await;
                Ok(stamped)
            }
            None => Ok(message),
        }
    }

    /// Batch read-marking restricted to the ticket's visible messages;
    /// returns how many were actually stamped.
    pub async fn mark_many_read(&self, reader: &AuthUser, ticket_id: Uuid, ids: &[Uuid]) -> ApiResult<usize> {
        let ticket = self.load_ticket(ticket_id).await?;
        authorize(reader, Action::ViewTicket, Some(&ticket))?;

        let visible: HashSet<Uuid> = self
            .store
            .list_messages(ticket.id, reader.role.is_staff())
            .await?
            .into_iter()
            .map(|m| m.id)
            .collect();
        let ids: Vec<Uuid> = ids.iter().copied().filter(|id| visible.contains(id)).collect();
        if ids.is_empty() {
            return Ok(0);
        }

        let stamped = self
            .store
            .mark_messages_read(&ids, reader.user_id, OffsetDateTime::now_utc())
            .await?;
        for message in &stamped {
            self.send_receipt(message, reader.user_id).await;
        }
        Ok(stamped.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, NewTicket, StatsUpdate, TicketChange};
    use helpdesk_shared::{NotificationType, TicketCategory, TicketPriority, User, UserRole};
    use tokio::sync::mpsc;

    struct Harness {
        pipeline: MessagePipeline,
        store: Arc<dyn TicketStore>,
        ws: WebSocketState,
    }

    fn harness() -> Harness {
        let ws = WebSocketState::new();
        let store: Arc<dyn TicketStore> = Arc::new(MemoryStore::new());
        let notifications = NotificationService::new(Arc::clone(&store), ws.clone());
        Harness {
            pipeline: MessagePipeline::new(Arc::clone(&store), ws.clone(), notifications),
            store,
            ws,
        }
    }

    async fn seed(store: &Arc<dyn TicketStore>, role: UserRole, first_name: &str) -> AuthUser {
        let user = User {
            id: Uuid::new_v4(),
            email: format!("{}@example.com", first_name.to_lowercase()),
            first_name: first_name.into(),
            last_name: "Tester".into(),
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

    async fn ticket(store: &Arc<dyn TicketStore>, client: &AuthUser, operator: Option<&AuthUser>) -> Ticket {
        let id = Uuid::new_v4();
        let ticket = store
            .create_ticket(
                NewTicket {
                    id,
                    title: "Card declined".into(),
                    description: "My card is declined at every shop".into(),
                    category: TicketCategory::Cards,
                    priority: TicketPriority::Medium,
                    client_id: client.user_id,
                    context_data: None,
                    attachment_ids: Vec::new(),
                    created_at: OffsetDateTime::now_utc(),
                },
                NewTicketEvent::new(id, TicketEventType::Created, "Ticket created", client.user_id),
                &[StatsUpdate::ClientTicketOpened {
                    client_id: client.user_id,
                }],
            )
            .await
            .unwrap();
        match operator {
            Some(operator) => {
                let mut change = TicketChange::at(OffsetDateTime::now_utc());
                change.operator_id = Some(operator.user_id);
                store.update_ticket(ticket.id, change, None, &[]).await.unwrap().unwrap()
            }
            None => ticket,
        }
    }

    fn draft(ticket_id: Uuid, content: &str, is_internal: bool) -> SendMessage {
        SendMessage {
            ticket_id,
            content: content.into(),
            attachment_ids: Vec::new(),
            is_internal,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_mentioned_ids() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let content = format!("ping @{} and @{}, again @{} @not-a-uuid", a, b, a);
        assert_eq!(mentioned_ids(&content), vec![a, b]);
        assert!(mentioned_ids("email me at someone@example.com").is_empty());
    }

    #[tokio::test]
    async fn test_send_rejections() {
        let h = harness();
        let client = seed(&h.store, UserRole::Client, "Ann").await;
        let stranger = seed(&h.store, UserRole::Client, "Bob").await;
        let t = ticket(&h.store, &client, None).await;

        assert!(matches!(
            h.pipeline.send(&client, draft(Uuid::new_v4(), "Hello", false)).await,
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            h.pipeline.send(&stranger, draft(t.id, "Hello", false)).await,
            Err(ApiError::Forbidden(_))
        ));
        assert!(matches!(
            h.pipeline.send(&client, draft(t.id, "Secret", true)).await,
            Err(ApiError::Forbidden(_))
        ));
        assert!(matches!(
            h.pipeline.send(&client, draft(t.id, "   ", false)).await,
            Err(ApiError::Validation(_))
        ));
        assert!(h.store.list_messages(t.id, true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_operator_message_reaches_client() {
        let h = harness();
        let client = seed(&h.store, UserRole::Client, "Ann").await;
        let operator = seed(&h.store, UserRole::Operator, "Olga").await;
        let t = ticket(&h.store, &client, Some(&operator)).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = h.ws.connect(client.user_id, client.role, tx).await;
        h.ws.join_ticket(&conn, t.id).await;
        drain(&mut rx);

        let message = h
            .pipeline
            .send(&operator, draft(t.id, "We are looking into it", false))
            .await
            .unwrap();

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::Notification { notification }
                if notification.notification_type == NotificationType::NewMessage
        )));
        assert!(events
            .iter()
            .any(|e| matches!(e, ServerEvent::UnreadCount { count: 1 })));
        assert!(events
            .iter()
            .any(|e| matches!(e, ServerEvent::NewMessage { message: m } if m.id == message.id)));

        assert_eq!(h.pipeline.unread_count(&client, t.id).await.unwrap(), 1);
        let history = h.store.ticket_events(t.id).await.unwrap();
        assert_eq!(history.last().unwrap().event_type, TicketEventType::MessageSent);
    }

    #[tokio::test]
    async fn test_internal_message_is_staff_only() {
        let h = harness();
        let client = seed(&h.store, UserRole::Client, "Ann").await;
        let operator = seed(&h.store, UserRole::Operator, "Olga").await;
        let manager = seed(&h.store, UserRole::Manager, "Max").await;
        let t = ticket(&h.store, &client, Some(&operator)).await;

        let (client_tx, mut client_rx) = mpsc::unbounded_channel();
        let client_conn = h.ws.connect(client.user_id, client.role, client_tx).await;
        h.ws.join_ticket(&client_conn, t.id).await;
        let (manager_tx, mut manager_rx) = mpsc::unbounded_channel();
        let manager_conn = h.ws.connect(manager.user_id, manager.role, manager_tx).await;
        h.ws.join_ticket(&manager_conn, t.id).await;
        drain(&mut client_rx);
        drain(&mut manager_rx);

        let content = format!("@{} @{} check the card limits", manager.user_id, client.user_id);
        h.pipeline.send(&operator, draft(t.id, &content, true)).await.unwrap();

        assert!(drain(&mut client_rx).is_empty());
        let events = drain(&mut manager_rx);
        assert!(events.iter().any(|e| matches!(e, ServerEvent::NewMessage { .. })));
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::Notification { notification }
                if notification.notification_type == NotificationType::Mention
        )));

        assert!(h.pipeline.list(&client, t.id).await.unwrap().is_empty());
        assert_eq!(h.pipeline.list(&operator, t.id).await.unwrap().len(), 1);
        assert_eq!(h.store.count_unread_notifications(client.user_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mention_skips_users_without_ticket_access() {
        let h = harness();
        let owner = seed(&h.store, UserRole::Client, "Ann").await;
        let stranger = seed(&h.store, UserRole::Client, "Bob").await;
        let operator = seed(&h.store, UserRole::Operator, "Olga").await;
        let t = ticket(&h.store, &owner, None).await;

        let content = format!("hey @{} and @{}", stranger.user_id, operator.user_id);
        h.pipeline.send(&owner, draft(t.id, &content, false)).await.unwrap();

        assert_eq!(h.store.count_unread_notifications(stranger.user_id).await.unwrap(), 0);
        assert_eq!(h.store.count_unread_notifications(operator.user_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_mark_read_is_idempotent_with_single_receipt() {
        let h = harness();
        let client = seed(&h.store, UserRole::Client, "Ann").await;
        let operator = seed(&h.store, UserRole::Operator, "Olga").await;
        let t = ticket(&h.store, &client, Some(&operator)).await;
        let message = h
            .pipeline
            .send(&client, draft(t.id, "Still declined", false))
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        h.ws.connect(client.user_id, client.role, tx).await;

        // Authors never mark their own messages
        let own = h.pipeline.mark_read(&client, message.id).await.unwrap();
        assert!(own.read_at.is_none());

        let first = h.pipeline.mark_read(&operator, message.id).await.unwrap();
        let second = h.pipeline.mark_read(&operator, message.id).await.unwrap();
        assert!(first.read_at.is_some());
        assert_eq!(first.read_at, second.read_at);

        let receipts: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, ServerEvent::MessageRead { .. }))
            .collect();
        assert_eq!(receipts.len(), 1);
    }

    #[tokio::test]
    async fn test_mark_many_read_counts_only_effective_reads() {
        let h = harness();
        let client = seed(&h.store, UserRole::Client, "Ann").await;
        let operator = seed(&h.store, UserRole::Operator, "Olga").await;
        let t = ticket(&h.store, &client, Some(&operator)).await;
        let other = ticket(&h.store, &client, Some(&operator)).await;

        let a = h.pipeline.send(&operator, draft(t.id, "First", false)).await.unwrap();
        let b = h.pipeline.send(&operator, draft(t.id, "Second", false)).await.unwrap();
        let own = h.pipeline.send(&client, draft(t.id, "Mine", false)).await.unwrap();
        let elsewhere = h
            .pipeline
            .send(&operator, draft(other.id, "Other ticket", false))
            .await
            .unwrap();

        let ids = [a.id, b.id, own.id, elsewhere.id, Uuid::new_v4()];
        assert_eq!(h.pipeline.mark_many_read(&client, t.id, &ids).await.unwrap(), 2);
        assert_eq!(h.pipeline.mark_many_read(&client, t.id, &ids).await.unwrap(), 0);
        assert_eq!(h.pipeline.unread_count(&client, other.id).await.unwrap(), 1);
    }
}
