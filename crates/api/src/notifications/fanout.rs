use helpdesk_shared::{
    EntityKind, Message, Notification, NotificationType, Paginated, Ticket, TicketStatus, User,
};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::store::{NewNotification, NotificationQuery, TicketStore};
use crate::websocket::{events::ServerEvent, WebSocketState};

#[derive(Clone)]
pub struct NotificationService {
    store: Arc<dyn TicketStore>,
    ws: WebSocketState,
}

impl NotificationService {
    pub fn new(store: Arc<dyn TicketStore>, ws: WebSocketState) -> Self {
        Self { store, ws }
    }

    /// Persist a notification, then push it and the new unread count to the
    /// recipient's live connections.
    pub async fn notify(
        &self,
        recipient_id: Uuid,
        notification_type: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
        entity: Option<(EntityKind, Uuid)>,
    ) -> ApiResult<Notification> {
        let notification = self
            .store
            .insert_notification(NewNotification {
                user_id: recipient_id,
                notification_type,
                title: title.into(),
                message: message.into(),
                entity,
            })
            .await?;

        tracing::debug!(
            user_id = %recipient_id,
            notification_id = %notification.id,
            notification_type = %notification_type,
            "Notification created"
        );

        self.ws
            .send_to_user(
                recipient_id,
                ServerEvent::Notification {
                    notification: notification.clone(),
                },
            )
            .await;
        self.push_unread_count(recipient_id).await?;

        Ok(notification)
    }

    pub async fn unread_count(&self, user_id: Uuid) -> ApiResult<i64> {
        Ok(self.store.count_unread_notifications(user_id).await?)
    }

    async fn push_unread_count(&self, user_id: Uuid) -> ApiResult<i64> {
        let count = self.unread_count(user_id).await?;
        self.ws
            .send_to_user(user_id, ServerEvent::UnreadCount { count })
            .await;
        Ok(count)
    }

    // -- Owner-scoped reads and mutations ------------------------------------

    pub async fn list(
        &self,
        user_id: Uuid,
        query: NotificationQuery,
    ) -> ApiResult<Paginated<Notification>> {
        let (items, total) = self.store.list_notifications(user_id, &query).await?;
        Ok(Paginated::new(items, total, query.page))
    }

    /// Mark one notification read; already-read is not an error
    pub async fn mark_read(&self, user_id: Uuid, id: Uuid) -> ApiResult<Notification> {
        let notification = self
            .store
            .mark_notification_read(id, user_id, OffsetDateTime::now_utc())
            .await?
            .ok_or_else(|| ApiError::NotFound("Notification".into()))?;
        self.push_unread_count(user_id).await?;
        Ok(notification)
    }

    pub async fn mark_many_read(&self, user_id: Uuid, ids: &[Uuid]) -> ApiResult<u64> {
        let updated = self
            .store
            .mark_notifications_read(ids, user_id, OffsetDateTime::now_utc())
            .await?;
        if updated > 0 {
            self.push_unread_count(user_id).await?;
        }
        Ok(updated)
    }

    pub async fn mark_all_read(&self, user_id: Uuid) -> ApiResult<u64> {
        let updated = self
            .store
            .mark_all_notifications_read(user_id, OffsetDateTime::now_utc())
            .await?;
        if updated > 0 {
            self.push_unread_count(user_id).await?;
        }
        Ok(updated)
    }

    pub async fn delete(&self, user_id: Uuid, id: Uuid) -> ApiResult<()> {
        if !self.store.delete_notification(id, user_id).await? {
            return Err(ApiError::NotFound("Notification".into()));
        }
        self.push_unread_count(user_id).await?;
        Ok(())
    }

    pub async fn delete_all(&self, user_id: Uuid) -> ApiResult<u64> {
        let deleted = self.store.delete_all_notifications(user_id).await?;
        self.push_unread_count(user_id).await?;
        Ok(deleted)
    }

    // -- Lifecycle triggers --------------------------------------------------
    //
    // Triggers run after the transition they describe has been committed, so
    // a failure here is logged rather than reported to the caller.

    fn log_failure(trigger: &'static str, ticket: &Ticket, err: &ApiError) {
        tracing::warn!(
            ticket_id = %ticket.id,
            trigger,
            error = %err,
            "Failed to deliver notification"
        );
    }

    /// Fan out to every active operator-class user
    pub async fn ticket_created(&self, ticket: &Ticket) {
        let staff = match self.store.list_active_operator_class().await {
            Ok(staff) => staff,
            Err(e) => {
                Self::log_failure("ticket_created", ticket, &e.into());
                return;
            }
        };
        for user in staff {
            if let Err(e) = self
                .notify(
                    user.id,
                    NotificationType::TicketCreated,
                    "New ticket",
                    format!("Ticket {} created: {}", ticket.number, ticket.title),
                    Some((EntityKind::Ticket, ticket.id)),
                )
                .await
            {
                Self::log_failure("ticket_created", ticket, &e);
            }
        }
    }

    pub async fn ticket_assigned(&self, ticket: &Ticket, operator_id: Uuid) {
        if let Err(e) = self
            .notify(
                operator_id,
                NotificationType::TicketAssigned,
                "Ticket assigned to you",
                format!("You have been assigned ticket {}: {}", ticket.number, ticket.title),
                Some((EntityKind::Ticket, ticket.id)),
            )
            .await
        {
            Self::log_failure("ticket_assigned", ticket, &e);
        }
    }

    /// Tell the client; resolution prompts for a rating
    pub async fn status_changed(&self, ticket: &Ticket, old_status: TicketStatus) {
        let result = if ticket.status == TicketStatus::Resolved {
            self.notify(
                ticket.client_id,
                NotificationType::TicketResolved,
                "Ticket resolved",
                format!(
                    "Your ticket {} has been resolved. Please rate the support you received",
                    ticket.number
                ),
                Some((EntityKind::Ticket, ticket.id)),
            )
            .await
        } else {
            self.notify(
                ticket.client_id,
                NotificationType::TicketUpdated,
                "Ticket status changed",
                format!(
                    "Ticket {} status changed: {} → {}",
                    ticket.number, old_status, ticket.status
                ),
                Some((EntityKind::Ticket, ticket.id)),
            )
            .await
        };
        if let Err(e) = result {
            Self::log_failure("status_changed", ticket, &e);
        }
    }

    pub async fn escalated(&self, ticket: &Ticket, specialist_id: Uuid, reason: &str, notify_client: bool) {
        if let Err(e) = self
            .notify(
                specialist_id,
                NotificationType::TicketAssigned,
                "Ticket escalated to you",
                format!("Ticket {} was handed over to you. Reason: {}", ticket.number, reason),
                Some((EntityKind::Ticket, ticket.id)),
            )
            .await
        {
            Self::log_failure("escalated", ticket, &e);
        }

        if notify_client {
            if let Err(e) = self
                .notify(
                    ticket.client_id,
                    NotificationType::TicketUpdated,
                    "Ticket escalated",
                    format!("Ticket {} was passed to a specialist", ticket.number),
                    Some((EntityKind::Ticket, ticket.id)),
                )
                .await
            {
                Self::log_failure("escalated", ticket, &e);
            }
        }
    }

    pub async fn new_message(&self, ticket: &Ticket, recipient_id: Uuid, author: &str, message: &Message) {
        if let Err(e) = self
            .notify(
                recipient_id,
                NotificationType::NewMessage,
                "New message",
                format!("{} sent a message on ticket {}", author, ticket.number),
                Some((EntityKind::Message, message.id)),
            )
            .await
        {
            Self::log_failure("new_message", ticket, &e);
        }
    }

    pub async fn mention(&self, ticket: &Ticket, mentioned: &User, author: &str, message: &Message) {
        if let Err(e) = self
            .notify(
                mentioned.id,
                NotificationType::Mention,
                "You were mentioned",
                format!("{} mentioned you on ticket {}", author, ticket.number),
                Some((EntityKind::Message, message.id)),
            )
            .await
        {
            Self::log_failure("mention", ticket, &e);
        }
    }
}
