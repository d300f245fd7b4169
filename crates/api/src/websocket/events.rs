//! WebSocket event types and serialization
//!
//! Every frame is a JSON object tagged by `type` (kebab-case event name) with
//! camelCase payload fields.

use helpdesk_shared::{Message, Notification, TicketPriority, TicketStatus};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Client-to-Server Events
// =============================================================================

/// Events sent from client to server
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    JoinTicket { ticket_id: Uuid },

    #[serde(rename_all = "camelCase")]
    LeaveTicket { ticket_id: Uuid },

    #[serde(rename_all = "camelCase")]
    Typing { ticket_id: Uuid, is_typing: bool },

    #[serde(rename_all = "camelCase")]
    SendMessage {
        ticket_id: Uuid,
        message: MessageDraft,
        /// Client-side correlation id echoed in `message-sent`
        #[serde(default)]
        temp_id: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    MarkAsRead { message_id: Uuid },

    /// Re-join the caller's own user channel
    Subscribe,

    GetUnreadCount,

    /// Heartbeat
    Ping,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDraft {
    pub content: String,
    #[serde(default)]
    pub attachment_ids: Vec<Uuid>,
    #[serde(default)]
    pub is_internal: bool,
}

// =============================================================================
// Server-to-Client Events
// =============================================================================

/// Events sent from server to client
#[derive(Debug, Serialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    Connected {
        user_id: Uuid,
        session_id: Uuid,
        unread_count: i64,
    },

    #[serde(rename_all = "camelCase")]
    JoinedTicket { ticket_id: Uuid },

    #[serde(rename_all = "camelCase")]
    LeftTicket { ticket_id: Uuid },

    #[serde(rename_all = "camelCase")]
    UserJoined { user_id: Uuid, ticket_id: Uuid },

    #[serde(rename_all = "camelCase")]
    UserLeft { user_id: Uuid, ticket_id: Uuid },

    #[serde(rename_all = "camelCase")]
    UserTyping {
        user_id: Uuid,
        ticket_id: Uuid,
        is_typing: bool,
    },

    NewMessage { message: Message },

    /// Acknowledgement to the sending connection
    #[serde(rename_all = "camelCase")]
    MessageSent {
        temp_id: Option<String>,
        message: Message,
    },

    /// Read receipt delivered to the message author
    #[serde(rename_all = "camelCase")]
    MessageRead {
        message_id: Uuid,
        #[serde(with = "time::serde::rfc3339")]
        read_at: OffsetDateTime,
        read_by: Uuid,
    },

    Notification { notification: Notification },

    UnreadCount { count: i64 },

    /// Ticket status/priority/assignment changed
    #[serde(rename_all = "camelCase")]
    TicketUpdated {
        ticket_id: Uuid,
        status: TicketStatus,
        priority: TicketPriority,
        operator_id: Option<Uuid>,
    },

    #[serde(rename_all = "camelCase")]
    Subscribed { user_id: Uuid },

    Pong,

    Error { code: String, message: String },
}

impl ServerEvent {
    /// Event name as it appears in the `type` tag
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::JoinedTicket { .. } => "joined-ticket",
            ServerEvent::LeftTicket { .. } => "left-ticket",
            ServerEvent::UserJoined { .. } => "user-joined",
            ServerEvent::UserLeft { .. } => "user-left",
            ServerEvent::UserTyping { .. } => "user-typing",
            ServerEvent::NewMessage { .. } => "new-message",
            ServerEvent::MessageSent { .. } => "message-sent",
            ServerEvent::MessageRead { .. } => "message-read",
            ServerEvent::Notification { .. } => "notification",
            ServerEvent::UnreadCount { .. } => "unread-count",
            ServerEvent::TicketUpdated { .. } => "ticket-updated",
            ServerEvent::Subscribed { .. } => "subscribed",
            ServerEvent::Pong => "pong",
            ServerEvent::Error { .. } => "error",
        }
    }

    pub fn error(err: &crate::error::ApiError) -> Self {
        ServerEvent::Error {
            code: err.code().to_string(),
            message: err.public_message(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_event_parsing() {
        let ticket_id = Uuid::new_v4();
        let event: ClientEvent = serde_json::from_value(json!({
            "type": "typing",
            "ticketId": ticket_id,
            "isTyping": true,
        }))
        .unwrap();
        assert!(matches!(event, ClientEvent::Typing { is_typing: true, .. }));

        let event: ClientEvent = serde_json::from_value(json!({
            "type": "send-message",
            "ticketId": ticket_id,
            "message": { "content": "hello" },
        }))
        .unwrap();
        match event {
            ClientEvent::SendMessage { message, temp_id, .. } => {
                assert_eq!(message.content, "hello");
                assert!(!message.is_internal);
                assert!(message.attachment_ids.is_empty());
                assert!(temp_id.is_none());
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let event: ClientEvent = serde_json::from_str(r#"{"type":"get-unread-count"}"#).unwrap();
        assert!(matches!(event, ClientEvent::GetUnreadCount));
    }

    #[test]
    fn test_server_event_wire_shape() {
        let user_id = Uuid::new_v4();
        let ticket_id = Uuid::new_v4();
        let value = serde_json::to_value(ServerEvent::UserJoined { user_id, ticket_id }).unwrap();
        assert_eq!(value["type"], "user-joined");
        assert_eq!(value["userId"], json!(user_id));
        assert_eq!(value["ticketId"], json!(ticket_id));

        let value = serde_json::to_value(ServerEvent::UnreadCount { count: 3 }).unwrap();
        assert_eq!(value, json!({"type": "unread-count", "count": 3}));
    }

    #[test]
    fn test_name_matches_tag() {
        let events = [
            ServerEvent::Pong,
            ServerEvent::Subscribed { user_id: Uuid::new_v4() },
            ServerEvent::JoinedTicket { ticket_id: Uuid::new_v4() },
            ServerEvent::Error {
                code: "FORBIDDEN".into(),
                message: "no".into(),
            },
        ];
        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["type"], event.name());
        }
    }
}
