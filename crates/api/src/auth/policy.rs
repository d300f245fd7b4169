//! Capability checks
//!
//! Every operation asks [`authorize`] once, with the acting user and (where
//! one is involved) the ticket it touches.

use helpdesk_shared::{Ticket, UserRole};
use uuid::Uuid;

use super::AuthUser;
use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Read ticket detail, history, messages
    ViewTicket,
    /// Subscribe to a ticket's live room
    JoinTicketRoom,
    /// Change title/description/category/context
    EditTicket,
    /// Assign, change status or priority, add notes, see suggestions
    ManageTicket,
    Escalate,
    Rate,
    PostMessage,
    /// Author or read operator-only content
    InternalContent,
    ViewQueue,
    ViewOwnWorkload,
}

impl Action {
    fn describe(&self) -> &'static str {
        match self {
            Action::ViewTicket => "view this ticket",
            Action::JoinTicketRoom => "join this ticket room",
            Action::EditTicket => "edit this ticket",
            Action::ManageTicket => "manage tickets",
            Action::Escalate => "escalate tickets",
            Action::Rate => "rate this ticket",
            Action::PostMessage => "post to this ticket",
            Action::InternalContent => "access internal notes",
            Action::ViewQueue => "view the ticket queue",
            Action::ViewOwnWorkload => "view an operator workload",
        }
    }
}

fn owns(actor: Uuid, ticket: Option<&Ticket>) -> bool {
    ticket.is_some_and(|t| t.client_id == actor)
}

fn assigned(actor: Uuid, ticket: Option<&Ticket>) -> bool {
    ticket.is_some_and(|t| t.operator_id == Some(actor))
}

pub fn is_allowed(actor: &AuthUser, action: Action, ticket: Option<&Ticket>) -> bool {
    let role = actor.role;
    match action {
        Action::ViewTicket | Action::EditTicket | Action::PostMessage => {
            role.is_staff() || owns(actor.user_id, ticket)
        }
        Action::JoinTicketRoom => {
            role.is_elevated() || owns(actor.user_id, ticket) || assigned(actor.user_id, ticket)
        }
        Action::ManageTicket | Action::InternalContent | Action::ViewQueue => role.is_staff(),
        Action::Escalate => matches!(
            role,
            UserRole::Operator | UserRole::Manager | UserRole::Admin
        ),
        Action::Rate => role.is_client() && owns(actor.user_id, ticket),
        Action::ViewOwnWorkload => role.is_operator_class(),
    }
}

/// `Forbidden` unless [`is_allowed`]
pub fn authorize(actor: &AuthUser, action: Action, ticket: Option<&Ticket>) -> Result<(), ApiError> {
    if is_allowed(actor, action, ticket) {
        Ok(())
    } else {
        tracing::debug!(
            user_id = %actor.user_id,
            role = %actor.role,
            action = ?action,
            "Authorization denied"
        );
        Err(ApiError::Forbidden(format!(
            "Not allowed to {}",
            action.describe()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helpdesk_shared::{TicketCategory, TicketPriority, TicketStatus};
    use time::OffsetDateTime;

    fn actor(role: UserRole) -> AuthUser {
        AuthUser {
            user_id: Uuid::new_v4(),
            role,
            email: "someone@example.com".into(),
        }
    }

    fn ticket(client_id: Uuid, operator_id: Option<Uuid>) -> Ticket {
        let now = OffsetDateTime::now_utc();
        Ticket {
            id: Uuid::new_v4(),
            number: Ticket::format_number(1),
            title: "Login".into(),
            description: "Cannot log in".into(),
            category: TicketCategory::MobileApp,
            status: TicketStatus::New,
            priority: TicketPriority::Medium,
            client_id,
            operator_id,
            context_data: None,
            attachment_ids: Vec::new(),
            created_at: now,
            updated_at: now,
            assigned_at: None,
            resolved_at: None,
            closed_at: None,
        }
    }

    #[test]
    fn test_room_join_rules() {
        let client = actor(UserRole::Client);
        let stranger = actor(UserRole::Client);
        let operator = actor(UserRole::Operator);
        let other_operator = actor(UserRole::Operator);
        let manager = actor(UserRole::Manager);
        let t = ticket(client.user_id, Some(operator.user_id));

        assert!(is_allowed(&client, Action::JoinTicketRoom, Some(&t)));
        assert!(!is_allowed(&stranger, Action::JoinTicketRoom, Some(&t)));
        assert!(is_allowed(&operator, Action::JoinTicketRoom, Some(&t)));
        assert!(!is_allowed(&other_operator, Action::JoinTicketRoom, Some(&t)));
        assert!(is_allowed(&manager, Action::JoinTicketRoom, Some(&t)));
    }

    #[test]
    fn test_clients_cannot_touch_internal_content() {
        let client = actor(UserRole::Client);
        let t = ticket(client.user_id, None);
        assert!(is_allowed(&client, Action::PostMessage, Some(&t)));
        assert!(!is_allowed(&client, Action::InternalContent, Some(&t)));
        assert!(authorize(&client, Action::ManageTicket, Some(&t)).is_err());
    }

    #[test]
    fn test_only_owner_rates() {
        let client = actor(UserRole::Client);
        let t = ticket(client.user_id, None);
        assert!(is_allowed(&client, Action::Rate, Some(&t)));
        assert!(!is_allowed(&actor(UserRole::Client), Action::Rate, Some(&t)));
        assert!(!is_allowed(&actor(UserRole::Admin), Action::Rate, Some(&t)));
    }

    #[test]
    fn test_escalation_roles() {
        assert!(is_allowed(&actor(UserRole::Operator), Action::Escalate, None));
        assert!(is_allowed(&actor(UserRole::Admin), Action::Escalate, None));
        assert!(!is_allowed(&actor(UserRole::Client), Action::Escalate, None));
        assert!(!is_allowed(&actor(UserRole::Specialist), Action::Escalate, None));
    }
}
