//! Domain model shared across the helpdesk platform

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Closed Enums
// =============================================================================

/// Raised when a stored or submitted string does not name a known variant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Declares a closed enum that travels as a fixed string on the wire and in
/// the database.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $text)] $variant, )+
        }

        impl $name {
            /// Every variant, in declaration order
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $text, )+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $text => Ok($name::$variant), )+
                    other => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

string_enum! {
    /// Platform role carried in the access token
    pub enum UserRole {
        Client => "CLIENT",
        Operator => "OPERATOR",
        Specialist => "SPECIALIST",
        Manager => "MANAGER",
        Admin => "ADMIN",
    }
}

impl UserRole {
    pub fn is_client(&self) -> bool {
        matches!(self, Self::Client)
    }

    /// Roles that can own work on a ticket
    pub fn is_operator_class(&self) -> bool {
        matches!(self, Self::Operator | Self::Specialist | Self::Manager)
    }

    /// Any non-client role
    pub fn is_staff(&self) -> bool {
        !self.is_client()
    }

    /// Roles allowed into any ticket room regardless of assignment
    pub fn is_elevated(&self) -> bool {
        matches!(self, Self::Specialist | Self::Manager | Self::Admin)
    }
}

string_enum! {
    /// Ticket lifecycle status
    ///
    /// Declaration order is lifecycle order: NEW → IN_PROGRESS → WAITING →
    /// RESOLVED → CLOSED.
    pub enum TicketStatus {
        New => "NEW",
        InProgress => "IN_PROGRESS",
        Waiting => "WAITING",
        Resolved => "RESOLVED",
        Closed => "CLOSED",
    }
}

impl TicketStatus {
    /// Position in the lifecycle
    pub fn rank(&self) -> u8 {
        match self {
            Self::New => 0,
            Self::InProgress => 1,
            Self::Waiting => 2,
            Self::Resolved => 3,
            Self::Closed => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// A ticket in one of these states can be rated by its client
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Resolved | Self::Closed)
    }

    /// Statuses that count toward an operator's active workload
    pub fn is_active(&self) -> bool {
        matches!(self, Self::New | Self::InProgress | Self::Waiting)
    }
}

string_enum! {
    pub enum TicketPriority {
        Low => "LOW",
        Medium => "MEDIUM",
        High => "HIGH",
        Critical => "CRITICAL",
    }
}

impl TicketPriority {
    pub fn rank(&self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }
}

string_enum! {
    pub enum TicketCategory {
        Cards => "CARDS",
        Deposits => "DEPOSITS",
        Loans => "LOANS",
        MobileApp => "MOBILE_APP",
        Payments => "PAYMENTS",
        Security => "SECURITY",
        Other => "OTHER",
    }
}

string_enum! {
    pub enum NotificationType {
        TicketCreated => "TICKET_CREATED",
        TicketAssigned => "TICKET_ASSIGNED",
        TicketUpdated => "TICKET_UPDATED",
        TicketResolved => "TICKET_RESOLVED",
        NewMessage => "NEW_MESSAGE",
        Mention => "MENTION",
    }
}

string_enum! {
    /// Audit log entry kind
    pub enum TicketEventType {
        Created => "CREATED",
        Assigned => "ASSIGNED",
        StatusChanged => "STATUS_CHANGED",
        PriorityChanged => "PRIORITY_CHANGED",
        Escalated => "ESCALATED",
        MessageSent => "MESSAGE_SENT",
        NoteAdded => "NOTE_ADDED",
    }
}

string_enum! {
    /// Kind of entity a notification points at
    pub enum EntityKind {
        Ticket => "ticket",
        Message => "message",
    }
}

// =============================================================================
// Users
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: UserRole,
    pub is_active: bool,
}

impl User {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// Running performance figures for an operator-class user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorStats {
    pub user_id: Uuid,
    pub total_resolved: i32,
    /// Whole minutes, floored
    pub average_resolution_time: i32,
    pub total_ratings: i32,
    pub average_rating: f64,
}

impl OperatorStats {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            ..Self::default()
        }
    }

    /// Fold one resolution sample (minutes) into the floored running average
    pub fn record_resolution(&mut self, minutes: i32) {
        let total = i64::from(self.average_resolution_time) * i64::from(self.total_resolved)
            + i64::from(minutes);
        let count = i64::from(self.total_resolved) + 1;
        self.average_resolution_time = total.div_euclid(count) as i32;
        self.total_resolved += 1;
    }

    /// Fold one client rating into the running mean
    pub fn record_rating(&mut self, rating: i16) {
        let count = f64::from(self.total_ratings);
        self.average_rating = (self.average_rating * count + f64::from(rating)) / (count + 1.0);
        self.total_ratings += 1;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientProfile {
    pub user_id: Uuid,
    pub total_tickets: i32,
    pub resolved_tickets: i32,
}

// =============================================================================
// Tickets
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: Uuid,
    /// Human-readable sequence number, e.g. `TKT-000042`
    pub number: String,
    pub title: String,
    pub description: String,
    pub category: TicketCategory,
    pub status: TicketStatus,
    pub priority: TicketPriority,
    pub client_id: Uuid,
    pub operator_id: Option<Uuid>,
    pub context_data: Option<serde_json::Value>,
    #[serde(default)]
    pub attachment_ids: Vec<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub assigned_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub resolved_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub closed_at: Option<OffsetDateTime>,
}

impl Ticket {
    /// Formats a sequence value as a ticket number
    pub fn format_number(sequence: i64) -> String {
        format!("TKT-{:06}", sequence)
    }

    /// The other party of a conversation on this ticket
    ///
    /// The client's counterpart is the current operator (if any); anyone
    /// else's counterpart is the client.
    pub fn counterpart_of(&self, author_id: Uuid) -> Option<Uuid> {
        if author_id == self.client_id {
            self.operator_id
        } else {
            Some(self.client_id)
        }
    }
}

/// Ticket row as shown in lists, with the viewer's unread count
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketSummary {
    #[serde(flatten)]
    pub ticket: Ticket,
    pub unread_count: i64,
}

/// Append-only audit log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketEvent {
    pub id: Uuid,
    pub ticket_id: Uuid,
    #[serde(rename = "type")]
    pub event_type: TicketEventType,
    pub description: String,
    pub user_id: Uuid,
    pub metadata: Option<serde_json::Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketRating {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub client_id: Uuid,
    pub rating: i16,
    pub feedback: Option<String>,
    pub liked_speed: bool,
    pub liked_clarity: bool,
    pub liked_politeness: bool,
    pub liked_completeness: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Operator-only note attached to a ticket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalNote {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

// =============================================================================
// Messages & Notifications
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    pub is_internal: bool,
    #[serde(default)]
    pub attachment_ids: Vec<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub read_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub entity_id: Option<Uuid>,
    pub entity_type: Option<EntityKind>,
    pub is_read: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub read_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_round_trips_through_str() {
        for status in TicketStatus::ALL {
            assert_eq!(status.as_str().parse::<TicketStatus>().unwrap(), *status);
        }
        assert_eq!(
            "MOBILE_APP".parse::<TicketCategory>().unwrap(),
            TicketCategory::MobileApp
        );
        let err = "REOPENED".parse::<TicketStatus>().unwrap_err();
        assert_eq!(err.kind, "TicketStatus");
    }

    #[test]
    fn test_enum_serializes_as_wire_string() {
        let json = serde_json::to_string(&TicketStatus::InProgress).unwrap();
        assert_eq!(json, r#""IN_PROGRESS""#);
        let kind: EntityKind = serde_json::from_str(r#""ticket""#).unwrap();
        assert_eq!(kind, EntityKind::Ticket);
    }

    #[test]
    fn test_role_classes() {
        assert!(UserRole::Manager.is_operator_class());
        assert!(!UserRole::Admin.is_operator_class());
        assert!(UserRole::Admin.is_staff());
        assert!(!UserRole::Operator.is_elevated());
        assert!(UserRole::Specialist.is_elevated());
    }

    #[test]
    fn test_resolution_average_is_floored_running_mean() {
        let mut stats = OperatorStats::new(Uuid::new_v4());
        let mut seen = Vec::new();
        for sample in [10, 20, 30] {
            stats.record_resolution(sample);
            seen.push(stats.average_resolution_time);
        }
        assert_eq!(seen, vec![10, 15, 20]);
        assert_eq!(stats.total_resolved, 3);

        stats.record_resolution(1);
        // (20 * 3 + 1) / 4 = 15.25
        assert_eq!(stats.average_resolution_time, 15);
    }

    #[test]
    fn test_rating_average_is_plain_mean() {
        let mut stats = OperatorStats::new(Uuid::new_v4());
        stats.record_rating(5);
        stats.record_rating(4);
        assert_eq!(stats.total_ratings, 2);
        assert!((stats.average_rating - 4.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_ticket_number_is_zero_padded() {
        assert_eq!(Ticket::format_number(1), "TKT-000001");
        assert_eq!(Ticket::format_number(1234567), "TKT-1234567");
    }
}
