//! SLA accounting
//!
//! Derived on read from the ticket's timestamps; nothing is stored.

use helpdesk_shared::Ticket;
use serde::Serialize;

pub const SLA_THRESHOLD_MINUTES: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlaReport {
    pub threshold_minutes: i64,
    /// Whole minutes from creation to resolution; `None` while unresolved
    pub resolution_minutes: Option<i64>,
    pub violated: bool,
    pub violation_minutes: i64,
}

/// Whole minutes (floored) between creation and the latest resolution
pub fn resolution_minutes(ticket: &Ticket) -> Option<i64> {
    ticket
        .resolved_at
        .map(|resolved| (resolved - ticket.created_at).whole_minutes().max(0))
}

impl SlaReport {
    pub fn for_ticket(ticket: &Ticket) -> Self {
        let minutes = resolution_minutes(ticket);
        let violation_minutes = minutes
            .map(|m| (m - SLA_THRESHOLD_MINUTES).max(0))
            .unwrap_or(0);
        Self {
            threshold_minutes: SLA_THRESHOLD_MINUTES,
            resolution_minutes: minutes,
            violated: violation_minutes > 0,
            violation_minutes,
        }
    }
}
