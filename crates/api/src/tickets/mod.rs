//! Ticket Lifecycle Engine
//!
//! Validates and applies ticket transitions. Each transition is written to
//! the store together with its audit event and stats, and only then are
//! notifications sent and `ticket-updated` broadcast to the ticket room.

mod lifecycle;
pub mod priority;
pub mod sla;

pub use lifecycle::{CreateTicket, RateTicket, TicketDetail, TicketService, UpdateTicket};
pub use priority::PriorityRule;
pub use sla::{SlaReport, SLA_THRESHOLD_MINUTES};
