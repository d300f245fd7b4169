//! Helpdesk API Library
//!
//! Ticket lifecycle, conversation, notification and real-time services for
//! the helpdesk, plus the HTTP/WebSocket surface that exposes them.

pub mod auth;
pub mod config;
pub mod error;
pub mod messages;
pub mod notifications;
pub mod routes;
pub mod state;
pub mod store;
pub mod tickets;
pub mod websocket;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
