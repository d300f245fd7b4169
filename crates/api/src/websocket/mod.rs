//! Real-time layer
//!
//! - **Connection**: an authenticated session and its outbound queue
//! - **Registry**: user ↔ session index
//! - **Room**: ticket and user rooms with audience-filtered broadcast
//! - **State**: registry and rooms kept in step across connect/teardown
//! - **Handler**: Axum WebSocket route and client event routing
//! - **Events**: wire format for client/server frames

pub mod connection;
pub mod events;
pub mod handler;
pub mod registry;
pub mod room;
pub mod state;

pub use handler::ws_handler;
pub use state::{WebSocketState, WebSocketStats};
