//! WebSocket connection handle
//!
//! A connection is an authenticated transport session. Events are queued on
//! an unbounded channel drained by the socket's writer task, so delivery
//! order per connection is the order events were issued.

use helpdesk_shared::UserRole;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::events::ServerEvent;

#[derive(Debug)]
pub struct Connection {
    /// Unique session ID for this connection
    pub session_id: Uuid,

    /// Authenticated user ID
    pub user_id: Uuid,

    pub role: UserRole,

    sender: mpsc::UnboundedSender<ServerEvent>,

    /// Set at teardown; nothing is routed to a closed connection
    closed: AtomicBool,
}

impl Connection {
    pub fn new(user_id: Uuid, role: UserRole, sender: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            user_id,
            role,
            sender,
            closed: AtomicBool::new(false),
        }
    }

    /// Queue an event; `false` if the connection is closed or its writer is gone
    pub fn send(&self, event: ServerEvent) -> bool {
        if self.is_closed() {
            return false;
        }
        self.sender.send(event).is_ok()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
