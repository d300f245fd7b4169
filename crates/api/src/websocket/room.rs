//! Room Dispatcher
//!
//! Rooms are a membership relation over connections and nothing more: a
//! room exists while it has members and is dropped with its last one.
//!
//! - `ticket-<id>`: joined explicitly after an access check
//! - `user-<id>`: joined automatically at connect; private notifications

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::connection::Connection;
use super::events::ServerEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomKey {
    Ticket(Uuid),
    User(Uuid),
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomKey::Ticket(id) => write!(f, "ticket-{}", id),
            RoomKey::User(id) => write!(f, "user-{}", id),
        }
    }
}

/// Which members of a room receive a broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Everyone,
    /// Ephemeral events skip the connection that caused them
    ExceptSession(Uuid),
    /// Operator-only content
    StaffOnly,
}

impl Audience {
    fn admits(&self, conn: &Connection) -> bool {
        match self {
            Audience::Everyone => true,
            Audience::ExceptSession(session_id) => conn.session_id != *session_id,
            Audience::StaffOnly => conn.role.is_staff(),
        }
    }
}

#[derive(Default)]
pub struct RoomDispatcher {
    rooms: RwLock<HashMap<RoomKey, Vec<Arc<Connection>>>>,
}

impl RoomDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a room; `false` if it was already a member
    pub async fn join(&self, room: RoomKey, conn: Arc<Connection>) -> bool {
        let mut rooms = self.rooms.write().await;
        let members = rooms.entry(room).or_default();
        if members.iter().any(|c| c.session_id == conn.session_id) {
            return false;
        }
        members.push(Arc::clone(&conn));

        tracing::debug!(
            room = %room,
            session_id = %conn.session_id,
            room_size = members.len(),
            "Connection joined room"
        );
        true
    }

    /// Remove a connection from a room; `false` if it was not a member
    pub async fn leave(&self, room: &RoomKey, session_id: &Uuid) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(members) = rooms.get_mut(room) else {
            return false;
        };
        let before = members.len();
        members.retain(|c| c.session_id != *session_id);
        let removed = members.len() < before;

        if members.is_empty() {
            rooms.remove(room);
            tracing::debug!(room = %room, "Removed empty room");
        } else if removed {
            tracing::debug!(
                room = %room,
                session_id = %session_id,
                room_size = members.len(),
                "Connection left room"
            );
        }
        removed
    }

    /// Remove a connection from every room; returns the rooms it was in
    pub async fn remove_connection(&self, session_id: &Uuid) -> Vec<RoomKey> {
        let mut rooms = self.rooms.write().await;
        let mut removed_from = Vec::new();

        for (room, members) in rooms.iter_mut() {
            let before = members.len();
            members.retain(|c| c.session_id != *session_id);
            if members.len() < before {
                removed_from.push(*room);
            }
        }

        rooms.retain(|_, members| !members.is_empty());

        if !removed_from.is_empty() {
            tracing::debug!(
                session_id = %session_id,
                room_count = removed_from.len(),
                "Removed connection from rooms"
            );
        }
        removed_from
    }

    /// Deliver an event once to each admitted member; returns the number of
    /// connections it was queued on. Closed connections are skipped.
    pub async fn broadcast(&self, room: &RoomKey, event: ServerEvent, audience: Audience) -> usize {
        let rooms = self.rooms.read().await;
        let Some(members) = rooms.get(room) else {
            tracing::debug!(room = %room, event = event.name(), "No members in room");
            return 0;
        };

        let mut delivered = 0;
        let mut failed = 0;
        for conn in members.iter().filter(|c| audience.admits(c)) {
            if conn.send(event.clone()) {
                delivered += 1;
            } else {
                failed += 1;
                tracing::warn!(
                    session_id = %conn.session_id,
                    "Failed to send event to connection (likely closed)"
                );
            }
        }

        tracing::debug!(
            room = %room,
            event = event.name(),
            recipients = delivered,
            failed = failed,
            "Broadcast event to room"
        );
        delivered
    }

    pub async fn is_member(&self, room: &RoomKey, session_id: &Uuid) -> bool {
        let rooms = self.rooms.read().await;
        rooms
            .get(room)
            .is_some_and(|members| members.iter().any(|c| c.session_id == *session_id))
    }

    pub async fn room_size(&self, room: &RoomKey) -> usize {
        let rooms = self.rooms.read().await;
        rooms.get(room).map(Vec::len).unwrap_or(0)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}
