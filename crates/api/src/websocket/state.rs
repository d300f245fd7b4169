//! Shared real-time state
//!
//! Ties the Connection Registry to the Room Dispatcher so that connect and
//! teardown keep both in step.

use helpdesk_shared::UserRole;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::connection::Connection;
use super::events::ServerEvent;
use super::registry::ConnectionRegistry;
use super::room::{Audience, RoomDispatcher, RoomKey};

#[derive(Clone, Default)]
pub struct WebSocketState {
    pub registry: Arc<ConnectionRegistry>,
    pub rooms: Arc<RoomDispatcher>,
}

impl WebSocketState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an authenticated session and join its user channel
    pub async fn connect(
        &self,
        user_id: Uuid,
        role: UserRole,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) -> Arc<Connection> {
        let conn = self
            .registry
            .register(Connection::new(user_id, role, sender))
            .await;
        self.rooms.join(RoomKey::User(user_id), Arc::clone(&conn)).await;
        conn
    }

    /// Tear a session down. The connection stops receiving before it leaves
    /// the registry and its rooms; remaining ticket-room members then see
    /// `user-left`. Repeated calls are no-ops.
    pub async fn disconnect(&self, session_id: &Uuid) {
        let Some(conn) = self.registry.unregister(session_id).await else {
            return;
        };

        for room in self.rooms.remove_connection(session_id).await {
            if let RoomKey::Ticket(ticket_id) = room {
                self.rooms
                    .broadcast(
                        &room,
                        ServerEvent::UserLeft {
                            user_id: conn.user_id,
                            ticket_id,
                        },
                        Audience::Everyone,
                    )
                    .await;
            }
        }
    }

    /// Add a connection to a ticket room. Access must already be checked.
    pub async fn join_ticket(&self, conn: &Arc<Connection>, ticket_id: Uuid) {
        let room = RoomKey::Ticket(ticket_id);
        if self.rooms.join(room, Arc::clone(conn)).await {
            self.rooms
                .broadcast(
                    &room,
                    ServerEvent::UserJoined {
                        user_id: conn.user_id,
                        ticket_id,
                    },
                    Audience::ExceptSession(conn.session_id),
                )
                .await;
        }
        conn.send(ServerEvent::JoinedTicket { ticket_id });
    }

    pub async fn leave_ticket(&self, conn: &Arc<Connection>, ticket_id: Uuid) {
        let room = RoomKey::Ticket(ticket_id);
        if self.rooms.leave(&room, &conn.session_id).await {
            self.rooms
                .broadcast(
                    &room,
                    ServerEvent::UserLeft {
                        user_id: conn.user_id,
                        ticket_id,
                    },
                    Audience::Everyone,
                )
                .await;
        }
        conn.send(ServerEvent::LeftTicket { ticket_id });
    }

    /// Re-join the caller's user channel (no-op if already a member)
    pub async fn subscribe_user(&self, conn: &Arc<Connection>) {
        self.rooms
            .join(RoomKey::User(conn.user_id), Arc::clone(conn))
            .await;
        conn.send(ServerEvent::Subscribed {
            user_id: conn.user_id,
        });
    }

    pub async fn broadcast_ticket(&self, ticket_id: Uuid, event: ServerEvent, audience: Audience) -> usize {
        self.rooms
            .broadcast(&RoomKey::Ticket(ticket_id), event, audience)
            .await
    }

    /// Deliver to every device of a user via their channel
    pub async fn send_to_user(&self, user_id: Uuid, event: ServerEvent) -> usize {
        self.rooms
            .broadcast(&RoomKey::User(user_id), event, Audience::Everyone)
            .await
    }

    pub async fn stats(&self) -> WebSocketStats {
        WebSocketStats {
            active_connections: self.registry.connection_count().await,
            online_users: self.registry.online_user_count().await,
            active_rooms: self.rooms.room_count().await,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WebSocketStats {
    pub active_connections: usize,
    pub online_users: usize,
    pub active_rooms: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_connect_joins_user_channel() {
        let state = WebSocketState::new();
        let user_id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = state.connect(user_id, UserRole::Client, tx).await;

        assert!(state.rooms.is_member(&RoomKey::User(user_id), &conn.session_id).await);
        assert_eq!(state.send_to_user(user_id, ServerEvent::Pong).await, 1);
        assert!(matches!(rx.try_recv(), Ok(ServerEvent::Pong)));

        let stats = state.stats().await;
        assert_eq!(stats.active_connections, 1);
        assert_eq!(stats.online_users, 1);
        assert_eq!(stats.active_rooms, 1);
    }

    #[tokio::test]
    async fn test_join_notifies_existing_members_only() {
        let state = WebSocketState::new();
        let ticket_id = Uuid::new_v4();
        let (tx_client, mut rx_client) = mpsc::unbounded_channel();
        let (tx_operator, mut rx_operator) = mpsc::unbounded_channel();
        let client = state.connect(Uuid::new_v4(), UserRole::Client, tx_client).await;
        let operator = state.connect(Uuid::new_v4(), UserRole::Operator, tx_operator).await;

        state.join_ticket(&client, ticket_id).await;
        let events = drain(&mut rx_client);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ServerEvent::JoinedTicket { .. }));

        state.join_ticket(&operator, ticket_id).await;
        let client_events = drain(&mut rx_client);
        assert!(matches!(
            client_events.as_slice(),
            [ServerEvent::UserJoined { user_id, .. }] if *user_id == operator.user_id
        ));
        let operator_events = drain(&mut rx_operator);
        assert!(matches!(operator_events.as_slice(), [ServerEvent::JoinedTicket { .. }]));
    }

    #[tokio::test]
    async fn test_disconnect_removes_everywhere_and_announces() {
        let state = WebSocketState::new();
        let ticket_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        let (tx_peer, mut rx_peer) = mpsc::unbounded_channel();
        let a = state.connect(user_id, UserRole::Client, tx_a).await;
        let b = state.connect(user_id, UserRole::Client, tx_b).await;
        let peer = state.connect(Uuid::new_v4(), UserRole::Operator, tx_peer).await;

        state.join_ticket(&a, ticket_id).await;
        state.join_ticket(&peer, ticket_id).await;
        drain(&mut rx_peer);

        state.disconnect(&a.session_id).await;
        assert!(a.is_closed());

        let remaining = state.registry.lookup(&user_id).await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].session_id, b.session_id);
        assert!(!state.rooms.is_member(&RoomKey::Ticket(ticket_id), &a.session_id).await);

        let events = drain(&mut rx_peer);
        assert!(matches!(
            events.as_slice(),
            [ServerEvent::UserLeft { user_id: left, .. }] if *left == user_id
        ));

        // Idempotent
        state.disconnect(&a.session_id).await;
        assert_eq!(state.registry.connection_count().await, 2);
    }
}
