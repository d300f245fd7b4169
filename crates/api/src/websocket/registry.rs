//! Connection Registry
//!
//! The authoritative map of user → live connections. A user may hold
//! several sessions at once (tabs, devices); each is tracked separately.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::connection::Connection;

#[derive(Default)]
struct Inner {
    sessions: HashMap<Uuid, Arc<Connection>>,
    by_user: HashMap<Uuid, HashSet<Uuid>>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, conn: Connection) -> Arc<Connection> {
        let conn = Arc::new(conn);
        let mut inner = self.inner.write().await;
        inner.sessions.insert(conn.session_id, Arc::clone(&conn));
        inner
            .by_user
            .entry(conn.user_id)
            .or_default()
            .insert(conn.session_id);

        tracing::info!(
            session_id = %conn.session_id,
            user_id = %conn.user_id,
            total_connections = inner.sessions.len(),
            "WebSocket connection registered"
        );

        conn
    }

    /// Close and remove a session; a no-op returning `None` if it is already
    /// gone. The close happens under the write lock, so no lookup can hand out
    /// a connection that is being torn down.
    pub async fn unregister(&self, session_id: &Uuid) -> Option<Arc<Connection>> {
        let mut inner = self.inner.write().await;
        let conn = inner.sessions.remove(session_id)?;
        conn.close();
        if let Some(sessions) = inner.by_user.get_mut(&conn.user_id) {
            sessions.remove(session_id);
            if sessions.is_empty() {
                inner.by_user.remove(&conn.user_id);
            }
        }

        tracing::info!(
            session_id = %session_id,
            user_id = %conn.user_id,
            remaining_connections = inner.sessions.len(),
            "WebSocket connection unregistered"
        );

        Some(conn)
    }

    /// Every live connection of a user; empty when offline
    pub async fn lookup(&self, user_id: &Uuid) -> Vec<Arc<Connection>> {
        let inner = self.inner.read().await;
        inner
            .by_user
            .get(user_id)
            .map(|sessions| {
                sessions
                    .iter()
                    .filter_map(|id| inner.sessions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn is_online(&self, user_id: &Uuid) -> bool {
        self.inner.read().await.by_user.contains_key(user_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    pub async fn online_user_count(&self) -> usize {
        self.inner.read().await.by_user.len()
    }
}
