#![allow(dead_code)]

use helpdesk_api::{
    auth::AuthUser,
    store::{MemoryStore, TicketStore},
    websocket::{connection::Connection, events::ServerEvent},
    AppState, Config,
};
use helpdesk_shared::{User, UserRole};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

pub fn test_config() -> Config {
    Config {
        bind_address: "127.0.0.1:0".into(),
        frontend_url: "http://localhost:5173".into(),
        database_url: None,
        database_max_connections: 1,
        jwt_secret: "integration-test-secret-that-is-long-enough".into(),
        jwt_expiry_hours: 1,
        urgent_keywords: helpdesk_api::config::DEFAULT_URGENT_KEYWORDS
            .iter()
            .map(|k| k.to_string())
            .collect(),
        log_json: false,
    }
}

pub fn app() -> AppState {
    let store: Arc<dyn TicketStore> = Arc::new(MemoryStore::new());
    AppState::new(test_config(), store)
}

pub async fn user(app: &AppState, role: UserRole, first_name: &str) -> AuthUser {
    let user = User {
        id: Uuid::new_v4(),
        email: format!("{}@example.com", first_name.to_lowercase()),
        first_name: first_name.into(),
        last_name: "Example".into(),
        role,
        is_active: true,
    };
    app.store.upsert_user(&user).await.unwrap();
    AuthUser {
        user_id: user.id,
        role,
        email: user.email,
    }
}

/// A registered connection backed by a channel instead of a socket
pub struct FakeSocket {
    pub conn: Arc<Connection>,
    pub rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl FakeSocket {
    pub async fn connect(app: &AppState, user: &AuthUser) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = app.ws_state.connect(user.user_id, user.role, tx).await;
        Self { conn, rx }
    }

    pub fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn names(&mut self) -> Vec<&'static str> {
        self.drain().iter().map(ServerEvent::name).collect()
    }
}
