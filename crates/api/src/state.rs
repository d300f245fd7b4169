//! Application state shared by every handler

use std::sync::Arc;

use crate::auth::{AuthState, JwtManager};
use crate::config::Config;
use crate::messages::MessagePipeline;
use crate::notifications::NotificationService;
use crate::store::TicketStore;
use crate::tickets::{PriorityRule, TicketService};
use crate::websocket::WebSocketState;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn TicketStore>,
    pub ws_state: WebSocketState,
    pub jwt_manager: Arc<JwtManager>,
    pub notifications: NotificationService,
    pub messages: MessagePipeline,
    pub tickets: TicketService,
}

impl AppState {
    /// Wire the services over a store
    pub fn new(config: Config, store: Arc<dyn TicketStore>) -> Self {
        let ws_state = WebSocketState::new();
        let jwt_manager = Arc::new(JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours));
        let notifications = NotificationService::new(Arc::clone(&store), ws_state.clone());
        let messages =
            MessagePipeline::new(Arc::clone(&store), ws_state.clone(), notifications.clone());
        let tickets = TicketService::new(
            Arc::clone(&store),
            ws_state.clone(),
            notifications.clone(),
            PriorityRule::new(&config.urgent_keywords),
        );

        Self {
            config: Arc::new(config),
            store,
            ws_state,
            jwt_manager,
            notifications,
            messages,
            tickets,
        }
    }

    pub fn auth_state(&self) -> AuthState {
        AuthState {
            jwt_manager: Arc::clone(&self.jwt_manager),
        }
    }
}
