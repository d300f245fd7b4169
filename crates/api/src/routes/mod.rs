//! API routes

pub mod health;
pub mod messages;
pub mod notifications;
pub mod tickets;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    middleware,
    routing::{delete, get, patch, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{auth::require_auth, state::AppState, websocket::ws_handler};

fn cors_layer(frontend_url: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    match HeaderValue::from_str(frontend_url) {
        Ok(origin) => layer.allow_origin(origin),
        Err(e) => {
            tracing::warn!(frontend_url, error = %e, "Invalid FRONTEND_URL, CORS origin not set");
            layer
        }
    }
}

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    let auth_state = state.auth_state();

    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    let protected_api_routes = Router::new()
        // Tickets
        .route("/tickets", post(tickets::create_ticket).get(tickets::list_tickets))
        .route("/tickets/queue", get(tickets::ticket_queue))
        .route("/tickets/my-active", get(tickets::my_active_tickets))
        .route("/tickets/:id", get(tickets::get_ticket).patch(tickets::update_ticket))
        .route("/tickets/:id/history", get(tickets::ticket_history))
        .route("/tickets/:id/sla", get(tickets::ticket_sla))
        .route("/tickets/:id/suggestions", get(tickets::ticket_suggestions))
        .route("/tickets/:id/assign", post(tickets::assign_ticket))
        .route("/tickets/:id/status", patch(tickets::change_status))
        .route("/tickets/:id/priority", patch(tickets::change_priority))
        .route("/tickets/:id/escalate", post(tickets::escalate_ticket))
        .route("/tickets/:id/notes", post(tickets::add_note))
        .route("/tickets/:id/rate", post(tickets::rate_ticket))
        // Messages
        .route(
            "/tickets/:id/messages",
            get(messages::list_messages).post(messages::send_message),
        )
        .route("/tickets/:id/messages/unread-count", get(messages::unread_count))
        .route("/tickets/:id/messages/mark-read", post(messages::mark_many_read))
        .route("/tickets/:id/messages/:message_id/read", patch(messages::mark_read))
        // Notifications
        .route(
            "/notifications",
            get(notifications::list_notifications).delete(notifications::delete_all_notifications),
        )
        .route("/notifications/unread-count", get(notifications::unread_count))
        .route("/notifications/mark-read", post(notifications::mark_many_read))
        .route("/notifications/mark-all-read", post(notifications::mark_all_read))
        .route("/notifications/:id", delete(notifications::delete_notification))
        .route("/notifications/:id/read", post(notifications::mark_read))
        .layer(middleware::from_fn_with_state(auth_state, require_auth));

    // WebSocket route (auth handled in the handler during the handshake)
    let websocket_routes = Router::new().route("/ws", get(ws_handler));

    let api_v1_routes = Router::new()
        .merge(protected_api_routes)
        .merge(websocket_routes);

    Router::new()
        .merge(health_routes)
        .nest("/api/v1", api_v1_routes)
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024))
        .layer(cors_layer(&state.config.frontend_url))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
