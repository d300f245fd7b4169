//! WebSocket handler for Axum
//!
//! Authenticates the handshake, registers the connection and routes client
//! events to the ticket services.

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::Response,
};
use futures::{stream::StreamExt, SinkExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::auth::{extract_token, token::HANDSHAKE_PROTOCOL, Action, AuthUser};
use crate::error::{ApiError, ApiResult};
use crate::messages::SendMessage;
use crate::state::AppState;

use super::{
    connection::Connection,
    events::{ClientEvent, ServerEvent},
    room::{Audience, RoomKey},
};

#[derive(Debug, Default, Deserialize)]
pub struct WebSocketQuery {
    #[serde(default)]
    token: Option<String>,
}

/// Upgrade to WebSocket. Authentication happens before registration; a
/// rejected handshake still upgrades so the client receives an `error` frame
/// before the close.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<AppState>,
    Query(params): Query<WebSocketQuery>,
    headers: HeaderMap,
) -> Response {
    let token = extract_token(&headers, params.token.as_deref());
    let auth = authenticate(&app_state, token.as_deref()).await;

    ws.protocols([HANDSHAKE_PROTOCOL])
        .on_upgrade(move |socket| async move {
            match auth {
                Ok(user) => handle_socket(socket, user, app_state).await,
                Err(err) => reject_socket(socket, err).await,
            }
        })
}

/// Validate the token and confirm the account is still active
pub(crate) async fn authenticate(app_state: &AppState, token: Option<&str>) -> ApiResult<AuthUser> {
    let Some(token) = token else {
        tracing::warn!("WebSocket auth failed: no token");
        return Err(ApiError::AuthenticationFailed);
    };
    let user = app_state.auth_state().authenticate(token)?;

    match app_state.store.find_user(user.user_id).await? {
        Some(stored) if stored.is_active => Ok(AuthUser::from(&stored)),
        Some(_) => {
            tracing::warn!(user_id = %user.user_id, "WebSocket auth failed: user inactive");
            Err(ApiError::AuthenticationFailed)
        }
        None => {
            tracing::warn!(user_id = %user.user_id, "WebSocket auth failed: user not found");
            Err(ApiError::AuthenticationFailed)
        }
    }
}

async fn reject_socket(mut socket: WebSocket, err: ApiError) {
    if let Ok(json) = serde_json::to_string(&ServerEvent::error(&err)) {
        let _ = socket.send(Message::Text(json)).await;
    }
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: err.public_message().into(),
        })))
        .await;
}

/// Handle an authenticated WebSocket connection
async fn handle_socket(socket: WebSocket, user: AuthUser, app_state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Create channel for sending events to this connection
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    let ws_state = app_state.ws_state.clone();
    let conn = ws_state.connect(user.user_id, user.role, tx).await;
    let session_id = conn.session_id;

    let unread_count = match app_state.notifications.unread_count(user.user_id).await {
        Ok(count) => count,
        Err(e) => {
            tracing::error!(error = %e, user_id = %user.user_id, "Failed to load unread count");
            0
        }
    };
    conn.send(ServerEvent::Connected {
        user_id: user.user_id,
        session_id,
        unread_count,
    });

    tracing::info!(
        session_id = %session_id,
        user_id = %user.user_id,
        role = %user.role,
        "WebSocket connected"
    );

    // Spawn task to send messages to client
    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break; // Connection closed
                    }
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Failed to serialize WebSocket event");
                }
            }
        }
    });

    // Handle incoming messages
    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(session_id = %session_id, error = %e, "WebSocket receive error");
                break;
            }
        };
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    if let Err(err) = handle_client_event(event, &conn, &user, &app_state).await {
                        conn.send(ServerEvent::error(&err));
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, session_id = %session_id, "Failed to parse client event");
                    conn.send(ServerEvent::error(&ApiError::BadRequest(
                        "Invalid event format".into(),
                    )));
                }
            },
            Message::Close(_) => {
                tracing::info!(session_id = %session_id, "WebSocket close frame received");
                break;
            }
            // Axum answers protocol pings itself
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }

    tracing::info!(session_id = %session_id, user_id = %user.user_id, "WebSocket connection closing");
    ws_state.disconnect(&session_id).await;
    send_task.abort();
}

/// Route one client event. Failures are reported on the same connection.
pub async fn handle_client_event(
    event: ClientEvent,
    conn: &Arc<Connection>,
    user: &AuthUser,
    app_state: &AppState,
) -> ApiResult<()> {
    let ws_state = &app_state.ws_state;

    match event {
        ClientEvent::JoinTicket { ticket_id } => {
            app_state
                .tickets
                .load_for(user, ticket_id, Action::JoinTicketRoom)
                .await?;
            ws_state.join_ticket(conn, ticket_id).await;
        }

        ClientEvent::LeaveTicket { ticket_id } => {
            ws_state.leave_ticket(conn, ticket_id).await;
        }

        ClientEvent::Typing { ticket_id, is_typing } => {
            if !ws_state
                .rooms
                .is_member(&RoomKey::Ticket(ticket_id), &conn.session_id)
                .await
            {
                return Err(ApiError::Forbidden("Join the ticket room first".into()));
            }
            ws_state
                .broadcast_ticket(
                    ticket_id,
                    ServerEvent::UserTyping {
                        user_id: conn.user_id,
                        ticket_id,
                        is_typing,
                    },
                    Audience::ExceptSession(conn.session_id),
                )
                .await;
        }

        ClientEvent::SendMessage {
            ticket_id,
            message,
            temp_id,
        } => {
            let message = app_state
                .messages
                .send(
                    user,
                    SendMessage {
                        ticket_id,
                        content: message.content,
                        attachment_ids: message.attachment_ids,
                        is_internal: message.is_internal,
                    },
                )
                .await?;
            conn.send(ServerEvent::MessageSent { temp_id, message });
        }

        ClientEvent::MarkAsRead { message_id } => {
            app_state.messages.mark_read(user, message_id).await?;
        }

        ClientEvent::Subscribe => {
            ws_state.subscribe_user(conn).await;
        }

        ClientEvent::GetUnreadCount => {
            let count = app_state.notifications.unread_count(user.user_id).await?;
            conn.send(ServerEvent::UnreadCount { count });
        }

        ClientEvent::Ping => {
            conn.send(ServerEvent::Pong);
        }
    }

    Ok(())
}
