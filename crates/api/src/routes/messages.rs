//! Ticket conversation routes

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use helpdesk_shared::Message;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    messages::SendMessage,
    state::AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default)]
    pub attachment_ids: Vec<Uuid>,
    #[serde(default)]
    pub is_internal: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub message_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct MarkedResponse {
    pub updated: usize,
}

pub async fn list_messages(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(ticket_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Message>>> {
    Ok(Json(state.messages.list(&auth_user, ticket_id).await?))
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(ticket_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<(StatusCode, Json<Message>)> {
    let message = state
        .messages
        .send(
            &auth_user,
            SendMessage {
                ticket_id,
                content: req.content,
                attachment_ids: req.attachment_ids,
                is_internal: req.is_internal,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn unread_count(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(ticket_id): Path<Uuid>,
) -> ApiResult<Json<UnreadCountResponse>> {
    let count = state.messages.unread_count(&auth_user, ticket_id).await?;
    Ok(Json(UnreadCountResponse { count }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path((ticket_id, message_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Message>> {
    let message = state.messages.mark_read(&auth_user, message_id).await?;
    if message.ticket_id != ticket_id {
        return Err(ApiError::NotFound("Message".into()));
    }
    Ok(Json(message))
}

pub async fn mark_many_read(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(ticket_id): Path<Uuid>,
    Json(req): Json<MarkReadRequest>,
) -> ApiResult<Json<MarkedResponse>> {
    let updated = state
        .messages
        .mark_many_read(&auth_user, ticket_id, &req.message_ids)
        .await?;
    Ok(Json(MarkedResponse { updated }))
}
