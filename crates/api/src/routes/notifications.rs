//! Notification inbox routes
//!
//! Every route is scoped to the caller's own notifications.

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use helpdesk_shared::{Notification, NotificationType, Paginated};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{auth::AuthUser, error::ApiResult, state::AppState, store::NotificationQuery};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListNotificationsQuery {
    #[serde(default)]
    pub unread_only: bool,
    #[serde(rename = "type")]
    pub notification_type: Option<NotificationType>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    pub ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct UpdatedResponse {
    pub updated: u64,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub deleted: u64,
}

// =============================================================================
// Handlers
// =============================================================================

pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<ListNotificationsQuery>,
) -> ApiResult<Json<Paginated<Notification>>> {
    let query = NotificationQuery::new(
        query.unread_only,
        query.notification_type,
        query.page,
        query.limit,
    );
    Ok(Json(
        state.notifications.list(auth_user.user_id, query).await?,
    ))
}

pub async fn unread_count(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<UnreadCountResponse>> {
    let count = state.notifications.unread_count(auth_user.user_id).await?;
    Ok(Json(UnreadCountResponse { count }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(notification_id): Path<Uuid>,
) -> ApiResult<Json<Notification>> {
    Ok(Json(
        state
            .notifications
            .mark_read(auth_user.user_id, notification_id)
            .await?,
    ))
}

pub async fn mark_many_read(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<MarkReadRequest>,
) -> ApiResult<Json<UpdatedResponse>> {
    let updated = state
        .notifications
        .mark_many_read(auth_user.user_id, &req.ids)
        .await?;
    Ok(Json(UpdatedResponse { updated }))
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<UpdatedResponse>> {
    let updated = state.notifications.mark_all_read(auth_user.user_id).await?;
    Ok(Json(UpdatedResponse { updated }))
}

pub async fn delete_notification(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(notification_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state
        .notifications
        .delete(auth_user.user_id, notification_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_all_notifications(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<DeletedResponse>> {
    let deleted = state.notifications.delete_all(auth_user.user_id).await?;
    Ok(Json(DeletedResponse { deleted }))
}
