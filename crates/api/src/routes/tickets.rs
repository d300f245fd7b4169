//! Ticket routes

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use helpdesk_shared::{
    InternalNote, PageRequest, Paginated, Ticket, TicketCategory, TicketEvent, TicketPriority,
    TicketRating, TicketStatus, TicketSummary,
};
use serde::Deserialize;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
    store::TicketFilter,
    tickets::{CreateTicket, RateTicket, SlaReport, TicketDetail, UpdateTicket},
};

const DEFAULT_PAGE_SIZE: u32 = 20;

// =============================================================================
// Request Types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTicketRequest {
    pub title: String,
    pub description: String,
    pub category: TicketCategory,
    #[serde(default)]
    pub attachment_ids: Vec<Uuid>,
    #[serde(default)]
    pub context_data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTicketRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<TicketCategory>,
    pub context_data: Option<serde_json::Value>,
}

/// Comma-separated enum lists, e.g. `status=NEW,IN_PROGRESS`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTicketsQuery {
    pub status: Option<String>,
    pub priority: Option<String>,
    pub category: Option<String>,
    pub search: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub date_from: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub date_to: Option<OffsetDateTime>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRequest {
    /// Defaults to the caller
    pub operator_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeStatusRequest {
    pub status: TicketStatus,
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePriorityRequest {
    pub priority: TicketPriority,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalateRequest {
    pub specialist_id: Uuid,
    pub reason: String,
    #[serde(default)]
    pub notify_client: bool,
}

#[derive(Debug, Deserialize)]
pub struct AddNoteRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateTicketRequest {
    pub rating: i16,
    pub feedback: Option<String>,
    #[serde(default)]
    pub liked_speed: bool,
    #[serde(default)]
    pub liked_clarity: bool,
    #[serde(default)]
    pub liked_politeness: bool,
    #[serde(default)]
    pub liked_completeness: bool,
}

fn parse_list<T>(raw: Option<&str>) -> ApiResult<Vec<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| T::from_str(s).map_err(|e| ApiError::BadRequest(e.to_string())))
        .collect()
}

impl ListTicketsQuery {
    fn filter(&self) -> ApiResult<TicketFilter> {
        Ok(TicketFilter {
            statuses: parse_list(self.status.as_deref())?,
            priorities: parse_list(self.priority.as_deref())?,
            categories: parse_list(self.category.as_deref())?,
            search: self
                .search
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            created_from: self.date_from,
            created_to: self.date_to,
        })
    }
}

// =============================================================================
// Handlers
// =============================================================================

pub async fn create_ticket(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CreateTicketRequest>,
) -> ApiResult<(StatusCode, Json<Ticket>)> {
    let ticket = state
        .tickets
        .create(
            &auth_user,
            CreateTicket {
                title: req.title,
                description: req.description,
                category: req.category,
                attachment_ids: req.attachment_ids,
                context_data: req.context_data,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

pub async fn list_tickets(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<ListTicketsQuery>,
) -> ApiResult<Json<Paginated<TicketSummary>>> {
    let filter = query.filter()?;
    let page = PageRequest::new(query.page, query.limit, DEFAULT_PAGE_SIZE);
    Ok(Json(state.tickets.list(&auth_user, filter, page).await?))
}

pub async fn ticket_queue(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<Ticket>>> {
    Ok(Json(state.tickets.queue(&auth_user).await?))
}

pub async fn my_active_tickets(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<TicketSummary>>> {
    Ok(Json(state.tickets.my_active(&auth_user).await?))
}

pub async fn get_ticket(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(ticket_id): Path<Uuid>,
) -> ApiResult<Json<TicketDetail>> {
    Ok(Json(state.tickets.detail(&auth_user, ticket_id).await?))
}

pub async fn update_ticket(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(ticket_id): Path<Uuid>,
    Json(req): Json<UpdateTicketRequest>,
) -> ApiResult<Json<Ticket>> {
    let ticket = state
        .tickets
        .update(
            &auth_user,
            ticket_id,
            UpdateTicket {
                title: req.title,
                description: req.description,
                category: req.category,
                context_data: req.context_data,
            },
        )
        .await?;
    Ok(Json(ticket))
}

pub async fn ticket_history(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(ticket_id): Path<Uuid>,
) -> ApiResult<Json<Vec<TicketEvent>>> {
    Ok(Json(state.tickets.history(&auth_user, ticket_id).await?))
}

pub async fn ticket_sla(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(ticket_id): Path<Uuid>,
) -> ApiResult<Json<SlaReport>> {
    Ok(Json(state.tickets.sla(&auth_user, ticket_id).await?))
}

pub async fn ticket_suggestions(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(ticket_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Ticket>>> {
    Ok(Json(state.tickets.suggestions(&auth_user, ticket_id).await?))
}

pub async fn assign_ticket(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(ticket_id): Path<Uuid>,
    body: Option<Json<AssignRequest>>,
) -> ApiResult<Json<Ticket>> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    Ok(Json(
        state
            .tickets
            .assign(&auth_user, ticket_id, req.operator_id)
            .await?,
    ))
}

pub async fn change_status(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(ticket_id): Path<Uuid>,
    Json(req): Json<ChangeStatusRequest>,
) -> ApiResult<Json<Ticket>> {
    Ok(Json(
        state
            .tickets
            .change_status(&auth_user, ticket_id, req.status, req.comment)
            .await?,
    ))
}

pub async fn change_priority(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(ticket_id): Path<Uuid>,
    Json(req): Json<ChangePriorityRequest>,
) -> ApiResult<Json<Ticket>> {
    Ok(Json(
        state
            .tickets
            .change_priority(&auth_user, ticket_id, req.priority, req.reason)
            .await?,
    ))
}

pub async fn escalate_ticket(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(ticket_id): Path<Uuid>,
    Json(req): Json<EscalateRequest>,
) -> ApiResult<Json<Ticket>> {
    Ok(Json(
        state
            .tickets
            .escalate(
                &auth_user,
                ticket_id,
                req.specialist_id,
                req.reason,
                req.notify_client,
            )
            .await?,
    ))
}

pub async fn add_note(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(ticket_id): Path<Uuid>,
    Json(req): Json<AddNoteRequest>,
) -> ApiResult<(StatusCode, Json<InternalNote>)> {
    let note = state
        .tickets
        .add_internal_note(&auth_user, ticket_id, req.content)
        .await?;
    Ok((StatusCode::CREATED, Json(note)))
}

pub async fn rate_ticket(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(ticket_id): Path<Uuid>,
    Json(req): Json<RateTicketRequest>,
) -> ApiResult<(StatusCode, Json<TicketRating>)> {
    let rating = state
        .tickets
        .rate(
            &auth_user,
            ticket_id,
            RateTicket {
                rating: req.rating,
                feedback: req.feedback,
                liked_speed: req.liked_speed,
                liked_clarity: req.liked_clarity,
                liked_politeness: req.liked_politeness,
                liked_completeness: req.liked_completeness,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(rating)))
}
