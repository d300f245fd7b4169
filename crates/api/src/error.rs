//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use helpdesk_shared::StoreError;
use serde_json::json;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Authentication errors
    #[error("Invalid or expired token")]
    AuthenticationFailed,
    #[error("Authentication required")]
    Unauthorized,
    #[error("{0}")]
    Forbidden(String),

    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("{0}")]
    InvalidOperator(String),

    // Resource errors
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    InvalidState(String),
    #[error("{0}")]
    AlreadyDone(String),
    #[error("{0}")]
    Conflict(String),

    // Internal errors
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    /// Stable machine-readable code, shared by REST bodies and socket errors
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::AuthenticationFailed => "AUTHENTICATION_FAILED",
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::InvalidOperator(_) => "INVALID_OPERATOR",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::InvalidState(_) => "INVALID_STATE",
            ApiError::AlreadyDone(_) => "ALREADY_DONE",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::Database(_) => "DATABASE_ERROR",
            ApiError::Internal => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::AuthenticationFailed | ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Validation(_) | ApiError::BadRequest(_) | ApiError::InvalidOperator(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidState(_) | ApiError::AlreadyDone(_) | ApiError::Conflict(_) => {
                StatusCode::CONFLICT
            }
            ApiError::Database(_) | ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show a caller; persistence details stay in the logs
    pub fn public_message(&self) -> String {
        match self {
            ApiError::Database(_) => "Database error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.public_message(),
            }
        }));

        (self.status(), body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => ApiError::Conflict(msg),
            StoreError::Stale(msg) => {
                tracing::debug!(reason = %msg, "Stale ticket write rejected");
                ApiError::InvalidState("Ticket changed concurrently, reload and retry".into())
            }
            StoreError::MissingReference(msg) => {
                tracing::debug!(reason = %msg, "Write referenced an unknown row");
                ApiError::Validation("Unknown attachment id".into())
            }
            other => {
                tracing::error!(error = %other, "Store error");
                ApiError::Database(other.to_string())
            }
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::NotFound("Ticket".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::Forbidden("no".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::InvalidState("closed".into()).status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::AlreadyDone("rated".into()).status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::InvalidOperator("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::AuthenticationFailed.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_database_detail_is_hidden() {
        let err: ApiError = StoreError::Database("relation \"tickets\" does not exist".into()).into();
        assert_eq!(err.public_message(), "Database error");
        assert_eq!(err.code(), "DATABASE_ERROR");
    }

    #[test]
    fn test_store_conflict_maps_to_conflict() {
        let err: ApiError = StoreError::Conflict("duplicate".into()).into();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[test]
    fn test_stale_and_missing_reference_are_client_errors() {
        let stale: ApiError = StoreError::Stale("ticket is CLOSED".into()).into();
        assert!(matches!(stale, ApiError::InvalidState(_)));
        assert_eq!(stale.status(), StatusCode::CONFLICT);

        let missing: ApiError = StoreError::MissingReference("files_fkey".into()).into();
        assert!(matches!(missing, ApiError::Validation(_)));
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    }
}
