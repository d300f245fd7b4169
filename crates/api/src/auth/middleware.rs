//! Bearer authentication for the REST surface

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use helpdesk_shared::{User, UserRole};
use std::sync::Arc;
use uuid::Uuid;

use super::{extract_token, JwtManager};
use crate::error::ApiError;

/// State needed by the auth middleware
#[derive(Clone)]
pub struct AuthState {
    pub jwt_manager: Arc<JwtManager>,
}

/// Authenticated caller, inserted as a request extension
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: UserRole,
    pub email: String,
}

impl From<&User> for AuthUser {
    fn from(user: &User) -> Self {
        AuthUser {
            user_id: user.id,
            role: user.role,
            email: user.email.clone(),
        }
    }
}

impl AuthState {
    /// Verify a raw token into the caller identity
    pub fn authenticate(&self, token: &str) -> Result<AuthUser, ApiError> {
        let claims = self.jwt_manager.validate_access_token(token).map_err(|e| {
            tracing::debug!(error = %e, "Token rejected");
            ApiError::AuthenticationFailed
        })?;
        Ok(AuthUser {
            user_id: claims.sub,
            role: claims.role,
            email: claims.email,
        })
    }
}

/// Require a valid access token
pub async fn require_auth(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_token(request.headers(), None).ok_or(ApiError::Unauthorized)?;
    let auth_user = auth_state.authenticate(&token)?;
    request.extensions_mut().insert(auth_user);
    Ok(next.run(request).await)
}
