//! Authentication middleware.
//!
//! Requests carry `Authorization: Bearer <token>`. When the server has an
//! `AUTH_SECRET`, the token must equal it; otherwise access is open.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::error::AppError;
use crate::AppState;

/// Authenticated caller extracted from request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The bearer token, or `anonymous` when no secret is configured
    pub token: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        let Some(secret) = state.config.auth_secret.as_deref() else {
            // No secret configured, allow anonymous access
            let token = auth_header
                .and_then(|h| h.strip_prefix("Bearer "))
                .unwrap_or("anonymous")
                .to_string();
            return Ok(AuthUser { token });
        };

        match auth_header.and_then(|h| h.strip_prefix("Bearer ")) {
            Some(token) if token == secret => Ok(AuthUser {
                token: token.to_string(),
            }),
            Some(_) => {
                tracing::warn!("Rejected request with an invalid bearer token");
                Err(AppError::Unauthorized)
            }
            None => Err(AppError::Unauthorized),
        }
    }
}
