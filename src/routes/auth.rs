//! Narrow stand-in for an upstream auth layer (authentication middleware
//! is out of scope for this crate). Every operator/user-facing route still
//! needs *some* identity to key queries on, so this extractor reads a
//! header a reverse proxy or gateway would normally attach, without
//! performing any verification of its own.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use async_trait::async_trait;

use crate::error::AppError;
use crate::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";

/// The caller's opaque user id, trusted as already-authenticated.
pub struct AuthUser(pub String);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::Unauthorized(format!("missing {USER_ID_HEADER} header")))?;
        Ok(AuthUser(user_id.to_string()))
    }
}
