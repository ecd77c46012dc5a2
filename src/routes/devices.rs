//! Device registration hook: `POST /fcm-token {token, platform}` with a
//! `timezone` header. Triggers the timezone discovery sweep
//! (`services::discovery`).

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::db::models::RegisterDevice;
use crate::error::{AppError, AppResult};
use crate::routes::auth::AuthUser;
use crate::routes::ApiResponse;
use crate::services::discovery;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", post(register_device))
}

#[derive(Debug, Deserialize)]
pub struct RegisterDeviceRequest {
    pub token: String,
    pub platform: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterDeviceResponse {
    pub timezone: String,
    pub discovery_triggered: bool,
}

async fn register_device(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    headers: HeaderMap,
    Json(req): Json<RegisterDeviceRequest>,
) -> AppResult<Json<ApiResponse<RegisterDeviceResponse>>> {
    if req.token.trim().is_empty() {
        return Err(AppError::Validation("token must not be empty".to_string()));
    }
    let timezone = headers
        .get("timezone")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Validation("missing timezone header".to_string()))?
        .to_string();

    let outcome = discovery::register_device(
        &state.db,
        state.clock.as_ref(),
        state.ids.as_ref(),
        RegisterDevice {
            user_id,
            token: req.token,
            platform: req.platform,
            timezone,
        },
    )
    .await?;

    Ok(Json(ApiResponse::ok(RegisterDeviceResponse {
        timezone: outcome.canonical_timezone,
        discovery_triggered: outcome.discovery_triggered,
    })))
}
