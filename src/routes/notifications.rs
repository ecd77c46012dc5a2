//! User-facing feed: `GET /notifications`, authenticated as a user,
//! returns that user's `NotificationLog` rows paginated by `sentAt desc`.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::db::models::NotificationLogRow;
use crate::db::repository::NotificationLogRepository;
use crate::error::AppResult;
use crate::routes::auth::AuthUser;
use crate::routes::ApiResponse;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(list_notifications))
}

#[derive(Debug, Deserialize)]
pub struct ListNotificationsQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct NotificationsListResponse {
    pub items: Vec<NotificationLogRow>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

async fn list_notifications(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<ListNotificationsQuery>,
) -> AppResult<Json<ApiResponse<NotificationsListResponse>>> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let offset = (page - 1) * limit;

    let items = NotificationLogRepository::find_by_user(&state.db, &user_id, limit, offset).await?;
    let total = NotificationLogRepository::count_by_user(&state.db, &user_id).await?;

    Ok(Json(ApiResponse::ok(NotificationsListResponse {
        items,
        total,
        page,
        limit,
    })))
}
