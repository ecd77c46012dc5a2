//! `GET /history`, `GET /history/stats`.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::db::models::HistoryWithSchedule;
use crate::db::repository::{HistoryStats, NotificationHistoryRepository};
use crate::error::AppResult;
use crate::routes::ApiResponse;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_history))
        .route("/stats", get(history_stats))
}

#[derive(Debug, Deserialize)]
pub struct ListHistoryQuery {
    pub status: Option<String>,
    pub start_date: Option<NaiveDateTime>,
    pub end_date: Option<NaiveDateTime>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct HistoryListResponse {
    pub items: Vec<HistoryWithSchedule>,
    pub page: i64,
    pub limit: i64,
}

async fn list_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListHistoryQuery>,
) -> AppResult<Json<ApiResponse<HistoryListResponse>>> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let offset = (page - 1) * limit;

    let items = NotificationHistoryRepository::list_with_schedule(
        &state.db,
        query.status.as_deref(),
        query.start_date,
        query.end_date,
        query.search.as_deref(),
        limit,
        offset,
    )
    .await?;

    Ok(Json(ApiResponse::ok(HistoryListResponse {
        items,
        page,
        limit,
    })))
}

#[derive(Debug, Deserialize)]
pub struct HistoryStatsQuery {
    pub start_date: Option<NaiveDateTime>,
    pub end_date: Option<NaiveDateTime>,
}

async fn history_stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryStatsQuery>,
) -> AppResult<Json<ApiResponse<HistoryStats>>> {
    let stats =
        NotificationHistoryRepository::stats(&state.db, query.start_date, query.end_date).await?;
    Ok(Json(ApiResponse::ok(stats)))
}
