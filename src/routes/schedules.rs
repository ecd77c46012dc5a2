//! Operator surface: `POST /schedules`, `POST /schedules/{id}/status`,
//! `GET /schedules`.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::db::models::{CreateScheduleRequest, Schedule, SetScheduleStatusRequest};
use crate::db::repository::ScheduleRepository;
use crate::error::AppResult;
use crate::routes::ApiResponse;
use crate::services::lifecycle;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_schedule).get(list_schedules))
        .route("/:id/status", post(set_status))
}

#[derive(Debug, Serialize)]
pub struct ScheduleResponse {
    #[serde(flatten)]
    pub schedule: Schedule,
}

impl From<Schedule> for ScheduleResponse {
    fn from(schedule: Schedule) -> Self {
        ScheduleResponse { schedule }
    }
}

async fn create_schedule(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateScheduleRequest>,
) -> AppResult<Json<ApiResponse<ScheduleResponse>>> {
    let schedule =
        lifecycle::create_schedule(&state.db, state.clock.as_ref(), state.ids.as_ref(), req)
            .await?;
    Ok(Json(ApiResponse::ok(schedule.into())))
}

async fn set_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<SetScheduleStatusRequest>,
) -> AppResult<Json<ApiResponse<ScheduleResponse>>> {
    let schedule = lifecycle::set_status(
        &state.db,
        state.clock.as_ref(),
        state.ids.as_ref(),
        &id,
        req.is_active,
    )
    .await?;
    Ok(Json(ApiResponse::ok(schedule.into())))
}

#[derive(Debug, Deserialize)]
pub struct ListSchedulesQuery {
    pub status: Option<String>,
    pub kind: Option<String>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SchedulesListResponse {
    pub items: Vec<Schedule>,
    pub page: i64,
    pub limit: i64,
}

async fn list_schedules(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListSchedulesQuery>,
) -> AppResult<Json<ApiResponse<SchedulesListResponse>>> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let offset = (page - 1) * limit;

    let items = ScheduleRepository::list_for_dashboard(
        &state.db,
        query.status.as_deref(),
        query.kind.as_deref(),
        query.search.as_deref(),
        limit,
        offset,
    )
    .await?;

    Ok(Json(ApiResponse::ok(SchedulesListResponse {
        items,
        page,
        limit,
    })))
}
