use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Per (schedule, firing) aggregate; the authoritative observability
/// record, written last in the dispatch pipeline.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NotificationHistoryRow {
    pub id: String,
    pub schedule_id: String,
    pub timezone: Option<String>,
    pub fired_at: NaiveDateTime,
    pub total_targeted: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct NewNotificationHistory {
    pub schedule_id: String,
    pub timezone: Option<String>,
    pub fired_at: NaiveDateTime,
    pub total_targeted: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub status: String,
    pub error_message: Option<String>,
}

/// Joined row for the history listing: aggregate + the schedule's
/// title/message for search/display.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct HistoryWithSchedule {
    pub id: String,
    pub schedule_id: String,
    pub schedule_title: String,
    pub schedule_body: String,
    pub timezone: Option<String>,
    pub fired_at: NaiveDateTime,
    pub total_targeted: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub status: String,
    pub error_message: Option<String>,
}
