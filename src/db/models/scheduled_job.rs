use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A queued job. Realizes the conceptual queue interface
/// (`enqueue`/`getJobsByState`/`removeById`) as a table in the same
/// database, with an atomic claim pattern (see
/// `db/repository/scheduled_job.rs`).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: String,
    pub kind: String,
    pub schedule_id: Option<String>,
    pub timezone: Option<String>,
    pub payload_json: String,
    pub status: String,
    pub run_at: NaiveDateTime,
    pub attempt: i64,
    pub max_attempts: i64,
    pub last_error: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Parameters accepted by `enqueue()`.
#[derive(Debug, Clone)]
pub struct EnqueueJob {
    pub id: String,
    pub kind: String,
    pub schedule_id: Option<String>,
    pub timezone: Option<String>,
    pub payload_json: String,
    pub run_at: NaiveDateTime,
    pub max_attempts: i64,
}

/// Retry-pipeline payload: which tokens failed and the original push
/// payload so a resend is byte-identical.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPayload {
    pub schedule_id: String,
    pub failed_tokens: Vec<String>,
    pub title: String,
    pub body: String,
    pub category: Option<String>,
}
