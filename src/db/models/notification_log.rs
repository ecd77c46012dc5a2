use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Per (user, firing) record, the user-visible feed's source of truth.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NotificationLogRow {
    pub id: String,
    pub schedule_id: String,
    pub user_id: String,
    pub title: String,
    pub body: String,
    pub category: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    pub device_token: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct NewNotificationLog {
    pub schedule_id: String,
    pub user_id: String,
    pub title: String,
    pub body: String,
    pub category: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    pub device_token: Option<String>,
}
