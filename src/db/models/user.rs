use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// The recipient projection consumed by the scheduler.
///
/// Only the fields the scheduler itself needs are modeled: identity,
/// timezone, device token, activity flags, and the profile fields a filter
/// predicate can reference. Everything else about a user (health data,
/// workout history, CMS state, ...) lives outside this crate's scope.
///
/// Timestamps are stored (and compared) as UTC-naive, binding
/// `Utc::now().naive_utc()` rather than timezone-aware `DateTime<Utc>`
/// columns.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub timezone: String,
    pub device_token: Option<String>,
    pub device_platform: Option<String>,
    pub device_last_used_at: Option<NaiveDateTime>,
    pub gender: Option<String>,
    pub age: Option<i64>,
    pub is_active: bool,
    pub opted_out: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl User {
    /// A recipient is eligible iff active, not opted out, and has a
    /// non-empty device token; the filter predicate (if any) is evaluated
    /// separately by the audience query. This only covers the base
    /// eligibility gate, used again as defence-in-depth by the worker after
    /// the query returns rows.
    pub fn has_deliverable_token(&self) -> bool {
        self.is_active
            && !self.opted_out
            && self
                .device_token
                .as_deref()
                .map(|t| !t.is_empty())
                .unwrap_or(false)
    }
}

/// Fields accepted by the device-registration hook (`POST /fcm-token`).
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterDevice {
    pub user_id: String,
    pub token: String,
    pub platform: String,
    pub timezone: String,
}
