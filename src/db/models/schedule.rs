use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domain::{AudienceType, ScheduleKind, ScheduleStatus};
use crate::error::AppError;

/// The campaign definition. Stored flat (one row, nullable columns for the
/// fields that only apply to one `kind`) rather than as separate tables per
/// kind — one row, several optional payload columns used depending on kind.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub title: String,
    pub body: String,
    pub kind: String,
    pub local_time: Option<String>,
    pub fire_at: Option<NaiveDateTime>,
    pub category: Option<String>,
    pub audience_type: String,
    pub audience_genders: Option<String>,
    pub audience_platforms: Option<String>,
    pub audience_age_min: Option<i64>,
    pub audience_age_max: Option<i64>,
    pub status: String,
    pub is_active: bool,
    pub total_targeted: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub last_run_at: Option<NaiveDateTime>,
    pub last_run_status: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Schedule {
    pub fn kind(&self) -> Result<ScheduleKind, AppError> {
        self.kind.parse()
    }

    pub fn status(&self) -> Result<ScheduleStatus, AppError> {
        self.status.parse()
    }

    pub fn audience_type(&self) -> Result<AudienceType, AppError> {
        self.audience_type.parse()
    }

    /// Reassembles the filter predicate from its flattened columns, or
    /// `None` when `audience_type = all`.
    pub fn filter(&self) -> Option<AudienceFilter> {
        if self.audience_type != "filtered" {
            return None;
        }
        Some(AudienceFilter {
            genders: split_csv(self.audience_genders.as_deref()),
            platforms: split_csv(self.audience_platforms.as_deref()),
            age_min: self.audience_age_min,
            age_max: self.audience_age_max,
        })
    }
}

fn split_csv(value: Option<&str>) -> Vec<String> {
    match value {
        Some(s) if !s.is_empty() => s.split(',').map(|v| v.to_string()).collect(),
        _ => Vec::new(),
    }
}

/// Filter sub-fields, reassembled from the flat columns above.
#[derive(Debug, Clone, Default)]
pub struct AudienceFilter {
    pub genders: Vec<String>,
    pub platforms: Vec<String>,
    pub age_min: Option<i64>,
    pub age_max: Option<i64>,
}

impl AudienceFilter {
    pub fn is_empty(&self) -> bool {
        self.genders.is_empty()
            && self.platforms.is_empty()
            && self.age_min.is_none()
            && self.age_max.is_none()
    }
}

/// Request body for `POST /schedules`, validated into a concrete
/// `Schedule` row by `services::lifecycle::create_schedule`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateScheduleRequest {
    pub title: String,
    pub body: String,
    pub kind: String,
    pub local_time: Option<String>,
    pub fire_at: Option<chrono::DateTime<chrono::Utc>>,
    pub category: Option<String>,
    pub audience: String,
    pub filter: Option<CreateAudienceFilter>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAudienceFilter {
    #[serde(default)]
    pub gender: Vec<String>,
    #[serde(default)]
    pub platform: Vec<String>,
    pub age_min: Option<i64>,
    pub age_max: Option<i64>,
}

/// Request body for `POST /schedules/{id}/status` (pause/resume).
#[derive(Debug, Clone, Deserialize)]
pub struct SetScheduleStatusRequest {
    pub is_active: bool,
}
