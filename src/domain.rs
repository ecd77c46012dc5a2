//! Sum types shared across services and routes.
//!
//! The database layer stores these as plain `TEXT` columns; these types
//! exist so that once a row is loaded, every match on
//! `kind`/`status`/`audience` is exhaustive and the compiler catches a
//! missing arm instead of a typo'd string comparison surviving to
//! production.

use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduleKind {
    Instant,
    Once,
    Daily,
}

impl ScheduleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleKind::Instant => "instant",
            ScheduleKind::Once => "once",
            ScheduleKind::Daily => "daily",
        }
    }
}

impl fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "instant" => Ok(ScheduleKind::Instant),
            "once" => Ok(ScheduleKind::Once),
            "daily" => Ok(ScheduleKind::Daily),
            other => Err(AppError::Validation(format!(
                "unknown schedule kind: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduleStatus {
    Pending,
    Active,
    Paused,
    Completed,
    Failed,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Pending => "pending",
            ScheduleStatus::Active => "active",
            ScheduleStatus::Paused => "paused",
            ScheduleStatus::Completed => "completed",
            ScheduleStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ScheduleStatus::Pending),
            "active" => Ok(ScheduleStatus::Active),
            "paused" => Ok(ScheduleStatus::Paused),
            "completed" => Ok(ScheduleStatus::Completed),
            "failed" => Ok(ScheduleStatus::Failed),
            other => Err(AppError::Internal(anyhow::anyhow!(
                "corrupt schedule status in storage: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudienceType {
    All,
    Filtered,
}

impl AudienceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudienceType::All => "all",
            AudienceType::Filtered => "filtered",
        }
    }
}

impl fmt::Display for AudienceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudienceType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(AudienceType::All),
            "filtered" => Ok(AudienceType::Filtered),
            other => Err(AppError::Validation(format!(
                "unknown audience type: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gender {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            "other" => Ok(Gender::Other),
            other => Err(AppError::Validation(format!("unknown gender: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Android,
    Ios,
    Web,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Android => "android",
            Platform::Ios => "ios",
            Platform::Web => "web",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "android" => Ok(Platform::Android),
            "ios" => Ok(Platform::Ios),
            "web" => Ok(Platform::Web),
            other => Err(AppError::Validation(format!("unknown platform: {other}"))),
        }
    }
}

/// Queue-internal vocabulary for the job kind: one row type covering all
/// four job kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    InstantSend,
    OnceSend,
    DailyTimezoneSend,
    Retry,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::InstantSend => "instant_send",
            JobKind::OnceSend => "once_send",
            JobKind::DailyTimezoneSend => "daily_timezone_send",
            JobKind::Retry => "retry",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "instant_send" => Ok(JobKind::InstantSend),
            "once_send" => Ok(JobKind::OnceSend),
            "daily_timezone_send" => Ok(JobKind::DailyTimezoneSend),
            "retry" => Ok(JobKind::Retry),
            other => Err(AppError::Internal(anyhow::anyhow!(
                "corrupt job kind in storage: {other}"
            ))),
        }
    }
}

/// The queue's job-state vocabulary: waiting/active/done/dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Waiting,
    Active,
    Done,
    Dead,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Active => "active",
            JobStatus::Done => "done",
            JobStatus::Dead => "dead",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(JobStatus::Waiting),
            "active" => Ok(JobStatus::Active),
            "done" => Ok(JobStatus::Done),
            "dead" => Ok(JobStatus::Dead),
            other => Err(AppError::Internal(anyhow::anyhow!(
                "corrupt job status in storage: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogStatus {
    Sent,
    Failed,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Sent => "sent",
            LogStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistoryStatus {
    Sent,
    PartialSuccess,
    Failed,
}

impl HistoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryStatus::Sent => "sent",
            HistoryStatus::PartialSuccess => "partial_success",
            HistoryStatus::Failed => "failed",
        }
    }

    /// `partial_success` iff `0 < success < total ∧ success/total >= 0.5`;
    /// `sent` iff all targeted recipients succeeded; `failed` otherwise
    /// (including the zero-targeted case).
    pub fn from_counts(total_targeted: i64, success_count: i64) -> Self {
        if total_targeted == 0 {
            return HistoryStatus::Failed;
        }
        if success_count == total_targeted {
            return HistoryStatus::Sent;
        }
        if success_count > 0 && (success_count as f64) / (total_targeted as f64) >= 0.5 {
            return HistoryStatus::PartialSuccess;
        }
        HistoryStatus::Failed
    }
}

impl fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure triage. The gateway's `errorCode` enumeration is
/// provider-specific; the worker only needs to know which side of this line
/// a given code falls on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Retryable,
    Permanent,
}

/// Classify a gateway error code against the enumerated retryable subset.
/// Anything not in the retryable list is treated as permanent.
pub fn classify_failure(error_code: &str) -> FailureClass {
    const RETRYABLE: &[&str] = &[
        "server-unavailable",
        "internal-error",
        "quota-exceeded",
        "timeout",
        "unavailable",
        "batch-error",
    ];
    if RETRYABLE.contains(&error_code) {
        FailureClass::Retryable
    } else {
        FailureClass::Permanent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_status_boundary_is_inclusive_at_half() {
        assert_eq!(HistoryStatus::from_counts(4, 2), HistoryStatus::PartialSuccess);
        assert_eq!(HistoryStatus::from_counts(4, 1), HistoryStatus::Failed);
        assert_eq!(HistoryStatus::from_counts(4, 4), HistoryStatus::Sent);
        assert_eq!(HistoryStatus::from_counts(0, 0), HistoryStatus::Failed);
    }

    #[test]
    fn classify_failure_matches_enumerated_retryable_set() {
        assert_eq!(classify_failure("timeout"), FailureClass::Retryable);
        assert_eq!(classify_failure("quota-exceeded"), FailureClass::Retryable);
        assert_eq!(classify_failure("unregistered"), FailureClass::Permanent);
        assert_eq!(classify_failure("invalid-argument"), FailureClass::Permanent);
    }

    #[test]
    fn round_trips_through_str() {
        assert_eq!("daily".parse::<ScheduleKind>().unwrap(), ScheduleKind::Daily);
        assert!("bogus".parse::<ScheduleKind>().is_err());
    }
}
