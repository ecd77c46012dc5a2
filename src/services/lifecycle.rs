//! Schedule lifecycle. Create, pause, resume, and validate schedules;
//! persists the state machine.

use chrono::Utc;
use sqlx::SqlitePool;

use crate::clock::Clock;
use crate::db::models::{CreateScheduleRequest, Schedule};
use crate::db::repository::{ScheduleRepository, ScheduledJobRepository};
use crate::domain::{AudienceType, ScheduleKind, ScheduleStatus};
use crate::error::{AppError, AppResult};
use crate::ids::IdGenerator;
use crate::services::planner;
use crate::timezone;

const MAX_TITLE_LEN: usize = 65;
const MAX_MESSAGE_LEN: usize = 240;
const MIN_AGE: i64 = 13;
const MAX_AGE: i64 = 120;

/// Validates the request, persists the `Schedule` row, and plans its
/// initial job(s) (delegating to the occurrence planner).
pub async fn create_schedule(
    pool: &SqlitePool,
    clock: &dyn Clock,
    ids: &dyn IdGenerator,
    req: CreateScheduleRequest,
) -> AppResult<Schedule> {
    if req.title.is_empty() || req.title.chars().count() > MAX_TITLE_LEN {
        return Err(AppError::Validation(format!(
            "title must be 1..={MAX_TITLE_LEN} characters"
        )));
    }
    if req.body.is_empty() || req.body.chars().count() > MAX_MESSAGE_LEN {
        return Err(AppError::Validation(format!(
            "message must be 1..={MAX_MESSAGE_LEN} characters"
        )));
    }

    let kind: ScheduleKind = req.kind.parse()?;
    let audience_type: AudienceType = req.audience.parse()?;

    let local_time = match kind {
        ScheduleKind::Daily => {
            let lt = req
                .local_time
                .as_deref()
                .ok_or_else(|| AppError::Validation("daily schedule requires local_time".into()))?;
            timezone::parse_local_time(lt)?; // validates strict HH:MM form
            Some(lt.to_string())
        }
        _ => {
            if req.local_time.is_some() {
                return Err(AppError::Validation(
                    "local_time only applies to daily schedules".into(),
                ));
            }
            None
        }
    };

    let fire_at = match kind {
        ScheduleKind::Once => {
            let fire_at = req
                .fire_at
                .ok_or_else(|| AppError::Validation("once schedule requires fire_at".into()))?;
            if fire_at <= clock.now() {
                return Err(AppError::Validation(
                    "fire_at must be strictly in the future".into(),
                ));
            }
            Some(fire_at.naive_utc())
        }
        _ => {
            if req.fire_at.is_some() {
                return Err(AppError::Validation(
                    "fire_at only applies to once schedules".into(),
                ));
            }
            None
        }
    };

    let (genders, platforms, age_min, age_max) = match audience_type {
        AudienceType::Filtered => {
            let filter = req.filter.ok_or_else(|| {
                AppError::Validation("filtered audience requires a filter object".into())
            })?;
            validate_filter(&filter)?;
            (
                non_empty_csv(&filter.gender),
                non_empty_csv(&filter.platform),
                filter.age_min,
                filter.age_max,
            )
        }
        AudienceType::All => {
            if req.filter.is_some() {
                return Err(AppError::Validation(
                    "filter only applies to filtered audience".into(),
                ));
            }
            (None, None, None, None)
        }
    };

    let initial_status = match kind {
        ScheduleKind::Instant => ScheduleStatus::Pending,
        ScheduleKind::Once => ScheduleStatus::Pending,
        ScheduleKind::Daily => ScheduleStatus::Active,
    };

    let id = ids.new_id();
    let schedule = ScheduleRepository::create(
        pool,
        &id,
        &req.title,
        &req.body,
        kind.as_str(),
        local_time.as_deref(),
        fire_at,
        req.category.as_deref(),
        audience_type.as_str(),
        genders.as_deref(),
        platforms.as_deref(),
        age_min,
        age_max,
        initial_status.as_str(),
    )
    .await?;

    planner::plan_initial(pool, clock, ids, &schedule).await?;

    Ok(schedule)
}

fn validate_filter(filter: &crate::db::models::CreateAudienceFilter) -> AppResult<()> {
    if filter.gender.is_empty()
        && filter.platform.is_empty()
        && filter.age_min.is_none()
        && filter.age_max.is_none()
    {
        return Err(AppError::Validation(
            "at least one filter sub-field must be non-empty".into(),
        ));
    }
    for g in &filter.gender {
        let _: crate::domain::Gender = g.parse()?;
    }
    for p in &filter.platform {
        let _: crate::domain::Platform = p.parse()?;
    }
    if let (Some(min), Some(max)) = (filter.age_min, filter.age_max) {
        if min > max {
            return Err(AppError::Validation("age_min must be <= age_max".into()));
        }
    }
    if let Some(min) = filter.age_min {
        if min < MIN_AGE {
            return Err(AppError::Validation(format!("age_min must be >= {MIN_AGE}")));
        }
    }
    if let Some(max) = filter.age_max {
        if max > MAX_AGE {
            return Err(AppError::Validation(format!("age_max must be <= {MAX_AGE}")));
        }
    }
    Ok(())
}

fn non_empty_csv(values: &[String]) -> Option<String> {
    if values.is_empty() {
        None
    } else {
        Some(values.join(","))
    }
}

/// Pause transition: kill-switch off, status `paused`, and every
/// in-flight job for the schedule removed (including instant jobs still
/// waiting in the queue).
pub async fn pause_schedule(pool: &SqlitePool, schedule_id: &str) -> AppResult<Schedule> {
    let schedule = ScheduleRepository::require(pool, schedule_id).await?;
    let status = schedule.status()?;
    if status == ScheduleStatus::Completed || status == ScheduleStatus::Failed {
        return Err(AppError::Validation(
            "cannot pause a completed or failed schedule".into(),
        ));
    }

    // Already-paused is a no-op beyond re-removing any jobs that might
    // have slipped in (there shouldn't be any, but this keeps the
    // operation safe to repeat).
    ScheduledJobRepository::remove_all_for_schedule(pool, schedule_id).await?;
    ScheduleRepository::set_status(pool, schedule_id, ScheduleStatus::Paused.as_str(), false).await
}

/// Resume transition: requires `isActive=false, status=paused`; for
/// `once`, rejects with `ScheduleExpired` if `fireAt` has passed. Re-plans
/// exactly as at creation.
pub async fn resume_schedule(
    pool: &SqlitePool,
    clock: &dyn Clock,
    ids: &dyn IdGenerator,
    schedule_id: &str,
) -> AppResult<Schedule> {
    let schedule = ScheduleRepository::require(pool, schedule_id).await?;
    if schedule.is_active || schedule.status()? != ScheduleStatus::Paused {
        return Err(AppError::Validation(
            "schedule is not paused; cannot resume".into(),
        ));
    }

    let kind = schedule.kind()?;
    let next_status = match kind {
        ScheduleKind::Once => {
            let fire_at = schedule
                .fire_at
                .ok_or_else(|| AppError::Internal(anyhow::anyhow!("once schedule missing fire_at")))?;
            if fire_at <= clock.now().naive_utc() {
                return Err(AppError::ScheduleExpired);
            }
            ScheduleStatus::Pending
        }
        ScheduleKind::Daily => ScheduleStatus::Active,
        ScheduleKind::Instant => {
            return Err(AppError::Validation(
                "instant schedules cannot be paused/resumed".into(),
            ))
        }
    };

    let schedule =
        ScheduleRepository::set_status(pool, schedule_id, next_status.as_str(), true).await?;
    planner::plan_initial(pool, clock, ids, &schedule).await?;
    Ok(schedule)
}

/// Dispatches to pause or resume based on the boolean kill-switch in the
/// request body.
pub async fn set_status(
    pool: &SqlitePool,
    clock: &dyn Clock,
    ids: &dyn IdGenerator,
    schedule_id: &str,
    is_active: bool,
) -> AppResult<Schedule> {
    if is_active {
        resume_schedule(pool, clock, ids, schedule_id).await
    } else {
        pause_schedule(pool, schedule_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::ids::UuidGenerator;
    use chrono::TimeZone;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn base_request(kind: &str) -> CreateScheduleRequest {
        CreateScheduleRequest {
            title: "Hi".to_string(),
            body: "there".to_string(),
            kind: kind.to_string(),
            local_time: None,
            fire_at: None,
            category: None,
            audience: "all".to_string(),
            filter: None,
        }
    }

    #[tokio::test]
    async fn rejects_once_schedule_with_fire_at_equal_to_now() {
        let pool = memory_pool().await;
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let clock = FixedClock(now);
        let ids = UuidGenerator;

        let mut req = base_request("once");
        req.fire_at = Some(now);
        let result = create_schedule(&pool, &clock, &ids, req).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn rejects_daily_schedule_with_malformed_local_time() {
        let pool = memory_pool().await;
        let clock = FixedClock(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let ids = UuidGenerator;

        let mut req = base_request("daily");
        req.local_time = Some("24:00".to_string());
        assert!(create_schedule(&pool, &clock, &ids, req).await.is_err());

        let mut req = base_request("daily");
        req.local_time = Some("9:5".to_string());
        assert!(create_schedule(&pool, &clock, &ids, req).await.is_err());
    }

    #[tokio::test]
    async fn pause_removes_in_flight_jobs_and_resume_replans() {
        let pool = memory_pool().await;
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        sqlx::query(
            "INSERT INTO users (id, timezone, device_token, is_active, opted_out, created_at, updated_at) \
             VALUES ('u1', 'europe/london', 'tok', 1, 0, ?, ?)",
        )
        .bind(now.naive_utc())
        .bind(now.naive_utc())
        .execute(&pool)
        .await
        .unwrap();

        let clock = FixedClock(now);
        let ids = UuidGenerator;
        let mut req = base_request("daily");
        req.local_time = Some("09:00".to_string());
        let schedule = create_schedule(&pool, &clock, &ids, req).await.unwrap();

        assert_eq!(
            ScheduledJobRepository::jobs_in_flight_for_schedule(&pool, &schedule.id)
                .await
                .unwrap()
                .len(),
            1
        );

        let paused = pause_schedule(&pool, &schedule.id).await.unwrap();
        assert!(!paused.is_active);
        assert_eq!(paused.status, "paused");
        assert!(
            ScheduledJobRepository::jobs_in_flight_for_schedule(&pool, &schedule.id)
                .await
                .unwrap()
                .is_empty()
        );

        let resumed = resume_schedule(&pool, &clock, &ids, &schedule.id).await.unwrap();
        assert_eq!(resumed.status, "active");
        assert_eq!(
            ScheduledJobRepository::jobs_in_flight_for_schedule(&pool, &schedule.id)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn resume_of_expired_once_schedule_rejects() {
        let pool = memory_pool().await;
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let clock = FixedClock(now);
        let ids = UuidGenerator;

        let mut req = base_request("once");
        req.fire_at = Some(now + chrono::Duration::hours(1));
        let schedule = create_schedule(&pool, &clock, &ids, req).await.unwrap();
        pause_schedule(&pool, &schedule.id).await.unwrap();

        let later_clock = FixedClock(now + chrono::Duration::hours(2));
        let result = resume_schedule(&pool, &later_clock, &ids, &schedule.id).await;
        assert!(matches!(result, Err(AppError::ScheduleExpired)));
    }
}
