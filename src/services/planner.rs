//! Occurrence planner.
//!
//! For a daily schedule, ensures exactly one pending job per distinct
//! eligible timezone, and creates the next occurrence after a firing.
//! Every entry point either starts from a clean slate (create/resume,
//! which first remove any prior jobs) or checks "is a job already pending
//! for this tuple" before enqueuing (the recursive re-plan and the
//! discovery hook).

use chrono::Utc;
use sqlx::SqlitePool;

use crate::clock::Clock;
use crate::db::models::{EnqueueJob, Schedule};
use crate::db::repository::{ScheduledJobRepository, UserRepository};
use crate::domain::ScheduleKind;
use crate::error::AppResult;
use crate::ids::{daily_job_id, once_job_id, IdGenerator};
use crate::services::audience;
use crate::timezone;

/// Plan every job a freshly created or resumed schedule needs.
pub async fn plan_initial(
    pool: &SqlitePool,
    clock: &dyn Clock,
    ids: &dyn IdGenerator,
    schedule: &Schedule,
) -> AppResult<usize> {
    match schedule.kind()? {
        ScheduleKind::Instant => {
            let job = EnqueueJob {
                id: ids.new_id(),
                kind: "instant_send".to_string(),
                schedule_id: Some(schedule.id.clone()),
                timezone: None,
                payload_json: "{}".to_string(),
                run_at: clock.now().naive_utc(),
                max_attempts: 3,
            };
            ScheduledJobRepository::enqueue(pool, job).await?;
            Ok(1)
        }
        ScheduleKind::Once => {
            let fire_at = schedule
                .fire_at
                .ok_or_else(|| crate::error::AppError::Validation(
                    "once schedule missing fire_at".to_string(),
                ))?;
            let job = EnqueueJob {
                id: once_job_id(&schedule.id, fire_at),
                kind: "once_send".to_string(),
                schedule_id: Some(schedule.id.clone()),
                timezone: None,
                payload_json: "{}".to_string(),
                run_at: fire_at,
                max_attempts: 3,
            };
            ScheduledJobRepository::enqueue(pool, job).await?;
            Ok(1)
        }
        ScheduleKind::Daily => plan_daily_all_timezones(pool, clock, ids, schedule).await,
    }
}

/// Enqueue one `daily_timezone_send` job per distinct timezone present in
/// the schedule's eligible audience.
pub async fn plan_daily_all_timezones(
    pool: &SqlitePool,
    clock: &dyn Clock,
    ids: &dyn IdGenerator,
    schedule: &Schedule,
) -> AppResult<usize> {
    let timezones = eligible_timezones_for(pool, schedule).await?;
    let mut planned = 0;
    for tz in timezones {
        if plan_one_timezone(pool, clock, ids, schedule, &tz).await? {
            planned += 1;
        }
    }
    Ok(planned)
}

/// Timezones present in the *eligible* population for this schedule (i.e.
/// that also satisfy its filter, if any) — narrower than "every timezone any
/// user has".
async fn eligible_timezones_for(pool: &SqlitePool, schedule: &Schedule) -> AppResult<Vec<String>> {
    let all_timezones = UserRepository::distinct_eligible_timezones(pool).await?;
    let mut eligible = Vec::new();
    for tz in all_timezones {
        let count = audience::count_eligible(pool, schedule, Some(&tz)).await?;
        if count > 0 {
            eligible.push(tz);
        }
    }
    Ok(eligible)
}

/// Enqueue a single (schedule, timezone) daily job if none is already
/// pending for that tuple (the duplicate-guard shared with discovery).
/// Returns whether a new job was actually enqueued.
pub async fn plan_one_timezone(
    pool: &SqlitePool,
    clock: &dyn Clock,
    ids: &dyn IdGenerator,
    schedule: &Schedule,
    canonical_timezone: &str,
) -> AppResult<bool> {
    if ScheduledJobRepository::has_pending_for_timezone(pool, &schedule.id, canonical_timezone)
        .await?
    {
        return Ok(false);
    }

    let local_time_str = schedule.local_time.as_deref().ok_or_else(|| {
        crate::error::AppError::Validation("daily schedule missing local_time".to_string())
    })?;
    let local_time = timezone::parse_local_time(local_time_str)?;
    let tz = timezone::resolve(canonical_timezone)?;
    let now = clock.now();
    let run_at = timezone::next_occurrence_utc(local_time, tz, now);

    let job = EnqueueJob {
        id: daily_job_id(&schedule.id, canonical_timezone, run_at.timestamp_millis()),
        kind: "daily_timezone_send".to_string(),
        schedule_id: Some(schedule.id.clone()),
        timezone: Some(canonical_timezone.to_string()),
        payload_json: "{}".to_string(),
        run_at: run_at.naive_utc(),
        max_attempts: 3,
    };
    let inserted = ScheduledJobRepository::enqueue(pool, job).await?;
    let _ = ids; // id is derived from run_at for daily jobs, not the generator
    Ok(inserted)
}

/// Compute the next occurrence for the same timezone after a firing and
/// enqueue it with a fresh unique id, leaving the just-completed job to be
/// removed by the caller.
pub async fn replan_after_firing(
    pool: &SqlitePool,
    schedule: &Schedule,
    canonical_timezone: &str,
    fired_at: chrono::DateTime<Utc>,
) -> AppResult<()> {
    let local_time_str = schedule.local_time.as_deref().ok_or_else(|| {
        crate::error::AppError::Validation("daily schedule missing local_time".to_string())
    })?;
    let local_time = timezone::parse_local_time(local_time_str)?;
    let tz = timezone::resolve(canonical_timezone)?;
    let run_at = timezone::next_occurrence_after(local_time, tz, fired_at);

    let job = EnqueueJob {
        id: daily_job_id(&schedule.id, canonical_timezone, run_at.timestamp_millis()),
        kind: "daily_timezone_send".to_string(),
        schedule_id: Some(schedule.id.clone()),
        timezone: Some(canonical_timezone.to_string()),
        payload_json: "{}".to_string(),
        run_at: run_at.naive_utc(),
        max_attempts: 3,
    };
    ScheduledJobRepository::enqueue(pool, job).await?;
    Ok(())
}

/// Discovery sweep. Scans every `active` daily schedule and enqueues a job
/// for any `(scheduleId, timezone)` pair present in the population but not
/// already pending. `skip` lets the caller avoid double-enqueuing the
/// timezone it just finished firing.
pub async fn discovery_sweep(
    pool: &SqlitePool,
    clock: &dyn Clock,
    ids: &dyn IdGenerator,
    skip: Option<(&str, &str)>,
) -> AppResult<usize> {
    use crate::db::repository::ScheduleRepository;

    let schedules = ScheduleRepository::active_daily(pool).await?;
    let mut planned = 0;
    for schedule in schedules {
        let timezones = eligible_timezones_for(pool, &schedule).await?;
        for tz in timezones {
            if let Some((skip_schedule, skip_tz)) = skip {
                if skip_schedule == schedule.id && skip_tz == tz {
                    continue;
                }
            }
            if plan_one_timezone(pool, clock, ids, &schedule, &tz).await? {
                planned += 1;
            }
        }
    }
    Ok(planned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::repository::ScheduleRepository;
    use crate::ids::UuidGenerator;
    use chrono::TimeZone;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    async fn seed_user(pool: &SqlitePool, id: &str, tz: &str) {
        let now = Utc::now().naive_utc();
        sqlx::query(
            "INSERT INTO users (id, timezone, device_token, is_active, opted_out, created_at, updated_at) \
             VALUES (?, ?, 'tok', 1, 0, ?, ?)",
        )
        .bind(id)
        .bind(tz)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn plan_initial_shards_daily_schedule_by_distinct_timezone() {
        let pool = memory_pool().await;
        seed_user(&pool, "u1", "europe/london").await;
        seed_user(&pool, "u2", "asia/tokyo").await;
        seed_user(&pool, "u3", "europe/london").await;

        let schedule = ScheduleRepository::create(
            &pool, "s1", "Hi", "there", "daily", Some("09:00"), None, None, "all", None, None,
            None, None, "active",
        )
        .await
        .unwrap();

        let clock = FixedClock(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let ids = UuidGenerator;
        let planned = plan_initial(&pool, &clock, &ids, &schedule).await.unwrap();
        assert_eq!(planned, 2);

        let in_flight = ScheduledJobRepository::jobs_in_flight_for_schedule(&pool, "s1")
            .await
            .unwrap();
        assert_eq!(in_flight.len(), 2);
    }

    #[tokio::test]
    async fn plan_one_timezone_is_a_noop_when_already_pending() {
        let pool = memory_pool().await;
        seed_user(&pool, "u1", "europe/london").await;
        let schedule = ScheduleRepository::create(
            &pool, "s1", "Hi", "there", "daily", Some("09:00"), None, None, "all", None, None,
            None, None, "active",
        )
        .await
        .unwrap();

        let clock = FixedClock(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let ids = UuidGenerator;
        assert!(plan_one_timezone(&pool, &clock, &ids, &schedule, "europe/london")
            .await
            .unwrap());
        assert!(!plan_one_timezone(&pool, &clock, &ids, &schedule, "europe/london")
            .await
            .unwrap());
    }
}
