//! Timezone discovery hook.
//!
//! Handles `POST /fcm-token`: persist the device registration, then — if
//! the timezone or token is new for this user, or this is their first
//! device — plan a job for every active daily schedule against their (now
//! current) timezone, so they don't have to wait for the periodic
//! discovery sweep.

use sqlx::SqlitePool;

use crate::clock::Clock;
use crate::db::models::RegisterDevice;
use crate::db::repository::{ScheduleRepository, UserRepository};
use crate::error::AppResult;
use crate::ids::IdGenerator;
use crate::services::{audience, planner};
use crate::timezone;

/// Outcome surfaced back to the HTTP layer.
#[derive(Debug, Clone)]
pub struct RegisterDeviceOutcome {
    pub canonical_timezone: String,
    pub discovery_triggered: bool,
    pub schedules_planned: usize,
}

pub async fn register_device(
    pool: &SqlitePool,
    clock: &dyn Clock,
    ids: &dyn IdGenerator,
    req: RegisterDevice,
) -> AppResult<RegisterDeviceOutcome> {
    let canonical_timezone = timezone::canonicalize(&req.timezone)?;
    // Validate it resolves to a real IANA zone before it ever lands in a
    // user row.
    timezone::resolve(&canonical_timezone)?;

    let outcome = UserRepository::upsert_device(
        pool,
        &req.user_id,
        &req.token,
        &req.platform,
        &canonical_timezone,
    )
    .await?;

    let mut planned = 0;
    if outcome.should_trigger_discovery() {
        let schedules = ScheduleRepository::active_daily(pool).await?;
        for schedule in schedules {
            let count =
                audience::count_eligible(pool, &schedule, Some(&canonical_timezone)).await?;
            if count == 0 {
                continue;
            }
            if planner::plan_one_timezone(pool, clock, ids, &schedule, &canonical_timezone)
                .await?
            {
                planned += 1;
            }
        }
    }

    Ok(RegisterDeviceOutcome {
        canonical_timezone,
        discovery_triggered: outcome.should_trigger_discovery(),
        schedules_planned: planned,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::ids::UuidGenerator;
    use chrono::{TimeZone, Utc};

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn first_registration_plans_every_active_daily_schedule() {
        let pool = memory_pool().await;
        ScheduleRepository::create(
            &pool, "s1", "Hi", "there", "daily", Some("09:00"), None, None, "all", None, None,
            None, None, "active",
        )
        .await
        .unwrap();

        let clock = FixedClock(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let ids = UuidGenerator;

        let outcome = register_device(
            &pool,
            &clock,
            &ids,
            RegisterDevice {
                user_id: "u1".to_string(),
                token: "TOK".to_string(),
                platform: "ios".to_string(),
                timezone: "Europe/London".to_string(),
            },
        )
        .await
        .unwrap();

        assert!(outcome.discovery_triggered);
        assert_eq!(outcome.schedules_planned, 1);
        assert_eq!(outcome.canonical_timezone, "europe/london");
    }

    #[tokio::test]
    async fn unchanged_registration_does_not_retrigger_discovery() {
        let pool = memory_pool().await;
        let clock = FixedClock(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let ids = UuidGenerator;
        let req = || RegisterDevice {
            user_id: "u1".to_string(),
            token: "TOK".to_string(),
            platform: "ios".to_string(),
            timezone: "Europe/London".to_string(),
        };

        let first = register_device(&pool, &clock, &ids, req()).await.unwrap();
        assert!(first.discovery_triggered);

        let second = register_device(&pool, &clock, &ids, req()).await.unwrap();
        assert!(!second.discovery_triggered);
        assert_eq!(second.schedules_planned, 0);
    }
}
