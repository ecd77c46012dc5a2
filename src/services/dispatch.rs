//! Dispatch worker. The shared `dispatch(schedule, timezone?)` routine
//! behind every job kind: load & gate, resolve audience, batched send,
//! failure triage, persist logs/history, and (daily only) recursive
//! re-plan + discovery sweep.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::Semaphore;

use crate::clock::Clock;
use crate::db::models::{NewNotificationHistory, NewNotificationLog, RetryPayload, ScheduledJob};
use crate::db::repository::{
    NotificationHistoryRepository, NotificationLogRepository, ScheduleRepository, UserRepository,
};
use crate::domain::{classify_failure, FailureClass, HistoryStatus, LogStatus};
use crate::error::AppResult;
use crate::gateway::{MulticastResult, PushFailure, PushGateway, PushPayload, MAX_BATCH_SIZE};
use crate::ids::IdGenerator;
use crate::services::{audience, planner};

/// Outcome of one firing, returned for logging/testing visibility.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub total_targeted: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub history_status: HistoryStatus,
    pub skipped: bool,
}

impl DispatchOutcome {
    fn skipped() -> Self {
        DispatchOutcome {
            total_targeted: 0,
            success_count: 0,
            failure_count: 0,
            history_status: HistoryStatus::Failed,
            skipped: true,
        }
    }
}

/// Dispatch a single claimed job. `batch_concurrency` bounds how many
/// gateway batches are actually in flight per job at once: each batch runs
/// as its own spawned task holding an owned semaphore permit, released when
/// the batch completes.
#[allow(clippy::too_many_arguments)]
pub async fn dispatch_job(
    pool: &SqlitePool,
    clock: &dyn Clock,
    ids: &dyn IdGenerator,
    gateway: Arc<dyn PushGateway>,
    job: &ScheduledJob,
    batch_concurrency: usize,
) -> AppResult<DispatchOutcome> {
    let Some(schedule_id) = job.schedule_id.as_deref() else {
        tracing::warn!(job_id = %job.id, "job has no schedule_id, dropping");
        return Ok(DispatchOutcome::skipped());
    };

    // Load & gate. Missing schedule -> drop, no retry.
    let schedule = match ScheduleRepository::find_by_id(pool, schedule_id).await? {
        Some(s) => s,
        None => {
            tracing::info!(schedule_id, "schedule not found, dropping job");
            return Ok(DispatchOutcome::skipped());
        }
    };

    if !schedule.is_active {
        tracing::info!(schedule_id, "schedule inactive, skipping firing");
        return Ok(DispatchOutcome::skipped());
    }

    let timezone = job.timezone.clone();
    let outcome = run_firing(
        pool,
        clock,
        gateway,
        &schedule,
        timezone.as_deref(),
        batch_concurrency,
    )
    .await?;

    // Daily schedules re-plan the next occurrence and sweep for newly
    // discovered timezones; once/instant schedules terminate.
    if schedule.kind()? == crate::domain::ScheduleKind::Daily {
        if let Some(tz) = timezone.as_deref() {
            planner::replan_after_firing(pool, &schedule, tz, clock.now()).await?;
            planner::discovery_sweep(pool, clock, ids, Some((schedule_id, tz))).await?;
        }
    } else {
        let terminal = if outcome.history_status == HistoryStatus::Failed {
            crate::domain::ScheduleStatus::Failed
        } else {
            crate::domain::ScheduleStatus::Completed
        };
        ScheduleRepository::set_terminal_status(pool, schedule_id, terminal.as_str()).await?;
    }

    Ok(outcome)
}

/// The shared core routine: resolve the audience, send in batches, triage
/// failures, and persist logs/history + schedule counters.
async fn run_firing(
    pool: &SqlitePool,
    clock: &dyn Clock,
    gateway: Arc<dyn PushGateway>,
    schedule: &crate::db::models::Schedule,
    timezone: Option<&str>,
    batch_concurrency: usize,
) -> AppResult<DispatchOutcome> {
    let fired_at = clock.now().naive_utc();

    // Resolve audience, paged.
    let mut targeted: Vec<crate::db::models::User> = Vec::new();
    let mut after_id: Option<String> = None;
    loop {
        let page = audience::fetch_page(
            pool,
            schedule,
            timezone,
            after_id.as_deref(),
            audience::PAGE_SIZE,
        )
        .await?;
        if page.is_empty() {
            break;
        }
        after_id = page.last().map(|u| u.id.clone());
        let page_len = page.len();
        targeted.extend(page.into_iter().filter(|u| u.has_deliverable_token()));
        if (page_len as i64) < audience::PAGE_SIZE {
            break;
        }
    }

    // No-recipients branch.
    if targeted.is_empty() {
        NotificationHistoryRepository::create(
            pool,
            NewNotificationHistory {
                schedule_id: schedule.id.clone(),
                timezone: timezone.map(|t| t.to_string()),
                fired_at,
                total_targeted: 0,
                success_count: 0,
                failure_count: 0,
                status: HistoryStatus::Failed.as_str().to_string(),
                error_message: Some("no valid users".to_string()),
            },
        )
        .await?;
        ScheduleRepository::record_firing(
            pool,
            &schedule.id,
            0,
            0,
            0,
            HistoryStatus::Failed.as_str(),
            Some("no valid users"),
        )
        .await?;
        return Ok(DispatchOutcome {
            total_targeted: 0,
            success_count: 0,
            failure_count: 0,
            history_status: HistoryStatus::Failed,
            skipped: false,
        });
    }

    let payload = PushPayload {
        title: schedule.title.clone(),
        body: schedule.body.clone(),
        category: schedule.category.clone(),
        schedule_id: schedule.id.clone(),
    };

    // Batched send, bounded concurrency.
    let result = send_in_batches(gateway, &targeted, &payload, batch_concurrency).await?;

    // Failure triage.
    let mut permanent_tokens = Vec::new();
    let mut retryable_tokens = Vec::new();
    for failure in &result.failures {
        match classify_failure(&failure.error_code) {
            FailureClass::Permanent => permanent_tokens.push(failure.token.clone()),
            FailureClass::Retryable => retryable_tokens.push(failure.token.clone()),
        }
    }

    for token in &permanent_tokens {
        if let Some(user) = targeted.iter().find(|u| u.device_token.as_deref() == Some(token.as_str())) {
            UserRepository::clear_device_token(pool, &user.id).await?;
        }
    }

    if !retryable_tokens.is_empty() {
        enqueue_retry(pool, schedule, &payload, retryable_tokens.clone()).await?;
    }

    // Persist logs + history, update schedule counters.
    let failed_tokens: std::collections::HashSet<&str> =
        result.failures.iter().map(|f| f.token.as_str()).collect();
    let logs: Vec<NewNotificationLog> = targeted
        .iter()
        .map(|u| {
            let token = u.device_token.clone().unwrap_or_default();
            let failed = failed_tokens.contains(token.as_str());
            NewNotificationLog {
                schedule_id: schedule.id.clone(),
                user_id: u.id.clone(),
                title: schedule.title.clone(),
                body: schedule.body.clone(),
                category: schedule.category.clone(),
                status: if failed {
                    LogStatus::Failed.as_str().to_string()
                } else {
                    LogStatus::Sent.as_str().to_string()
                },
                error_message: None,
                device_token: Some(token),
            }
        })
        .collect();
    NotificationLogRepository::insert_many(pool, logs).await?;

    let total_targeted = targeted.len() as i64;
    let success_count = result.success_count as i64;
    let failure_count = result.failure_count as i64;
    let history_status = HistoryStatus::from_counts(total_targeted, success_count);

    NotificationHistoryRepository::create(
        pool,
        NewNotificationHistory {
            schedule_id: schedule.id.clone(),
            timezone: timezone.map(|t| t.to_string()),
            fired_at,
            total_targeted,
            success_count,
            failure_count,
            status: history_status.as_str().to_string(),
            error_message: None,
        },
    )
    .await?;

    ScheduleRepository::record_firing(
        pool,
        &schedule.id,
        total_targeted,
        success_count,
        failure_count,
        history_status.as_str(),
        None,
    )
    .await?;

    Ok(DispatchOutcome {
        total_targeted,
        success_count,
        failure_count,
        history_status,
        skipped: false,
    })
}

/// Submit tokens to the gateway in chunks of <= `MAX_BATCH_SIZE`,
/// `batch_concurrency` chunks in flight at once, aggregating results.
async fn send_in_batches(
    gateway: Arc<dyn PushGateway>,
    targeted: &[crate::db::models::User],
    payload: &PushPayload,
    batch_concurrency: usize,
) -> AppResult<MulticastResult> {
    let tokens: Vec<String> = targeted
        .iter()
        .filter_map(|u| u.device_token.clone())
        .collect();

    let chunks: Vec<Vec<String>> = tokens
        .chunks(MAX_BATCH_SIZE)
        .map(|c| c.to_vec())
        .collect();

    let semaphore = Arc::new(Semaphore::new(batch_concurrency.max(1)));
    let mut handles = Vec::new();

    for chunk in chunks {
        let permit = semaphore.clone().acquire_owned().await.expect("semaphore closed");
        let gateway = gateway.clone();
        let payload = payload.clone();
        handles.push(tokio::spawn(async move {
            let result = gateway.send_multicast(&chunk, &payload).await;
            drop(permit);
            result
        }));
    }

    let mut aggregate = MulticastResult::default();
    for handle in handles {
        let result = handle
            .await
            .map_err(|e| crate::error::AppError::Internal(anyhow::anyhow!(e)))??;
        aggregate.success_count += result.success_count;
        aggregate.failure_count += result.failure_count;
        aggregate.failures.extend(result.failures);
    }
    Ok(aggregate)
}

/// Enqueue a retry job for the retryable subset of this firing's failures,
/// `attempt=1`.
async fn enqueue_retry(
    pool: &SqlitePool,
    schedule: &crate::db::models::Schedule,
    payload: &PushPayload,
    failed_tokens: Vec<String>,
) -> AppResult<()> {
    let retry_payload = RetryPayload {
        schedule_id: schedule.id.clone(),
        failed_tokens,
        title: payload.title.clone(),
        body: payload.body.clone(),
        category: payload.category.clone(),
    };
    let payload_json = serde_json::to_string(&retry_payload)
        .map_err(|e| crate::error::AppError::Internal(anyhow::anyhow!(e)))?;

    let job = crate::db::models::EnqueueJob {
        id: uuid::Uuid::new_v4().to_string(),
        kind: "retry".to_string(),
        schedule_id: Some(schedule.id.clone()),
        timezone: None,
        payload_json,
        run_at: Utc::now().naive_utc() + chrono::Duration::seconds(60),
        max_attempts: 3,
    };
    crate::db::repository::ScheduledJobRepository::enqueue(pool, job).await?;
    Ok(())
}

#[allow(dead_code)]
fn summarize_failures(failures: &[PushFailure]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for f in failures {
        *counts.entry(f.error_code.clone()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::repository::{ScheduleRepository, ScheduledJobRepository};
    use crate::gateway::mock::MockGateway;
    use crate::gateway::PushFailure;
    use crate::ids::UuidGenerator;
    use chrono::TimeZone;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    async fn seed_user(pool: &SqlitePool, id: &str, token: &str) {
        let now = Utc::now().naive_utc();
        sqlx::query(
            "INSERT INTO users (id, timezone, device_token, is_active, opted_out, created_at, updated_at) \
             VALUES (?, 'europe/london', ?, 1, 0, ?, ?)",
        )
        .bind(id)
        .bind(token)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn instant_schedule_all_succeed_completes_and_logs_sent() {
        let pool = memory_pool().await;
        seed_user(&pool, "u1", "TA").await;
        seed_user(&pool, "u2", "TB").await;

        let clock = FixedClock(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let ids = UuidGenerator;
        let gateway = MockGateway::default();

        let schedule = ScheduleRepository::create(
            &pool, "s1", "Hi", "there", "instant", None, None, None, "all", None, None, None,
            None, "pending",
        )
        .await
        .unwrap();
        crate::services::planner::plan_initial(&pool, &clock, &ids, &schedule)
            .await
            .unwrap();

        let jobs = ScheduledJobRepository::claim_due(&pool, 10).await.unwrap();
        assert_eq!(jobs.len(), 1);

        let outcome = dispatch_job(&pool, &clock, &ids, Arc::new(gateway), &jobs[0], 4)
            .await
            .unwrap();
        assert_eq!(outcome.total_targeted, 2);
        assert_eq!(outcome.success_count, 2);
        assert_eq!(outcome.history_status, HistoryStatus::Sent);

        let updated = ScheduleRepository::find_by_id(&pool, "s1").await.unwrap().unwrap();
        assert_eq!(updated.status, "completed");
    }

    #[tokio::test]
    async fn permanent_failure_clears_token_and_marks_log_failed() {
        let pool = memory_pool().await;
        seed_user(&pool, "u1", "TX").await;

        let clock = FixedClock(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let ids = UuidGenerator;
        let gateway = MockGateway::default();
        gateway.scripted.lock().unwrap().push(MulticastResult {
            success_count: 0,
            failure_count: 1,
            failures: vec![PushFailure {
                token: "TX".to_string(),
                error_code: "unregistered".to_string(),
            }],
        });

        let schedule = ScheduleRepository::create(
            &pool, "s1", "Hi", "there", "instant", None, None, None, "all", None, None, None,
            None, "pending",
        )
        .await
        .unwrap();
        crate::services::planner::plan_initial(&pool, &clock, &ids, &schedule)
            .await
            .unwrap();
        let jobs = ScheduledJobRepository::claim_due(&pool, 10).await.unwrap();

        let outcome = dispatch_job(&pool, &clock, &ids, Arc::new(gateway), &jobs[0], 4)
            .await
            .unwrap();
        assert_eq!(outcome.history_status, HistoryStatus::Failed);

        let user = crate::db::repository::UserRepository::find_by_id(&pool, "u1")
            .await
            .unwrap()
            .unwrap();
        assert!(user.device_token.is_none());

        // No retry job for a permanent failure.
        let in_flight = ScheduledJobRepository::jobs_in_flight_for_schedule(&pool, "s1")
            .await
            .unwrap();
        assert!(in_flight.is_empty());
    }

    #[tokio::test]
    async fn transient_failure_enqueues_a_retry_job() {
        let pool = memory_pool().await;
        seed_user(&pool, "u1", "TY").await;

        let clock = FixedClock(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let ids = UuidGenerator;
        let gateway = MockGateway::default();
        gateway.scripted.lock().unwrap().push(MulticastResult {
            success_count: 0,
            failure_count: 1,
            failures: vec![PushFailure {
                token: "TY".to_string(),
                error_code: "timeout".to_string(),
            }],
        });

        let schedule = ScheduleRepository::create(
            &pool, "s1", "Hi", "there", "instant", None, None, None, "all", None, None, None,
            None, "pending",
        )
        .await
        .unwrap();
        crate::services::planner::plan_initial(&pool, &clock, &ids, &schedule)
            .await
            .unwrap();
        let jobs = ScheduledJobRepository::claim_due(&pool, 10).await.unwrap();
        dispatch_job(&pool, &clock, &ids, Arc::new(gateway), &jobs[0], 4)
            .await
            .unwrap();

        let in_flight = ScheduledJobRepository::jobs_in_flight_for_schedule(&pool, "s1")
            .await
            .unwrap();
        assert_eq!(in_flight.len(), 1);
        assert_eq!(in_flight[0].kind, "retry");
    }

    #[tokio::test]
    async fn no_eligible_recipients_marks_history_failed_with_message() {
        let pool = memory_pool().await;
        let clock = FixedClock(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let ids = UuidGenerator;
        let gateway = MockGateway::default();

        let schedule = ScheduleRepository::create(
            &pool, "s1", "Hi", "there", "instant", None, None, None, "all", None, None, None,
            None, "pending",
        )
        .await
        .unwrap();
        crate::services::planner::plan_initial(&pool, &clock, &ids, &schedule)
            .await
            .unwrap();
        let jobs = ScheduledJobRepository::claim_due(&pool, 10).await.unwrap();

        let outcome = dispatch_job(&pool, &clock, &ids, Arc::new(gateway), &jobs[0], 4)
            .await
            .unwrap();
        assert_eq!(outcome.total_targeted, 0);
        assert_eq!(outcome.history_status, HistoryStatus::Failed);

        let updated = ScheduleRepository::find_by_id(&pool, "s1").await.unwrap().unwrap();
        assert_eq!(updated.status, "failed");
    }
}
