//! Retry pipeline.
//!
//! A `retry` job's payload carries exactly the tokens that failed
//! transiently in the original firing. Resubmits them to the gateway,
//! triages the result the same way the dispatch worker does, and either
//! surrenders (log + no further retry) or reschedules with exponential
//! backoff.

use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::models::{NewNotificationLog, RetryPayload, ScheduledJob};
use crate::db::repository::{NotificationLogRepository, ScheduleRepository, UserRepository};
use crate::domain::{classify_failure, FailureClass, LogStatus};
use crate::error::AppResult;
use crate::gateway::{PushGateway, PushPayload};

/// Base backoff: `60s * 2^attempt`, capped by `max_attempts`.
pub fn backoff_seconds(attempt: i64) -> i64 {
    60 * 2i64.pow(attempt.max(0) as u32)
}

/// Process one claimed `retry` job (already `attempt`-stamped by the
/// caller's `claim_due`/dispatch loop the same way an ordinary send job is).
pub async fn dispatch_retry(
    pool: &SqlitePool,
    gateway: &dyn PushGateway,
    job: &ScheduledJob,
) -> AppResult<()> {
    let payload: RetryPayload = serde_json::from_str(&job.payload_json)
        .map_err(|e| crate::error::AppError::Internal(anyhow::anyhow!(e)))?;

    if payload.failed_tokens.is_empty() {
        crate::db::repository::ScheduledJobRepository::remove(pool, &job.id).await?;
        return Ok(());
    }

    let push_payload = PushPayload {
        title: payload.title.clone(),
        body: payload.body.clone(),
        category: payload.category.clone(),
        schedule_id: payload.schedule_id.clone(),
    };

    let result = gateway
        .send_multicast(&payload.failed_tokens, &push_payload)
        .await?;

    let mut permanent_tokens = Vec::new();
    let mut retryable_tokens = Vec::new();
    for failure in &result.failures {
        match classify_failure(&failure.error_code) {
            FailureClass::Permanent => permanent_tokens.push(failure.token.clone()),
            FailureClass::Retryable => retryable_tokens.push(failure.token.clone()),
        }
    }

    for token in &permanent_tokens {
        if let Some(user_id) = UserRepository::find_by_device_token(pool, token).await? {
            UserRepository::clear_device_token(pool, &user_id).await?;
        }
    }

    // Update the per-recipient logs this retry resolved. A token's original
    // `notification_log` row stays `failed` if this retry also failed for
    // it; successes are recorded as fresh `sent` rows rather than mutating
    // history in place, keeping the log append-only.
    let succeeded_tokens: Vec<&String> = payload
        .failed_tokens
        .iter()
        .filter(|t| !result.failures.iter().any(|f| &f.token == *t))
        .collect();

    if !succeeded_tokens.is_empty() {
        let mut logs = Vec::new();
        for token in &succeeded_tokens {
            if let Some(user_id) = UserRepository::find_by_device_token(pool, token).await? {
                logs.push(NewNotificationLog {
                    schedule_id: payload.schedule_id.clone(),
                    user_id,
                    title: payload.title.clone(),
                    body: payload.body.clone(),
                    category: payload.category.clone(),
                    status: LogStatus::Sent.as_str().to_string(),
                    error_message: None,
                    device_token: Some((*token).clone()),
                });
            }
        }
        NotificationLogRepository::insert_many(pool, logs).await?;
    }

    // Permanent failures were already counted against the schedule on the
    // firing that first produced this retry job; only the still-outstanding
    // retryable tokens go into this attempt's delta.
    ScheduleRepository::record_firing(
        pool,
        &payload.schedule_id,
        0,
        succeeded_tokens.len() as i64,
        retryable_tokens.len() as i64,
        crate::domain::HistoryStatus::from_counts(
            payload.failed_tokens.len() as i64,
            succeeded_tokens.len() as i64,
        )
        .as_str(),
        if retryable_tokens.is_empty() && permanent_tokens.is_empty() {
            None
        } else {
            Some("retry pipeline")
        },
    )
    .await?;

    if retryable_tokens.is_empty() {
        // All outcomes for this attempt are now definitive (success or
        // permanent); nothing left to resend. The job's done.
        crate::db::repository::ScheduledJobRepository::remove(pool, &job.id).await?;
        return Ok(());
    }

    // Exhausted max_attempts: surrender, no further retry. The remaining
    // tokens are dropped and surfaced only via this warning log.
    if job.attempt + 1 >= job.max_attempts {
        tracing::warn!(
            schedule_id = %payload.schedule_id,
            remaining = retryable_tokens.len(),
            "retry pipeline exhausted max_attempts, surrendering remaining tokens"
        );
        crate::db::repository::ScheduledJobRepository::remove(pool, &job.id).await?;
        return Ok(());
    }

    let next_payload = RetryPayload {
        schedule_id: payload.schedule_id.clone(),
        failed_tokens: retryable_tokens,
        title: payload.title,
        body: payload.body,
        category: payload.category,
    };
    let next_run_at =
        Utc::now().naive_utc() + chrono::Duration::seconds(backoff_seconds(job.attempt + 1));
    let payload_json = serde_json::to_string(&next_payload)
        .map_err(|e| crate::error::AppError::Internal(anyhow::anyhow!(e)))?;

    crate::db::repository::ScheduledJobRepository::register_attempt_and_reschedule(
        pool,
        &job.id,
        next_run_at,
        None,
    )
    .await?;
    // The reschedule above bumps `attempt`/`run_at` in place; the payload's
    // shrunk token list must be written back too since `register_attempt_and_reschedule`
    // only touches the bookkeeping columns.
    sqlx::query("UPDATE scheduled_jobs SET payload_json = ? WHERE id = ?")
        .bind(&payload_json)
        .bind(&job.id)
        .execute(pool)
        .await
        .map_err(crate::error::AppError::Database)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::EnqueueJob;
    use crate::db::repository::ScheduledJobRepository;
    use crate::gateway::mock::MockGateway;
    use crate::gateway::{MulticastResult, PushFailure};

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

    async fn seed_schedule(pool: &SqlitePool) {
        ScheduleRepository::create(
            pool, "s1", "Hi", "there", "instant", None, None, None, "all", None, None, None,
            None, "pending",
        )
        .await
        .unwrap();
    }

    fn retry_job(tokens: Vec<String>, attempt: i64) -> ScheduledJob {
        let payload = RetryPayload {
            schedule_id: "s1".to_string(),
            failed_tokens: tokens,
            title: "Hi".to_string(),
            body: "there".to_string(),
            category: None,
        };
        ScheduledJob {
            id: "retry-1".to_string(),
            kind: "retry".to_string(),
            schedule_id: Some("s1".to_string()),
            timezone: None,
            payload_json: serde_json::to_string(&payload).unwrap(),
            status: "active".to_string(),
            run_at: Utc::now().naive_utc(),
            attempt,
            max_attempts: 3,
            last_error: None,
            created_at: Utc::now().naive_utc(),
            updated_at: Utc::now().naive_utc(),
        }
    }

    #[tokio::test]
    async fn successful_retry_logs_sent_and_does_not_reschedule() {
        let pool = memory_pool().await;
        seed_user(&pool, "u1", "TA").await;
        seed_schedule(&pool).await;
        let gateway = MockGateway::default();

        let job = retry_job(vec!["TA".to_string()], 0);
        let jobs = {
            // insert the job row so a follow-up reschedule (if any) has somewhere to land
            let enqueue = EnqueueJob {
                id: job.id.clone(),
                kind: job.kind.clone(),
                schedule_id: job.schedule_id.clone(),
                timezone: job.timezone.clone(),
                payload_json: job.payload_json.clone(),
                run_at: job.run_at,
                max_attempts: job.max_attempts,
            };
            ScheduledJobRepository::enqueue(&pool, enqueue).await.unwrap();
            ScheduledJobRepository::claim_due(&pool, 10).await.unwrap()
        };
        let claimed = &jobs[0];

        dispatch_retry(&pool, &gateway, claimed).await.unwrap();

        let logs = NotificationLogRepository::find_by_user(&pool, "u1", 10, 0)
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, "sent");
    }

    #[tokio::test]
    async fn transient_failure_within_attempt_budget_reschedules_with_backoff() {
        let pool = memory_pool().await;
        seed_user(&pool, "u1", "TB").await;
        seed_schedule(&pool).await;
        let gateway = MockGateway::default();
        gateway.scripted.lock().unwrap().push(MulticastResult {
            success_count: 0,
            failure_count: 1,
            failures: vec![PushFailure {
                token: "TB".to_string(),
                error_code: "timeout".to_string(),
            }],
        });

        let job = retry_job(vec!["TB".to_string()], 0);
        let enqueue = EnqueueJob {
            id: job.id.clone(),
            kind: job.kind.clone(),
            schedule_id: job.schedule_id.clone(),
            timezone: job.timezone.clone(),
            payload_json: job.payload_json.clone(),
            run_at: job.run_at,
            max_attempts: job.max_attempts,
        };
        ScheduledJobRepository::enqueue(&pool, enqueue).await.unwrap();
        let claimed = ScheduledJobRepository::claim_due(&pool, 10).await.unwrap();

        dispatch_retry(&pool, &gateway, &claimed[0]).await.unwrap();

        let reloaded: ScheduledJob =
            sqlx::query_as("SELECT * FROM scheduled_jobs WHERE id = ?")
                .bind(&job.id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(reloaded.attempt, 1);
        assert_eq!(reloaded.status, "waiting");
        assert!(reloaded.run_at > Utc::now().naive_utc());
    }

    #[test]
    fn backoff_doubles_each_attempt() {
        assert_eq!(backoff_seconds(0), 60);
        assert_eq!(backoff_seconds(1), 120);
        assert_eq!(backoff_seconds(2), 240);
    }
}
