use chrono::{NaiveDateTime, Utc};
use sqlx::SqlitePool;

use crate::db::models::{EnqueueJob, ScheduledJob};
use crate::error::{AppError, AppResult};

/// Job identity & queue adapter. Realizes the conceptual queue interface
/// (`enqueue`/`getJobsByState`/`removeById`/claim-for-dispatch) as the
/// `scheduled_jobs` table, using an atomic-claim pattern
/// (`UPDATE ... WHERE id = (SELECT id ... LIMIT 1) RETURNING ...`, avoiding a
/// long-lived transaction under SQLite).
pub struct ScheduledJobRepository;

impl ScheduledJobRepository {
    /// Enqueue a job. Stable job ids make re-enqueuing the same id an
    /// idempotent no-op rather than a duplicate row: `INSERT OR IGNORE`
    /// mirrors a queue broker's own dedup-by-id contract.
    pub async fn enqueue(pool: &SqlitePool, job: EnqueueJob) -> AppResult<bool> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO scheduled_jobs (
                id, kind, schedule_id, timezone, payload_json, status,
                run_at, attempt, max_attempts, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, 'waiting', ?, 0, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.kind)
        .bind(&job.schedule_id)
        .bind(&job.timezone)
        .bind(&job.payload_json)
        .bind(job.run_at)
        .bind(job.max_attempts)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    /// List in-flight jobs for a schedule. This adapter collapses "delayed"
    /// into "waiting" (a waiting job with a future `run_at` is simply not
    /// yet due) so the state vocabulary stays the four-state
    /// `waiting|active|done|dead` set used throughout.
    pub async fn jobs_in_flight_for_schedule(
        pool: &SqlitePool,
        schedule_id: &str,
    ) -> AppResult<Vec<ScheduledJob>> {
        sqlx::query_as::<_, ScheduledJob>(
            "SELECT * FROM scheduled_jobs WHERE schedule_id = ? AND status IN ('waiting','active')",
        )
        .bind(schedule_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Duplicate-guard check used by the occurrence planner and the
    /// timezone discovery hook before enqueuing a daily-timezone job: is
    /// there already a waiting/active job for this exact
    /// (schedule, timezone) tuple?
    pub async fn has_pending_for_timezone(
        pool: &SqlitePool,
        schedule_id: &str,
        timezone: &str,
    ) -> AppResult<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT 1 FROM scheduled_jobs
            WHERE schedule_id = ? AND timezone = ? AND status IN ('waiting','active')
            LIMIT 1
            "#,
        )
        .bind(schedule_id)
        .bind(timezone)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;
        Ok(row.is_some())
    }

    /// Remove every in-flight job referencing a schedule: the mechanism
    /// behind pause, which cancels by enumerating and deleting rather than
    /// flagging rows dead.
    pub async fn remove_all_for_schedule(pool: &SqlitePool, schedule_id: &str) -> AppResult<u64> {
        let result = sqlx::query(
            "DELETE FROM scheduled_jobs WHERE schedule_id = ? AND status IN ('waiting','active')",
        )
        .bind(schedule_id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;
        Ok(result.rows_affected())
    }

    /// Atomically claim up to `limit` due jobs for dispatch using a
    /// single-statement claim-and-mark pattern. Ordered by `run_at`
    /// (approximate due-time order, without strict FIFO across
    /// same-due-time ties).
    pub async fn claim_due(pool: &SqlitePool, limit: i64) -> AppResult<Vec<ScheduledJob>> {
        let mut claimed = Vec::new();
        if limit <= 0 {
            return Ok(claimed);
        }

        for _ in 0..limit {
            let now = Utc::now().naive_utc();
            let job = sqlx::query_as::<_, ScheduledJob>(
                r#"
                UPDATE scheduled_jobs
                SET status = 'active', updated_at = ?
                WHERE id = (
                    SELECT id FROM scheduled_jobs
                    WHERE status = 'waiting' AND run_at <= ?
                    ORDER BY run_at ASC
                    LIMIT 1
                )
                RETURNING *
                "#,
            )
            .bind(now)
            .bind(now)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)?;

            match job {
                Some(j) => claimed.push(j),
                None => break,
            }
        }

        Ok(claimed)
    }

    /// A completed job's natural end: removed from the queue entirely
    /// rather than retained as `done` (the job's outcome lives in
    /// `NotificationHistory`, not in the queue row).
    pub async fn remove(pool: &SqlitePool, id: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM scheduled_jobs WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;
        Ok(())
    }

    /// Infrastructure-failure path: increment `attempt`, reschedule at
    /// `next_run_at`, or move to `dead` once `max_attempts` is reached
    /// (operator alert is logged by the caller, not persisted further).
    pub async fn register_attempt_and_reschedule(
        pool: &SqlitePool,
        id: &str,
        next_run_at: NaiveDateTime,
        last_error: Option<&str>,
    ) -> AppResult<ScheduledJob> {
        let now = Utc::now().naive_utc();
        sqlx::query_as::<_, ScheduledJob>(
            r#"
            UPDATE scheduled_jobs
            SET attempt = attempt + 1,
                run_at = ?,
                last_error = ?,
                status = CASE WHEN attempt + 1 >= max_attempts THEN 'dead' ELSE 'waiting' END,
                updated_at = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(next_run_at)
        .bind(last_error)
        .bind(now)
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::EnqueueJob;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn job(id: &str, schedule_id: &str, tz: &str, run_at: NaiveDateTime) -> EnqueueJob {
        EnqueueJob {
            id: id.to_string(),
            kind: "daily_timezone_send".to_string(),
            schedule_id: Some(schedule_id.to_string()),
            timezone: Some(tz.to_string()),
            payload_json: "{}".to_string(),
            run_at,
            max_attempts: 3,
        }
    }

    #[tokio::test]
    async fn enqueue_is_idempotent_by_job_id() {
        let pool = memory_pool().await;
        let now = Utc::now().naive_utc();
        let j = job("daily-s1-europe/london-123", "s1", "europe/london", now);

        assert!(ScheduledJobRepository::enqueue(&pool, j.clone())
            .await
            .unwrap());
        assert!(!ScheduledJobRepository::enqueue(&pool, j).await.unwrap());

        let rows = ScheduledJobRepository::jobs_in_flight_for_schedule(&pool, "s1")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn pause_removes_all_in_flight_jobs_for_schedule() {
        let pool = memory_pool().await;
        let now = Utc::now().naive_utc();
        ScheduledJobRepository::enqueue(&pool, job("j1", "s1", "europe/london", now))
            .await
            .unwrap();
        ScheduledJobRepository::enqueue(&pool, job("j2", "s1", "asia/tokyo", now))
            .await
            .unwrap();
        ScheduledJobRepository::enqueue(&pool, job("j3", "s2", "asia/tokyo", now))
            .await
            .unwrap();

        let removed = ScheduledJobRepository::remove_all_for_schedule(&pool, "s1")
            .await
            .unwrap();
        assert_eq!(removed, 2);

        assert!(ScheduledJobRepository::jobs_in_flight_for_schedule(&pool, "s1")
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            ScheduledJobRepository::jobs_in_flight_for_schedule(&pool, "s2")
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn claim_due_only_returns_jobs_at_or_before_run_at() {
        let pool = memory_pool().await;
        let now = Utc::now().naive_utc();
        let future = now + chrono::Duration::hours(1);
        ScheduledJobRepository::enqueue(&pool, job("due", "s1", "europe/london", now))
            .await
            .unwrap();
        ScheduledJobRepository::enqueue(&pool, job("not-due", "s1", "asia/tokyo", future))
            .await
            .unwrap();

        let claimed = ScheduledJobRepository::claim_due(&pool, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, "due");
    }
}
