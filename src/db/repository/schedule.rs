use chrono::{NaiveDateTime, Utc};
use sqlx::SqlitePool;

use crate::db::models::Schedule;
use crate::error::{AppError, AppResult};

pub struct ScheduleRepository;

impl ScheduleRepository {
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        pool: &SqlitePool,
        id: &str,
        title: &str,
        body: &str,
        kind: &str,
        local_time: Option<&str>,
        fire_at: Option<NaiveDateTime>,
        category: Option<&str>,
        audience_type: &str,
        audience_genders: Option<&str>,
        audience_platforms: Option<&str>,
        audience_age_min: Option<i64>,
        audience_age_max: Option<i64>,
        status: &str,
    ) -> AppResult<Schedule> {
        let now = Utc::now().naive_utc();
        sqlx::query_as::<_, Schedule>(
            r#"
            INSERT INTO schedules (
                id, title, body, kind, local_time, fire_at, category,
                audience_type, audience_genders, audience_platforms,
                audience_age_min, audience_age_max, status, is_active,
                total_targeted, success_count, failure_count,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, 0, 0, 0, ?, ?)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(title)
        .bind(body)
        .bind(kind)
        .bind(local_time)
        .bind(fire_at)
        .bind(category)
        .bind(audience_type)
        .bind(audience_genders)
        .bind(audience_platforms)
        .bind(audience_age_min)
        .bind(audience_age_max)
        .bind(status)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Schedule>> {
        sqlx::query_as::<_, Schedule>("SELECT * FROM schedules WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)
    }

    pub async fn require(pool: &SqlitePool, id: &str) -> AppResult<Schedule> {
        Self::find_by_id(pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("schedule {id} not found")))
    }

    /// All schedules in `status = 'active'` and `kind = 'daily'` — the
    /// population the discovery sweep and the dispatch worker's post-firing
    /// sweep iterate over.
    pub async fn active_daily(pool: &SqlitePool) -> AppResult<Vec<Schedule>> {
        sqlx::query_as::<_, Schedule>(
            "SELECT * FROM schedules WHERE kind = 'daily' AND status = 'active' AND is_active = 1",
        )
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Paginated listing for dashboards: excludes `instant` and
    /// expired-paused-`once` schedules, with optional status/kind/search
    /// filters.
    pub async fn list_for_dashboard(
        pool: &SqlitePool,
        status: Option<&str>,
        kind: Option<&str>,
        search: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<Schedule>> {
        let now = Utc::now().naive_utc();
        let search_pattern = search.map(|s| format!("%{s}%"));
        sqlx::query_as::<_, Schedule>(
            r#"
            SELECT * FROM schedules
            WHERE kind != 'instant'
              AND NOT (kind = 'once' AND status = 'paused' AND fire_at IS NOT NULL AND fire_at <= ?)
              AND (? IS NULL OR status = ?)
              AND (? IS NULL OR kind = ?)
              AND (? IS NULL OR title LIKE ? OR body LIKE ?)
            ORDER BY created_at DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(now)
        .bind(status)
        .bind(status)
        .bind(kind)
        .bind(kind)
        .bind(search_pattern.as_deref())
        .bind(search_pattern.as_deref())
        .bind(search_pattern.as_deref())
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn set_status(
        pool: &SqlitePool,
        id: &str,
        status: &str,
        is_active: bool,
    ) -> AppResult<Schedule> {
        sqlx::query_as::<_, Schedule>(
            "UPDATE schedules SET status = ?, is_active = ?, updated_at = ? WHERE id = ? RETURNING *",
        )
        .bind(status)
        .bind(is_active)
        .bind(Utc::now().naive_utc())
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Accumulate this firing's counters into the schedule's lifetime
    /// audit totals and stamp `lastRun*`.
    pub async fn record_firing(
        pool: &SqlitePool,
        id: &str,
        total_targeted: i64,
        success_count: i64,
        failure_count: i64,
        last_run_status: &str,
        failure_reason: Option<&str>,
    ) -> AppResult<Schedule> {
        let now = Utc::now().naive_utc();
        sqlx::query_as::<_, Schedule>(
            r#"
            UPDATE schedules
            SET total_targeted = total_targeted + ?,
                success_count = success_count + ?,
                failure_count = failure_count + ?,
                last_run_at = ?,
                last_run_status = ?,
                failure_reason = ?,
                updated_at = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(total_targeted)
        .bind(success_count)
        .bind(failure_count)
        .bind(now)
        .bind(last_run_status)
        .bind(failure_reason)
        .bind(now)
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Terminal status transition for `once`/`instant` kinds only; daily
    /// schedules stay `active` forever (re-planned, not completed).
    pub async fn set_terminal_status(
        pool: &SqlitePool,
        id: &str,
        status: &str,
    ) -> AppResult<Schedule> {
        sqlx::query_as::<_, Schedule>(
            "UPDATE schedules SET status = ?, updated_at = ? WHERE id = ? RETURNING *",
        )
        .bind(status)
        .bind(Utc::now().naive_utc())
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }
}
