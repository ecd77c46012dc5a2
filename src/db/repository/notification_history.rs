use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{HistoryWithSchedule, NewNotificationHistory, NotificationHistoryRow};
use crate::error::{AppError, AppResult};

pub struct NotificationHistoryRepository;

impl NotificationHistoryRepository {
    /// Exactly one history record per firing, written once at the end of
    /// dispatch.
    pub async fn create(
        pool: &SqlitePool,
        entry: NewNotificationHistory,
    ) -> AppResult<NotificationHistoryRow> {
        let id = Uuid::new_v4().to_string();
        sqlx::query_as::<_, NotificationHistoryRow>(
            r#"
            INSERT INTO notification_history (
                id, schedule_id, timezone, fired_at, total_targeted,
                success_count, failure_count, status, error_message
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(entry.schedule_id)
        .bind(entry.timezone)
        .bind(entry.fired_at)
        .bind(entry.total_targeted)
        .bind(entry.success_count)
        .bind(entry.failure_count)
        .bind(entry.status)
        .bind(entry.error_message)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Paginated history listing, joined with the owning schedule's
    /// title/message for display and `search`.
    #[allow(clippy::too_many_arguments)]
    pub async fn list_with_schedule(
        pool: &SqlitePool,
        status: Option<&str>,
        start_date: Option<chrono::NaiveDateTime>,
        end_date: Option<chrono::NaiveDateTime>,
        search: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<HistoryWithSchedule>> {
        let search_pattern = search.map(|s| format!("%{s}%"));
        sqlx::query_as::<_, HistoryWithSchedule>(
            r#"
            SELECT
                h.id as id,
                h.schedule_id as schedule_id,
                s.title as schedule_title,
                s.body as schedule_body,
                h.timezone as timezone,
                h.fired_at as fired_at,
                h.total_targeted as total_targeted,
                h.success_count as success_count,
                h.failure_count as failure_count,
                h.status as status,
                h.error_message as error_message
            FROM notification_history h
            JOIN schedules s ON s.id = h.schedule_id
            WHERE (? IS NULL OR h.status = ?)
              AND (? IS NULL OR h.fired_at >= ?)
              AND (? IS NULL OR h.fired_at <= ?)
              AND (? IS NULL OR s.title LIKE ? OR s.body LIKE ?)
            ORDER BY h.fired_at DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(status)
        .bind(status)
        .bind(start_date)
        .bind(start_date)
        .bind(end_date)
        .bind(end_date)
        .bind(search_pattern.as_deref())
        .bind(search_pattern.as_deref())
        .bind(search_pattern.as_deref())
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Aggregate counts for a date range.
    pub async fn stats(
        pool: &SqlitePool,
        start_date: Option<chrono::NaiveDateTime>,
        end_date: Option<chrono::NaiveDateTime>,
    ) -> AppResult<HistoryStats> {
        let row: (i64, i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(total_targeted), 0),
                COALESCE(SUM(success_count), 0),
                COALESCE(SUM(failure_count), 0),
                COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0)
            FROM notification_history
            WHERE (? IS NULL OR fired_at >= ?)
              AND (? IS NULL OR fired_at <= ?)
            "#,
        )
        .bind(start_date)
        .bind(start_date)
        .bind(end_date)
        .bind(end_date)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(HistoryStats {
            total_firings: row.0,
            total_targeted: row.1,
            total_success: row.2,
            total_failure: row.3,
            failed_firings: row.4,
        })
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HistoryStats {
    pub total_firings: i64,
    pub total_targeted: i64,
    pub total_success: i64,
    pub total_failure: i64,
    pub failed_firings: i64,
}
