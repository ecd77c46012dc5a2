use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{NewNotificationLog, NotificationLogRow};
use crate::error::{AppError, AppResult};

pub struct NotificationLogRepository;

impl NotificationLogRepository {
    /// Bulk-insert one row per recipient targeted in a firing. Order is
    /// undefined within a firing; callers insert in whatever order
    /// recipients were paginated.
    pub async fn insert_many(pool: &SqlitePool, logs: Vec<NewNotificationLog>) -> AppResult<()> {
        if logs.is_empty() {
            return Ok(());
        }
        let now = Utc::now().naive_utc();
        let mut tx = pool.begin().await.map_err(AppError::Database)?;
        for log in logs {
            sqlx::query(
                r#"
                INSERT INTO notification_log (
                    id, schedule_id, user_id, title, body, category,
                    status, error_message, device_token, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&log.schedule_id)
            .bind(&log.user_id)
            .bind(&log.title)
            .bind(&log.body)
            .bind(&log.category)
            .bind(&log.status)
            .bind(&log.error_message)
            .bind(&log.device_token)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(AppError::Database)?;
        }
        tx.commit().await.map_err(AppError::Database)?;
        Ok(())
    }

    /// The user-facing notification feed, paginated by sent-at descending.
    pub async fn find_by_user(
        pool: &SqlitePool,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<NotificationLogRow>> {
        sqlx::query_as::<_, NotificationLogRow>(
            r#"
            SELECT * FROM notification_log
            WHERE user_id = ?
            ORDER BY created_at DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn count_by_user(pool: &SqlitePool, user_id: &str) -> AppResult<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM notification_log WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(pool)
                .await
                .map_err(AppError::Database)?;
        Ok(count)
    }
}
