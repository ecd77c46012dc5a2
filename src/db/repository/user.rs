use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::models::User;
use crate::error::{AppError, AppResult};

pub struct UserRepository;

impl UserRepository {
    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)
    }

    pub async fn list_all(pool: &SqlitePool) -> AppResult<Vec<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY created_at ASC")
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Distinct canonical timezones currently present among eligible users
    /// (`is_active`, non-empty token) — the population the occurrence
    /// planner shards a daily schedule across.
    pub async fn distinct_eligible_timezones(pool: &SqlitePool) -> AppResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT timezone FROM users
            WHERE is_active = 1 AND opted_out = 0
              AND device_token IS NOT NULL AND device_token != ''
            "#,
        )
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;
        Ok(rows.into_iter().map(|(tz,)| tz).collect())
    }

    /// Atomically persist a (possibly new) device token + timezone for a
    /// user, upserting a bare row if the user has never registered a device
    /// before. Returns whether the timezone and/or token actually changed
    /// (the "new for the user" trigger condition for discovery).
    pub async fn upsert_device(
        pool: &SqlitePool,
        user_id: &str,
        token: &str,
        platform: &str,
        canonical_timezone: &str,
    ) -> AppResult<DeviceUpsertOutcome> {
        let existing = Self::find_by_id(pool, user_id).await?;
        let now = Utc::now().naive_utc();

        let (timezone_changed, token_changed, first_registration) = match &existing {
            None => (true, true, true),
            Some(u) => (
                u.timezone != canonical_timezone,
                u.device_token.as_deref() != Some(token),
                u.device_token.as_deref().unwrap_or("").is_empty(),
            ),
        };

        if existing.is_none() {
            sqlx::query(
                r#"
                INSERT INTO users (id, timezone, device_token, device_platform,
                    device_last_used_at, is_active, opted_out, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, 1, 0, ?, ?)
                "#,
            )
            .bind(user_id)
            .bind(canonical_timezone)
            .bind(token)
            .bind(platform)
            .bind(now)
            .bind(now)
            .bind(now)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;
        } else {
            sqlx::query(
                r#"
                UPDATE users
                SET timezone = ?, device_token = ?, device_platform = ?,
                    device_last_used_at = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(canonical_timezone)
            .bind(token)
            .bind(platform)
            .bind(now)
            .bind(now)
            .bind(user_id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;
        }

        Ok(DeviceUpsertOutcome {
            timezone_changed,
            token_changed,
            first_registration,
        })
    }

    /// A retry payload only carries tokens, not user ids, so the retry
    /// worker looks the owner back up to persist a log row or clear a
    /// permanently-failing token.
    pub async fn find_by_device_token(pool: &SqlitePool, token: &str) -> AppResult<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT id FROM users WHERE device_token = ? LIMIT 1")
                .bind(token)
                .fetch_optional(pool)
                .await
                .map_err(AppError::Database)?;
        Ok(row.map(|(id,)| id))
    }

    /// Permanently clear a user's device token so no later firing targets
    /// it, without touching their timezone.
    pub async fn clear_device_token(pool: &SqlitePool, user_id: &str) -> AppResult<()> {
        sqlx::query(
            "UPDATE users SET device_token = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(Utc::now().naive_utc())
        .bind(user_id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;
        Ok(())
    }
}

pub struct DeviceUpsertOutcome {
    pub timezone_changed: bool,
    pub token_changed: bool,
    pub first_registration: bool,
}

impl DeviceUpsertOutcome {
    /// True when the timezone is new for the user, the token is new, or
    /// this is the user's first device registration.
    pub fn should_trigger_discovery(&self) -> bool {
        self.timezone_changed || self.token_changed || self.first_registration
    }
}
