//! Audience query builder.
//!
//! Translates a schedule's target descriptor + optional timezone shard into
//! a recipient query, streamed in pages rather than materialized whole.
//! Uses `sqlx::QueryBuilder` to compose the dynamic predicate
//! (`AND (? IS NULL OR col = ?)`-style optional filters), extended to
//! membership (`IN`) and range predicates over a variable-length filter.

use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::db::models::{AudienceFilter, Schedule, User};
use crate::error::AppResult;

pub const PAGE_SIZE: i64 = 500;

/// Builds the base predicate shared by every audience query:
/// `isActive=true AND deviceToken.token non-empty`, optionally narrowed to
/// one canonical timezone shard and/or the schedule's filter predicate.
fn build_query<'a>(schedule: &'a Schedule, timezone: Option<&'a str>) -> QueryBuilder<'a, Sqlite> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT * FROM users WHERE is_active = 1 AND opted_out = 0 \
         AND device_token IS NOT NULL AND device_token != ''",
    );

    if let Some(tz) = timezone {
        qb.push(" AND timezone = ");
        qb.push_bind(tz.to_string());
    }

    if let Some(filter) = schedule.filter() {
        push_filter(&mut qb, &filter);
    }

    qb
}

fn push_filter(qb: &mut QueryBuilder<Sqlite>, filter: &AudienceFilter) {
    if !filter.genders.is_empty() {
        qb.push(" AND gender IN (");
        let mut separated = qb.separated(", ");
        for g in &filter.genders {
            separated.push_bind(g.clone());
        }
        separated.push_unseparated(")");
    }

    if !filter.platforms.is_empty() {
        qb.push(" AND device_platform IN (");
        let mut separated = qb.separated(", ");
        for p in &filter.platforms {
            separated.push_bind(p.clone());
        }
        separated.push_unseparated(")");
    }

    if let Some(min) = filter.age_min {
        qb.push(" AND age >= ");
        qb.push_bind(min);
    }
    if let Some(max) = filter.age_max {
        qb.push(" AND age <= ");
        qb.push_bind(max);
    }
}

/// Fetch one page of eligible recipients (batches of <= `PAGE_SIZE`
/// materialized at a time). `after_id` paginates by primary key so a page
/// can be re-requested deterministically across retries within one firing.
pub async fn fetch_page(
    pool: &SqlitePool,
    schedule: &Schedule,
    timezone: Option<&str>,
    after_id: Option<&str>,
    limit: i64,
) -> AppResult<Vec<User>> {
    let mut qb = build_query(schedule, timezone);
    if let Some(id) = after_id {
        qb.push(" AND id > ");
        qb.push_bind(id.to_string());
    }
    qb.push(" ORDER BY id ASC LIMIT ");
    qb.push_bind(limit);

    let rows = qb
        .build_query_as::<User>()
        .fetch_all(pool)
        .await
        .map_err(crate::error::AppError::Database)?;
    Ok(rows)
}

/// Count of eligible recipients for this schedule/timezone shard, used by
/// the discovery hook and planner to decide whether a timezone is "present
/// in the user population" before enqueuing a job for it.
pub async fn count_eligible(
    pool: &SqlitePool,
    schedule: &Schedule,
    timezone: Option<&str>,
) -> AppResult<i64> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT COUNT(*) FROM users WHERE is_active = 1 AND opted_out = 0 \
         AND device_token IS NOT NULL AND device_token != ''",
    );
    if let Some(tz) = timezone {
        qb.push(" AND timezone = ");
        qb.push_bind(tz.to_string());
    }
    if let Some(filter) = schedule.filter() {
        push_filter(&mut qb, &filter);
    }

    let (count,): (i64,) = qb
        .build_query_as()
        .fetch_one(pool)
        .await
        .map_err(crate::error::AppError::Database)?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Schedule;
    use chrono::Utc;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    async fn insert_user(
        pool: &SqlitePool,
        id: &str,
        tz: &str,
        token: &str,
        gender: Option<&str>,
        platform: Option<&str>,
        age: Option<i64>,
    ) {
        let now = Utc::now().naive_utc();
        sqlx::query(
            "INSERT INTO users (id, timezone, device_token, device_platform, gender, age, is_active, opted_out, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, 1, 0, ?, ?)",
        )
        .bind(id)
        .bind(tz)
        .bind(token)
        .bind(platform)
        .bind(gender)
        .bind(age)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .unwrap();
    }

    fn all_audience_schedule() -> Schedule {
        Schedule {
            id: "s1".to_string(),
            title: "t".to_string(),
            body: "b".to_string(),
            kind: "daily".to_string(),
            local_time: Some("09:00".to_string()),
            fire_at: None,
            category: None,
            audience_type: "all".to_string(),
            audience_genders: None,
            audience_platforms: None,
            audience_age_min: None,
            audience_age_max: None,
            status: "active".to_string(),
            is_active: true,
            total_targeted: 0,
            success_count: 0,
            failure_count: 0,
            last_run_at: None,
            last_run_status: None,
            failure_reason: None,
            created_at: Utc::now().naive_utc(),
            updated_at: Utc::now().naive_utc(),
        }
    }

    #[tokio::test]
    async fn empty_token_users_are_excluded() {
        let pool = memory_pool().await;
        insert_user(&pool, "u1", "europe/london", "tok1", None, None, None).await;
        insert_user(&pool, "u2", "europe/london", "", None, None, None).await;

        let schedule = all_audience_schedule();
        let page = fetch_page(&pool, &schedule, Some("europe/london"), None, 500)
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "u1");
    }

    #[tokio::test]
    async fn filtered_audience_applies_gender_platform_and_age_range() {
        let pool = memory_pool().await;
        insert_user(&pool, "u1", "europe/london", "tok1", Some("female"), Some("ios"), Some(25)).await;
        insert_user(&pool, "u2", "europe/london", "tok2", Some("male"), Some("ios"), Some(25)).await;
        insert_user(&pool, "u3", "europe/london", "tok3", Some("female"), Some("ios"), Some(12)).await;

        let mut schedule = all_audience_schedule();
        schedule.audience_type = "filtered".to_string();
        schedule.audience_genders = Some("female".to_string());
        schedule.audience_platforms = Some("ios,android".to_string());
        schedule.audience_age_min = Some(13);
        schedule.audience_age_max = Some(99);

        let page = fetch_page(&pool, &schedule, None, None, 500).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "u1");
    }
}
