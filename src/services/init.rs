//! Initialization helpers for the application:
//! - database connection + migrations
//! - background worker spawn helpers (dispatch, retry, discovery sweep)
//!
//! This module centralizes bits that would otherwise bloat `main.rs`.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::db::repository::ScheduledJobRepository;
use crate::AppState;

/// Redact potentially sensitive information from a database URL before logging.
///
/// Attempts to parse the URL and remove userinfo (username:password) components.
/// Falls back to removing everything before '@' or returning "(redacted)".
pub fn redact_db_url(db_url: &str) -> String {
    if let Ok(url) = url::Url::parse(db_url) {
        let scheme = url.scheme();
        let host = url.host_str().unwrap_or("");
        let port_part = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
        let path = url.path();
        format!("{}://{}{}{}", scheme, host, port_part, path)
    } else if let Some(at_pos) = db_url.find('@') {
        let without_creds = &db_url[at_pos + 1..];
        format!("(redacted){}", without_creds)
    } else {
        "(redacted)".to_string()
    }
}

/// Initialize SQLite database connection and run migrations.
///
/// Creates the parent directory for the database file (if applicable),
/// opens a connection pool using `create_if_missing(true)` and runs migrations.
pub async fn init_db(config: &Config) -> Result<sqlx::SqlitePool> {
    let db_url = &config.database.url;
    tracing::info!("Connecting to database: {}", redact_db_url(db_url));

    let db_path = db_url.strip_prefix("sqlite://").unwrap_or(db_url);
    let db_file_path = Path::new(db_path);

    if let Some(parent) = db_file_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow::anyhow!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                )
            })?;
            tracing::info!(
                "Database directory created or already exists: {}",
                parent.display()
            );
        }
    }

    let connect_options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_with(connect_options)
        .await?;

    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Spawn the worker process's background loops: the dispatch loop (claims
/// due jobs and fires each one), the same claim mechanism handling
/// `kind = retry` jobs, and the periodic discovery sweep (a safety net, run
/// in addition to the inline triggers). Each listens for a shutdown
/// notification via a broadcast channel, the same pattern as the other
/// long-running background sync workers.
pub fn spawn_background_workers(
    state: Arc<AppState>,
    shutdown: tokio::sync::broadcast::Sender<()>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();

    // Dispatch + retry worker loop: claims due jobs in batches and fires
    // each concurrently.
    {
        let mut shutdown_rx = shutdown.subscribe();
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    tracing::info!("dispatch worker received shutdown signal");
                    break;
                }

                let claim_limit = state.config.retry.worker_concurrency as i64;
                match ScheduledJobRepository::claim_due(&state.db, claim_limit).await {
                    Ok(jobs) if jobs.is_empty() => {
                        tokio::select! {
                            _ = shutdown_rx.recv() => {
                                tracing::info!("dispatch worker shutting down");
                                break;
                            }
                            _ = tokio::time::sleep(std::time::Duration::from_secs(
                                state.config.retry.poll_interval_seconds,
                            )) => {}
                        }
                        continue;
                    }
                    Ok(jobs) => {
                        for job in jobs {
                            let state = state.clone();
                            tokio::spawn(async move {
                                let outcome = if job.kind == "retry" {
                                    crate::services::retry::dispatch_retry(
                                        &state.db,
                                        state.gateway.as_ref(),
                                        &job,
                                    )
                                    .await
                                    .map(|_| ())
                                } else {
                                    crate::services::dispatch::dispatch_job(
                                        &state.db,
                                        state.clock.as_ref(),
                                        state.ids.as_ref(),
                                        state.gateway.clone(),
                                        &job,
                                        4,
                                    )
                                    .await
                                    .map(|_| ())
                                };
                                // Retry jobs reschedule themselves in place on any
                                // outcome (a fresh `run_at`/`attempt`, surrendering
                                // at the cap); nothing further to do for them here.
                                if job.kind == "retry" {
                                    if let Err(e) = &outcome {
                                        tracing::warn!(job_id = %job.id, "job dispatch failed: {:?}", e);
                                    }
                                    return;
                                }
                                match outcome {
                                    Ok(()) => {
                                        if let Err(e) =
                                            ScheduledJobRepository::remove(&state.db, &job.id).await
                                        {
                                            tracing::warn!(job_id = %job.id, "failed to remove completed job: {:?}", e);
                                        }
                                    }
                                    Err(e) => {
                                        // An infrastructure failure (gateway/database
                                        // error bubbled out of dispatch_job) does not
                                        // mean the job is done — deleting it here would
                                        // silently drop the schedule's only pending job
                                        // for this timezone. Reschedule with the same
                                        // fixed backoff as the retry pipeline, up to
                                        // the job's own max_attempts, at which point
                                        // `register_attempt_and_reschedule` flips it to
                                        // `dead` and it's left for operators to find.
                                        tracing::warn!(job_id = %job.id, "job dispatch failed, rescheduling: {:?}", e);
                                        let next_run_at = chrono::Utc::now().naive_utc()
                                            + chrono::Duration::seconds(
                                                crate::services::retry::backoff_seconds(job.attempt),
                                            );
                                        if let Err(e) = ScheduledJobRepository::register_attempt_and_reschedule(
                                            &state.db,
                                            &job.id,
                                            next_run_at,
                                            Some(&e.to_string()),
                                        )
                                        .await
                                        {
                                            tracing::warn!(job_id = %job.id, "failed to reschedule failed job: {:?}", e);
                                        }
                                    }
                                }
                            });
                        }
                    }
                    Err(e) => {
                        tracing::warn!("failed to claim due jobs: {:?}", e);
                    }
                }

                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("dispatch worker shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(std::time::Duration::from_secs(
                        state.config.retry.poll_interval_seconds,
                    )) => {}
                }
            }
        }));
    }

    // Discovery sweep safety net: scans every active daily schedule for
    // timezones present in the population without a pending job, on a fixed
    // interval independent of the inline triggers.
    {
        let mut shutdown_rx = shutdown.subscribe();
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("discovery sweep worker shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(std::time::Duration::from_secs(
                        state.config.planner.discovery_sweep_interval_seconds,
                    )) => {}
                }

                match crate::services::planner::discovery_sweep(
                    &state.db,
                    state.clock.as_ref(),
                    state.ids.as_ref(),
                    None,
                )
                .await
                {
                    Ok(planned) if planned > 0 => {
                        tracing::info!(planned, "periodic discovery sweep planned new jobs");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!("discovery sweep failed: {:?}", e),
                }
            }
        }));
    }

    handles
}
