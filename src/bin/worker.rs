//! Background dispatch process. Owns no HTTP surface: it only claims due
//! jobs from the queue adapter and runs the dispatch pipeline, the retry
//! pipeline, and the periodic discovery sweep (a safety net alongside the
//! inline sweeps triggered by registration and firing) until asked to
//! shut down.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tzpush::config::Config;
use tzpush::gateway::HttpPushGateway;
use tzpush::{clock::SystemClock, ids::UuidGenerator, services::init, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tzpush=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!(e.to_string()))?;

    tracing::info!("starting tzpush scheduler worker");

    let pool = init::init_db(&config).await?;

    let gateway = HttpPushGateway::new(
        config.gateway.endpoint.clone(),
        config.gateway.api_key.clone(),
        Duration::from_secs(config.gateway.timeout_seconds),
    );

    let state = Arc::new(AppState {
        db: pool,
        config: config.clone(),
        clock: Arc::new(SystemClock),
        ids: Arc::new(UuidGenerator),
        gateway: Arc::new(gateway),
    });

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let handles = init::spawn_background_workers(state.clone(), shutdown_tx.clone());

    tracing::info!(count = handles.len(), "background loops started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, draining worker loops");
    let _ = shutdown_tx.send(());

    for handle in handles {
        let _ = handle.await;
    }

    tracing::info!("worker shut down cleanly");
    Ok(())
}
