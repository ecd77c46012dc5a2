//! Operator/user-facing HTTP process. Serves the admin surface, the
//! device-registration hook, and the user notification feed, and wires
//! up the shared `AppState` the route handlers and, in the worker binary,
//! the background loops both depend on.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tzpush::config::Config;
use tzpush::gateway::HttpPushGateway;
use tzpush::{clock::SystemClock, ids::UuidGenerator, routes, services::init, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tzpush=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!(e.to_string()))?;

    tracing::info!("starting tzpush scheduler API");

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

    let app = Router::new()
        .route("/health", axum::routing::get(routes::health::health_check))
        .nest("/schedules", routes::schedules::router())
        .nest("/history", routes::history::router())
        .nest("/notifications", routes::notifications::router())
        .nest("/fcm-token", routes::devices::router())
        .with_state(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(
                    config
                        .server
                        .frontend_url
                        .parse::<HeaderValue>()
                        .expect("invalid FRONTEND_URL for CORS"),
                )
                .allow_methods([
                    http::Method::GET,
                    http::Method::POST,
                    http::Method::PUT,
                    http::Method::DELETE,
                    http::Method::OPTIONS,
                ])
                .allow_headers([
                    http::header::CONTENT_TYPE,
                    http::header::AUTHORIZATION,
                    http::header::ACCEPT,
                    http::header::HeaderName::from_static("x-user-id"),
                    http::header::HeaderName::from_static("timezone"),
                ]),
        );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let addr: SocketAddr = addr.parse()?;
    tracing::info!("api listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
