use std::env;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub gateway: GatewayConfig,
    pub retry: RetryConfig,
    pub planner: PlannerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub frontend_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Configuration for the external push gateway (e.g. FCM/APNs relay). The
/// per-call token ceiling is the gateway's own batching contract
/// (`gateway::MAX_BATCH_SIZE`), not a deployment knob.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
}

/// Knobs shared by the dispatch worker and the retry pipeline. The backoff
/// formula itself (`60s * 2^attempt`, surrender at 3 attempts) is a fixed
/// behavior per the retry pipeline's spec, not a deployment knob — only the
/// worker's polling cadence and concurrency are configurable here.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub poll_interval_seconds: u64,
    /// Number of claimed jobs dispatched concurrently by the worker loop.
    pub worker_concurrency: u32,
}

/// Knobs for the occurrence planner and the timezone discovery sweep.
#[derive(Debug, Clone, Deserialize)]
pub struct PlannerConfig {
    /// How often the worker runs a full discovery sweep as a safety net, in
    /// addition to the inline sweep triggered by device registration and by
    /// each schedule firing. Exposed as a config knob rather than hard-coded
    /// so the interval can be tuned without a redeploy.
    pub discovery_sweep_interval_seconds: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
                frontend_url: env::var("FRONTEND_URL")
                    .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/app.db".to_string()),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            gateway: GatewayConfig {
                endpoint: env::var("PUSH_GATEWAY_ENDPOINT")
                    .unwrap_or_else(|_| "http://localhost:9090/send".to_string()),
                api_key: env::var("PUSH_GATEWAY_API_KEY").ok(),
                timeout_seconds: env::var("PUSH_GATEWAY_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
            },
            retry: RetryConfig {
                poll_interval_seconds: env::var("WORKER_POLL_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5u64),
                worker_concurrency: env::var("WORKER_CONCURRENCY")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10u32),
            },
            planner: PlannerConfig {
                discovery_sweep_interval_seconds: env::var("DISCOVERY_SWEEP_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "3600".to_string())
                    .parse()
                    .unwrap_or(3600u64),
            },
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                frontend_url: "http://localhost:3000".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://data/app.db".to_string(),
                max_connections: 5,
            },
            gateway: GatewayConfig {
                endpoint: "http://localhost:9090/send".to_string(),
                api_key: None,
                timeout_seconds: 10,
            },
            retry: RetryConfig {
                poll_interval_seconds: 5,
                worker_concurrency: 10,
            },
            planner: PlannerConfig {
                discovery_sweep_interval_seconds: 3600,
            },
        }
    }
}
