pub mod clock;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod ids;
pub mod routes;
pub mod services;
pub mod timezone;

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::clock::Clock;
use crate::config::Config;
use crate::gateway::PushGateway;
use crate::ids::IdGenerator;

/// Shared application state, threaded through every route and worker loop.
/// `clock`/`ids`/`gateway` are trait objects rather than concrete types so
/// tests can substitute deterministic fakes: every external dependency is
/// an explicit, injected value rather than a process-global singleton.
pub struct AppState {
    pub db: SqlitePool,
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    pub gateway: Arc<dyn PushGateway>,
}
