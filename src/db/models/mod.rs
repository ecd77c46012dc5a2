//! Database row types, one module per table, re-exported here so call
//! sites can `use crate::db::models::*;`.

pub mod notification_history;
pub mod notification_log;
pub mod schedule;
pub mod scheduled_job;
pub mod user;

pub use notification_history::*;
pub use notification_log::*;
pub use schedule::*;
pub use scheduled_job::*;
pub use user::*;
