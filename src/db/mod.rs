pub mod models;
pub mod repository;

pub use models::*;
pub use repository::{
    NotificationHistoryRepository, NotificationLogRepository, ScheduleRepository,
    ScheduledJobRepository, UserRepository,
};
