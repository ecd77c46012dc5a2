pub mod notification_history;
pub mod notification_log;
pub mod schedule;
pub mod scheduled_job;
pub mod user;

pub use notification_history::NotificationHistoryRepository;
pub use notification_log::NotificationLogRepository;
pub use schedule::ScheduleRepository;
pub use scheduled_job::ScheduledJobRepository;
pub use user::UserRepository;
