use chrono::NaiveDateTime;
use uuid::Uuid;

/// Injectable id generator, mirroring `Clock` so job/schedule ids
/// are deterministic in tests.
pub trait IdGenerator: Send + Sync {
    fn new_id(&self) -> String;
}

#[derive(Debug, Clone, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn new_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

#[cfg(test)]
pub struct SequentialGenerator(pub std::sync::atomic::AtomicU64);

#[cfg(test)]
impl IdGenerator for SequentialGenerator {
    fn new_id(&self) -> String {
        let n = self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        format!("test-id-{n}")
    }
}

/// Stable id for a daily timezone-shard job: one such job may exist per
/// (schedule, timezone) pair at a time, keyed by the occurrence it targets so
/// re-planning after firing produces a fresh, distinct id.
pub fn daily_job_id(schedule_id: &str, timezone: &str, run_at_epoch_millis: i64) -> String {
    format!("daily-{schedule_id}-{timezone}-{run_at_epoch_millis}")
}

/// Stable id for a one-shot schedule's single delivery job, keyed by the
/// hour of its `fire_at` so a schedule edited to a new `fire_at` gets a
/// distinct job instead of colliding with a stale one.
pub fn once_job_id(schedule_id: &str, fire_at: NaiveDateTime) -> String {
    format!("once-{schedule_id}-{}", fire_at.format("%Y%m%dT%H"))
}
