use std::time::Duration;

use chrono::Utc;

use filepress_core::types::{JobId, JobStats};

/// Options applied when a job is added to a queue.
#[derive(Clone, Copy, Debug)]
pub struct EnqueueOptions {
    /// Higher runs first; FIFO within a priority.
    pub priority: u8,
    /// Hold the job back for this long before it becomes ready.
    pub delay: Duration,
    /// Forget the job id once it completes (auditing lives in the job log).
    pub remove_on_complete: bool,
    /// Forget the job id once it fails.
    pub remove_on_fail: bool,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            delay: Duration::ZERO,
            remove_on_complete: true,
            remove_on_fail: true,
        }
    }
}

/// A unit of work addressed by its fingerprint.
///
/// `event` names what the job carries (`task.submit`, `task.completed`,
/// `task.failed`); the payload is stage-specific. Attempt counters and
/// timestamps feed the per-stage audit statistics.
#[derive(Clone, Debug)]
pub struct Job<T> {
    pub id: JobId,
    pub event: String,
    pub payload: T,
    pub priority: u8,
    pub delay: Duration,
    /// Enqueue time (unix ms).
    pub created_at: i64,
    /// Time the current attempt was picked up (unix ms); 0 until first pickup.
    pub processed_at: i64,
    /// Attempts started.
    pub ats: u32,
    pub remove_on_complete: bool,
    pub remove_on_fail: bool,
}

impl<T> Job<T> {
    pub fn new(id: JobId, event: &str, payload: T, opts: EnqueueOptions) -> Self {
        Self {
            id,
            event: event.to_string(),
            payload,
            priority: opts.priority,
            delay: opts.delay,
            created_at: Utc::now().timestamp_millis(),
            processed_at: 0,
            ats: 0,
            remove_on_complete: opts.remove_on_complete,
            remove_on_fail: opts.remove_on_fail,
        }
    }

    /// Build the audit statistics for this attempt, finishing now.
    pub fn stats_now(&self) -> JobStats {
        JobStats {
            created_at: self.created_at,
            processed_at: self.processed_at,
            finished_at: Utc::now().timestamp_millis(),
            ats: self.ats,
            atm: self.ats,
            delay: self.delay.as_millis() as u64,
            priority: self.priority,
        }
    }
}
