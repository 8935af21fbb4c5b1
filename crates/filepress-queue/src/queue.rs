use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::{debug, warn};

use filepress_core::types::JobId;

use crate::job::{EnqueueOptions, Job};

/// Pending/delayed/active sizes of a queue at one instant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: usize,
    pub delayed: usize,
    pub active: usize,
}

struct PendingJob<T> {
    job: Job<T>,
    seq: u64,
}

struct DelayedJob<T> {
    job: Job<T>,
    ready_at: Instant,
}

struct ActiveJob<T> {
    job: Job<T>,
    lease_expires_at: Instant,
}

struct QueueInner<T> {
    pending: Vec<PendingJob<T>>,
    delayed: Vec<DelayedJob<T>>,
    active: HashMap<JobId, ActiveJob<T>>,
    /// Ids retained after completion/failure when removal was declined.
    finished: HashSet<JobId>,
    next_seq: u64,
}

impl<T> Default for QueueInner<T> {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
            delayed: Vec::new(),
            active: HashMap::new(),
            finished: HashSet::new(),
            next_seq: 0,
        }
    }
}

/// A named in-process job queue.
///
/// The job id is a unique key: adding a live (pending, delayed, active or
/// retained) id again is silently ignored, which makes duplicate webhook
/// deliveries safe. Ready jobs hand out with priority order, FIFO within a
/// priority. Active jobs hold a lease; an unrenewed lease makes the job
/// eligible for reclaim by the stalled sweeper.
pub struct JobQueue<T> {
    name: String,
    inner: Mutex<QueueInner<T>>,
    notify: Notify,
}

impl<T: Clone + Send + 'static> JobQueue<T> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            inner: Mutex::new(QueueInner::default()),
            notify: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a job. Returns `false` when the id is already known (duplicate
    /// submissions are ignored, not errors).
    pub fn add(&self, event: &str, id: JobId, payload: T, opts: EnqueueOptions) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if Self::knows(&inner, &id) {
            debug!(queue = %self.name, job_id = %id, "duplicate job id ignored");
            return false;
        }

        let job = Job::new(id, event, payload, opts);
        if opts.delay.is_zero() {
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.pending.push(PendingJob { job, seq });
        } else {
            inner
                .delayed
                .push(DelayedJob { job, ready_at: Instant::now() + opts.delay });
        }
        drop(inner);
        self.notify.notify_waiters();
        true
    }

    fn knows(inner: &QueueInner<T>, id: &JobId) -> bool {
        inner.active.contains_key(id)
            || inner.finished.contains(id)
            || inner.pending.iter().any(|p| p.job.id == *id)
            || inner.delayed.iter().any(|d| d.job.id == *id)
    }

    pub fn counts(&self) -> QueueCounts {
        let inner = self.inner.lock().unwrap();
        QueueCounts {
            pending: inner.pending.len(),
            delayed: inner.delayed.len(),
            active: inner.active.len(),
        }
    }

    // ── Worker interface ─────────────────────────────────────────────────────

    /// Move ripe delayed jobs into the pending set. Returns the instant the
    /// next delayed job ripens, if any.
    fn promote_delayed(inner: &mut QueueInner<T>) -> Option<Instant> {
        let now = Instant::now();
        let mut i = 0;
        while i < inner.delayed.len() {
            if inner.delayed[i].ready_at <= now {
                let d = inner.delayed.swap_remove(i);
                let seq = inner.next_seq;
                inner.next_seq += 1;
                inner.pending.push(PendingJob { job: d.job, seq });
            } else {
                i += 1;
            }
        }
        inner.delayed.iter().map(|d| d.ready_at).min()
    }

    /// Pop the best ready job and move it into the active set under a fresh
    /// lease. Returns `None` when nothing is ready.
    pub fn take_next(&self, lock_duration: Duration) -> Option<Job<T>> {
        let mut inner = self.inner.lock().unwrap();
        Self::promote_delayed(&mut inner);

        // Highest priority first, then lowest sequence number.
        let best = inner
            .pending
            .iter()
            .enumerate()
            .max_by_key(|(_, p)| (p.job.priority, u64::MAX - p.seq))
            .map(|(i, _)| i)?;
        let mut job = inner.pending.swap_remove(best).job;

        job.ats += 1;
        job.processed_at = chrono::Utc::now().timestamp_millis();
        inner.active.insert(
            job.id,
            ActiveJob { job: job.clone(), lease_expires_at: Instant::now() + lock_duration },
        );
        Some(job)
    }

    /// Await until a job is likely ready (new arrival or delay ripening).
    pub async fn ready_signal(&self) {
        let next_ripe = {
            let mut inner = self.inner.lock().unwrap();
            if !inner.pending.is_empty() {
                return;
            }
            Self::promote_delayed(&mut inner);
            if !inner.pending.is_empty() {
                return;
            }
            inner.delayed.iter().map(|d| d.ready_at).min()
        };

        let sleep_for = next_ripe
            .map(|at| at.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::from_millis(500));
        tokio::select! {
            _ = self.notify.notified() => {}
            _ = tokio::time::sleep(sleep_for) => {}
        }
    }

    /// Extend the lease of an active job. Returns `false` when the job is no
    /// longer active here (lease already reclaimed); the caller must treat
    /// that as a lost lease and stop work.
    pub fn renew_lease(&self, id: &JobId, lock_duration: Duration) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.active.get_mut(id) {
            Some(active) => {
                active.lease_expires_at = Instant::now() + lock_duration;
                true
            }
            None => false,
        }
    }

    /// Mark an active job terminal. Returns `false` when the lease was
    /// already lost, in which case downstream effects must be discarded.
    pub fn finish(&self, id: &JobId, succeeded: bool) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(active) = inner.active.remove(id) else {
            warn!(queue = %self.name, job_id = %id, "finish for a job without a lease");
            return false;
        };
        let remove = if succeeded {
            active.job.remove_on_complete
        } else {
            active.job.remove_on_fail
        };
        if !remove {
            inner.finished.insert(*id);
        }
        true
    }

    /// Return every active job whose lease expired to the pending set.
    /// Returns the number of reclaimed jobs.
    pub fn reclaim_stalled(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        let stalled: Vec<JobId> = inner
            .active
            .iter()
            .filter(|(_, a)| a.lease_expires_at <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in &stalled {
            if let Some(active) = inner.active.remove(id) {
                warn!(queue = %self.name, job_id = %id, "stalled job reclaimed");
                let seq = inner.next_seq;
                inner.next_seq += 1;
                inner.pending.push(PendingJob { job: active.job, seq });
            }
        }
        let reclaimed = stalled.len();
        drop(inner);
        if reclaimed > 0 {
            self.notify.notify_waiters();
        }
        reclaimed
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
