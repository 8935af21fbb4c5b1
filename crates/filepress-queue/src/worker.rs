use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use filepress_core::constants::{
    LOCK_DURATION_MS, LOCK_RENEW_TIME_MS, STALLED_INTERVAL_MS,
    WORKER_CONCURRENCY_DEVELOPMENT, WORKER_CONCURRENCY_PRODUCTION,
};
use filepress_core::FilepressError;

use crate::job::Job;
use crate::queue::JobQueue;

/// Worker execution envelope: concurrency plus lease timings.
#[derive(Clone, Copy, Debug)]
pub struct WorkerOptions {
    pub concurrency: usize,
    pub lock_duration: Duration,
    pub lock_renew_time: Duration,
    pub stalled_interval: Duration,
}

impl WorkerOptions {
    pub fn production() -> Self {
        Self { concurrency: WORKER_CONCURRENCY_PRODUCTION, ..Self::development() }
    }

    pub fn development() -> Self {
        Self {
            concurrency: WORKER_CONCURRENCY_DEVELOPMENT,
            lock_duration: Duration::from_millis(LOCK_DURATION_MS),
            lock_renew_time: Duration::from_millis(LOCK_RENEW_TIME_MS),
            stalled_interval: Duration::from_millis(STALLED_INTERVAL_MS),
        }
    }

    pub fn for_env(production: bool) -> Self {
        if production { Self::production() } else { Self::development() }
    }
}

/// A stage processor. The returned value is informational (the processor
/// itself records outcomes in the job log); the `Err` side drives queue
/// accounting only.
#[async_trait]
pub trait Processor<T>: Send + Sync + 'static {
    async fn process(&self, job: &Job<T>) -> Result<Value, FilepressError>;
}

/// Pulls jobs from one queue with bounded concurrency, renewing each job's
/// lease while its processor runs and sweeping stalled leases on a timer.
pub struct Worker<T, P> {
    queue: Arc<JobQueue<T>>,
    processor: Arc<P>,
    options: WorkerOptions,
}

impl<T, P> Worker<T, P>
where
    T: Clone + Send + Sync + 'static,
    P: Processor<T>,
{
    pub fn new(queue: Arc<JobQueue<T>>, processor: Arc<P>, options: WorkerOptions) -> Self {
        Self { queue, processor, options }
    }

    /// Run until `shutdown` flips to true, then drain in-flight jobs.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency));
        let mut tasks = JoinSet::new();

        // Stalled-lease sweeper.
        {
            let queue = Arc::clone(&self.queue);
            let mut shutdown = shutdown.clone();
            let interval = self.options.stalled_interval;
            tasks.spawn(async move {
                let mut tick = tokio::time::interval(interval);
                tick.tick().await;
                loop {
                    tokio::select! {
                        _ = tick.tick() => { queue.reclaim_stalled(); }
                        _ = shutdown.changed() => if *shutdown.borrow() { return },
                    }
                }
            });
        }

        info!(
            queue = self.queue.name(),
            concurrency = self.options.concurrency,
            "worker started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            let permit = tokio::select! {
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
                _ = shutdown.changed() => continue,
            };

            let Some(job) = self.queue.take_next(self.options.lock_duration) else {
                drop(permit);
                tokio::select! {
                    _ = self.queue.ready_signal() => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            };

            let queue = Arc::clone(&self.queue);
            let processor = Arc::clone(&self.processor);
            let lock_duration = self.options.lock_duration;
            let renew_every = self.options.lock_renew_time;
            tasks.spawn(async move {
                let _permit = permit;
                execute(queue, processor, job, lock_duration, renew_every).await;
            });
        }

        // Drain: in-flight jobs finish, the sweeper exits on shutdown.
        while tasks.join_next().await.is_some() {}
        info!(queue = self.queue.name(), "worker stopped");
    }
}

/// Run one attempt, renewing the lease until the processor resolves. A lost
/// lease abandons the attempt: the job was already reclaimed, so this
/// worker's outcome must not reach the queue.
async fn execute<T, P>(
    queue: Arc<JobQueue<T>>,
    processor: Arc<P>,
    job: Job<T>,
    lock_duration: Duration,
    renew_every: Duration,
) where
    T: Clone + Send + Sync + 'static,
    P: Processor<T>,
{
    let job_id = job.id;
    let event = job.event.clone();

    let mut renew = tokio::time::interval(renew_every);
    renew.tick().await;

    let process = processor.process(&job);
    tokio::pin!(process);

    let outcome = loop {
        tokio::select! {
            result = &mut process => break Some(result),
            _ = renew.tick() => {
                if !queue.renew_lease(&job_id, lock_duration) {
                    warn!(queue = queue.name(), job_id = %job_id, "lease lost, abandoning attempt");
                    break None;
                }
            }
        }
    };

    match outcome {
        Some(Ok(_)) => {
            if queue.finish(&job_id, true) {
                debug!(queue = queue.name(), job_id = %job_id, event, "job completed");
            }
        }
        Some(Err(e)) => {
            queue.finish(&job_id, false);
            error!(queue = queue.name(), job_id = %job_id, event, error = %e, "job failed");
        }
        None => {}
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
