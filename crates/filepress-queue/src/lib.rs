//! In-process job queues and workers for the two pipeline stages.
//!
//! Jobs are addressed by their fingerprint: adding a live id twice is a
//! silent no-op, which makes duplicate webhook deliveries idempotent. Each
//! worker pulls with bounded concurrency, holds a lease per active job,
//! renews it on a heartbeat and relies on a stalled sweeper to reclaim jobs
//! whose worker died.

pub mod job;
pub mod queue;
pub mod worker;

pub use job::{EnqueueOptions, Job};
pub use queue::{JobQueue, QueueCounts};
pub use worker::{Processor, Worker, WorkerOptions};
