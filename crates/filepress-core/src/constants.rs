//! ─── Filepress pipeline constants ───────────────────────────────────────────
//!
//! Shared quota, rate limiting and worker envelope defaults. Values here are
//! the production defaults; the server config may override where noted.

use crate::types::Credits;

// ── Shared credits ───────────────────────────────────────────────────────────

/// Daily shared-credit pool, initialized lazily on the first read of a day.
pub const DAILY_SHARED_CREDIT_LIMIT: Credits = 70;

/// Fast-store key prefix; the full key is `sharedCredits:YYYY-MM-DD`.
pub const SHARED_CREDIT_KEY_PREFIX: &str = "sharedCredits";

/// Expiry of the fast-store credit key (seconds).
pub const SHARED_CREDIT_KEY_TTL_SECS: u64 = 86_400;

// ── Rate limiter ─────────────────────────────────────────────────────────────

/// Per-key fixed window, measured from first insertion (milliseconds).
pub const RATE_LIMITER_TTL_MS: u64 = 60_000;

/// Global ceiling on live limiter keys.
pub const RATE_LIMITER_MAX_KEYS: usize = 250;

/// Accepted attempts per key per window.
pub const RATE_LIMITER_MAX_ATTEMPT: u32 = 3;

// ── Worker envelope ──────────────────────────────────────────────────────────

/// Jobs a worker may run concurrently in production.
pub const WORKER_CONCURRENCY_PRODUCTION: usize = 10;

/// Jobs a worker may run concurrently outside production.
pub const WORKER_CONCURRENCY_DEVELOPMENT: usize = 2;

/// Time a worker holds an exclusive lease on a job (milliseconds).
pub const LOCK_DURATION_MS: u64 = 40_000;

/// Lease renewal interval; must stay below `LOCK_DURATION_MS`.
pub const LOCK_RENEW_TIME_MS: u64 = 20_000;

/// Sweep interval after which an unrenewed lease is reclaimed (milliseconds).
pub const STALLED_INTERVAL_MS: u64 = 60_000;

// ── Durable store tables ─────────────────────────────────────────────────────

pub const TABLE_SHARED_CREDITS: &str = "shared-credits";
pub const TABLE_CREDIT_TRANSACTIONS: &str = "shared-credits-transactions";
pub const TABLE_JOB_LOGS: &str = "job-logs";

// ── HTTP surface ─────────────────────────────────────────────────────────────

pub const DEFAULT_PORT: u16 = 4000;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_TELEGRAM_WEBHOOK_PATH: &str = "/telegraf";
