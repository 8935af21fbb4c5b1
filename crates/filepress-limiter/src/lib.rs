//! Per-user fixed-window rate limiter.
//!
//! A bounded set of live keys, each carrying an attempt count and an expiry
//! measured from its first insertion. The window is strictly fixed: neither
//! reads nor later attempts extend it. The global live-key cap bounds memory
//! during bursts; expired entries are swept lazily before an insert.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use filepress_core::constants::{
    RATE_LIMITER_MAX_ATTEMPT, RATE_LIMITER_MAX_KEYS, RATE_LIMITER_TTL_MS,
};

struct Entry {
    attempts: u32,
    expires_at: Instant,
}

/// Limiter configuration. Defaults match the production envelope.
#[derive(Clone, Copy, Debug)]
pub struct RateLimiterOptions {
    /// Per-key window measured from first insertion.
    pub ttl: Duration,
    /// Global ceiling on live keys.
    pub max: usize,
    /// Accepted attempts per key per window.
    pub max_attempt: u32,
}

impl Default for RateLimiterOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_millis(RATE_LIMITER_TTL_MS),
            max: RATE_LIMITER_MAX_KEYS,
            max_attempt: RATE_LIMITER_MAX_ATTEMPT,
        }
    }
}

pub struct RateLimiter {
    entries: Mutex<HashMap<String, Entry>>,
    ttl: Duration,
    max: usize,
    max_attempt: Mutex<u32>,
}

impl RateLimiter {
    pub fn new(options: RateLimiterOptions) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: options.ttl,
            max: options.max,
            max_attempt: Mutex::new(options.max_attempt),
        }
    }

    /// Record an attempt for `key`. Returns whether the attempt is admitted.
    ///
    /// Live key at the attempt ceiling → reject. Live key below it →
    /// increment and admit, without touching the expiry. Absent key → insert
    /// with count 1 when the live set has room, reject otherwise.
    pub fn attempt(&self, key: &str, ref_id: Option<&str>) -> bool {
        let max_attempt = *self.max_attempt.lock().unwrap();
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();

        if let Some(entry) = entries.get_mut(key) {
            if now < entry.expires_at {
                if entry.attempts >= max_attempt {
                    debug!(key, ref_id, attempts = entry.attempts, "rate limited");
                    return false;
                }
                entry.attempts += 1;
                return true;
            }
            // Window elapsed; fall through and treat as a fresh key.
        }

        entries.retain(|_, e| now < e.expires_at);
        if entries.len() >= self.max {
            debug!(key, ref_id, live = entries.len(), "limiter at capacity");
            return false;
        }
        entries.insert(
            key.to_string(),
            Entry { attempts: 1, expires_at: now + self.ttl },
        );
        true
    }

    /// Update the per-key attempt ceiling. Non-positive input resets to 3.
    pub fn set_max_attempt(&self, new_max: i64, ref_id: Option<&str>) {
        let applied = if new_max > 0 { new_max as u32 } else { 3 };
        *self.max_attempt.lock().unwrap() = applied;
        debug!(max_attempt = applied, ref_id, "limiter attempt ceiling updated");
    }

    /// Number of keys whose window has not elapsed.
    pub fn live_len(&self) -> usize {
        let entries = self.entries.lock().unwrap();
        let now = Instant::now();
        entries.values().filter(|e| now < e.expires_at).count()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterOptions::default())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
