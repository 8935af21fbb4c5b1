//! Storage capability seams for the pipeline.
//!
//! Two narrow traits — `FastStore` (low-latency key/value with expiry and
//! atomic counters) and `DurableStore` (relational rows behind a REST
//! contract) — so the ledger, job log and webhook never touch a concrete
//! client. Production wires `RedisStore` and `SupabaseStore`; tests swap in
//! the `memory` doubles without touching pipeline code.

pub mod memory;
pub mod redis;
pub mod supabase;

use async_trait::async_trait;
use serde_json::Value;

use filepress_core::FilepressError;

/// Equality predicate on a durable-store column, `(column, value)`.
pub type Filter = (String, String);

/// Build a filter list from `(column, value)` pairs.
pub fn filters<const N: usize>(pairs: [(&str, &str); N]) -> Vec<Filter> {
    pairs
        .into_iter()
        .map(|(c, v)| (c.to_string(), v.to_string()))
        .collect()
}

// ── FastStore ────────────────────────────────────────────────────────────────

/// Low-latency shared cache: get/set with expiry plus atomic counters.
///
/// The counters are the arbiter of the shared-credit race: `decr_by` must be
/// atomic with respect to concurrent callers.
#[async_trait]
pub trait FastStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>, FilepressError>;

    /// Set `key` to `value` with a fresh expiry of `ttl_secs`.
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), FilepressError>;

    /// Atomically decrement and return the post-decrement value. A missing
    /// key counts from zero.
    async fn decr_by(&self, key: &str, amount: i64) -> Result<i64, FilepressError>;

    /// Atomically increment and return the post-increment value.
    async fn incr_by(&self, key: &str, amount: i64) -> Result<i64, FilepressError>;

    async fn exists(&self, key: &str) -> Result<bool, FilepressError>;
}

// ── DurableStore ─────────────────────────────────────────────────────────────

/// Relational database of record. Rows travel as JSON objects; filters are
/// conjunctions of column equality predicates.
#[async_trait]
pub trait DurableStore: Send + Sync + 'static {
    async fn select(&self, table: &str, filters: &[Filter])
        -> Result<Vec<Value>, FilepressError>;

    async fn insert(&self, table: &str, row: Value) -> Result<(), FilepressError>;

    /// Insert or merge on the `on_conflict` column.
    async fn upsert(&self, table: &str, row: Value, on_conflict: &str)
        -> Result<(), FilepressError>;

    /// Patch all rows matching `filters`; returns the number of rows changed.
    async fn update(&self, table: &str, filters: &[Filter], patch: Value)
        -> Result<u64, FilepressError>;
}
