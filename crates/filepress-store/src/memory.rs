//! In-process store doubles used by unit and integration tests.
//!
//! Semantics mirror the production backends where the pipeline depends on
//! them: counters are atomic under the store lock, expired fast-store keys
//! read as absent, durable upserts merge on the conflict column.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use filepress_core::FilepressError;

use crate::{DurableStore, FastStore, Filter};

// ── MemoryFastStore ──────────────────────────────────────────────────────────

struct FastEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl FastEntry {
    fn live(&self) -> bool {
        self.expires_at.map(|at| Instant::now() < at).unwrap_or(true)
    }
}

#[derive(Default)]
pub struct MemoryFastStore {
    entries: Mutex<HashMap<String, FastEntry>>,
}

impl MemoryFastStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn counter_op(&self, key: &str, delta: i64) -> Result<i64, FilepressError> {
        let mut entries = self.entries.lock().await;
        let current = match entries.get(key) {
            Some(e) if e.live() => e
                .value
                .parse::<i64>()
                .map_err(|_| FilepressError::FastStore(format!("{key} is not an integer")))?,
            _ => 0,
        };
        let next = current + delta;
        let expires_at = entries.get(key).filter(|e| e.live()).and_then(|e| e.expires_at);
        entries.insert(
            key.to_string(),
            FastEntry { value: next.to_string(), expires_at },
        );
        Ok(next)
    }
}

#[async_trait]
impl FastStore for MemoryFastStore {
    async fn get(&self, key: &str) -> Result<Option<String>, FilepressError> {
        let entries = self.entries.lock().await;
        Ok(entries.get(key).filter(|e| e.live()).map(|e| e.value.clone()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), FilepressError> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            FastEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(())
    }

    async fn decr_by(&self, key: &str, amount: i64) -> Result<i64, FilepressError> {
        self.counter_op(key, -amount).await
    }

    async fn incr_by(&self, key: &str, amount: i64) -> Result<i64, FilepressError> {
        self.counter_op(key, amount).await
    }

    async fn exists(&self, key: &str) -> Result<bool, FilepressError> {
        let entries = self.entries.lock().await;
        Ok(entries.get(key).map(|e| e.live()).unwrap_or(false))
    }
}

// ── MemoryDurableStore ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryDurableStore {
    tables: Mutex<HashMap<String, Vec<Value>>>,
    fail_writes: AtomicBool,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail, for follower-failure tests.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), FilepressError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(FilepressError::DurableStore("injected write failure".into()));
        }
        Ok(())
    }

    /// Snapshot a table's rows (test inspection helper).
    pub async fn rows(&self, table: &str) -> Vec<Value> {
        self.tables.lock().await.get(table).cloned().unwrap_or_default()
    }

    fn matches(row: &Value, filters: &[Filter]) -> bool {
        filters.iter().all(|(col, val)| {
            row.get(col)
                .map(|v| match v {
                    Value::String(s) => s == val,
                    other => other.to_string() == *val,
                })
                .unwrap_or(false)
        })
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn select(&self, table: &str, filters: &[Filter])
        -> Result<Vec<Value>, FilepressError>
    {
        let tables = self.tables.lock().await;
        Ok(tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|r| Self::matches(r, filters))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert(&self, table: &str, row: Value) -> Result<(), FilepressError> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        tables.entry(table.to_string()).or_default().push(row);
        Ok(())
    }

    async fn upsert(&self, table: &str, row: Value, on_conflict: &str)
        -> Result<(), FilepressError>
    {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        let rows = tables.entry(table.to_string()).or_default();
        let key = row.get(on_conflict).cloned();
        if let Some(existing) = rows
            .iter_mut()
            .find(|r| key.is_some() && r.get(on_conflict) == key.as_ref())
        {
            if let (Value::Object(dst), Value::Object(src)) = (existing, &row) {
                for (k, v) in src {
                    dst.insert(k.clone(), v.clone());
                }
            }
        } else {
            rows.push(row);
        }
        Ok(())
    }

    async fn update(&self, table: &str, filters: &[Filter], patch: Value)
        -> Result<u64, FilepressError>
    {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        let Some(rows) = tables.get_mut(table) else { return Ok(0) };
        let mut changed = 0;
        for row in rows.iter_mut().filter(|r| Self::matches(r, filters)) {
            if let (Value::Object(dst), Value::Object(src)) = (row, &patch) {
                for (k, v) in src {
                    dst.insert(k.clone(), v.clone());
                }
            }
            changed += 1;
        }
        Ok(changed)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
