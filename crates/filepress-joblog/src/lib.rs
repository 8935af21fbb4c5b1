//! Job log store: the audit trail of every pipeline stage transition.
//!
//! One row per job fingerprint. The Task stage inserts the row when it
//! terminates; the Downloader stage patches it. Once a row is immutable no
//! further write may change any stage field — the patch path enforces the
//! latch by predicate, so a stale worker cannot resurrect a closed job.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::debug;

use filepress_core::constants::TABLE_JOB_LOGS;
use filepress_core::types::{
    Credits, JobId, JobStats, PaymentMethod, StageEvent, Tool, UserRef,
};
use filepress_core::FilepressError;
use filepress_store::{DurableStore, Filter};

/// Everything `add_job_log` records about a terminated stage.
#[derive(Clone, Debug)]
pub struct JobLogEntry {
    pub event: StageEvent,
    pub job_id: JobId,
    pub user: UserRef,
    pub immutable: bool,
    pub tool: Tool,
    pub tool_price: Credits,
    pub tool_options: Value,
    pub payment_method: PaymentMethod,
    pub files: Value,
    pub worker_result: Option<Value>,
    pub worker_error: Option<Value>,
    pub worker_stats: JobStats,
}

pub struct JobLogStore<D: DurableStore> {
    durable: Arc<D>,
}

impl<D: DurableStore> JobLogStore<D> {
    pub fn new(durable: Arc<D>) -> Self {
        Self { durable }
    }

    /// Insert a fresh audit row for a stage that just terminated. Exactly one
    /// of the user identities is set — guaranteed by `UserRef`.
    pub async fn add_job_log(&self, entry: JobLogEntry) -> Result<(), FilepressError> {
        if entry.tool_price < 0 {
            return Err(FilepressError::InvalidAmount(entry.tool_price));
        }
        if entry.files.is_null() {
            return Err(FilepressError::MissingParameter("files"));
        }

        let prefix = entry.event.stage.column_prefix();
        let mut row = json!({
            "job_id": entry.job_id.to_hex(),
            "created_at": Utc::now().to_rfc3339(),
            "user_id": entry.user.user_id(),
            "tg_user_id": entry.user.tg_user_id(),
            "tool": entry.tool.as_str(),
            "tool_options": entry.tool_options,
            "tool_price": entry.tool_price,
            "payment_method": entry.payment_method.as_str(),
            "immutable": entry.immutable,
            "files": entry.files,
        });
        let obj = row.as_object_mut().ok_or(FilepressError::MissingParameter("row"))?;
        obj.insert(
            format!("{prefix}_state"),
            json!(entry.event.outcome.as_str()),
        );
        obj.insert(format!("{prefix}_result"), entry.worker_result.unwrap_or(Value::Null));
        obj.insert(format!("{prefix}_error"), entry.worker_error.unwrap_or(Value::Null));
        obj.insert(
            format!("{prefix}_stats"),
            serde_json::to_value(&entry.worker_stats)
                .map_err(|e| FilepressError::Serialization(e.to_string()))?,
        );

        self.durable.insert(TABLE_JOB_LOGS, row).await?;
        debug!(job_id = %entry.job_id, event = %entry.event, "job log row added");
        Ok(())
    }

    /// Fetch audit rows matching `filter` (downloader context lookups).
    pub async fn find_job_logs(&self, filter: &[Filter]) -> Result<Vec<Value>, FilepressError> {
        self.durable.select(TABLE_JOB_LOGS, filter).await
    }

    /// Patch the stage fields of rows matching `filter`.
    ///
    /// The filter must carry at least two predicates and may not constrain
    /// `immutable` or any `*_worker_state` column. Rows already latched
    /// immutable are excluded by predicate. Returns the number of rows
    /// patched.
    pub async fn update_worker_job_log(
        &self,
        event: StageEvent,
        filter: &[Filter],
        immutable: bool,
        worker_result: Option<Value>,
        worker_error: Option<Value>,
        worker_stats: Option<JobStats>,
    ) -> Result<u64, FilepressError> {
        if filter.len() < 2 {
            return Err(FilepressError::FilterTooBroad(filter.len()));
        }
        for (column, _) in filter {
            if column == "immutable" || column.ends_with("_worker_state") {
                return Err(FilepressError::FilterFieldForbidden(column.clone()));
            }
        }

        let prefix = event.stage.column_prefix();
        let mut patch = json!({
            "immutable": immutable,
        });
        let obj = patch.as_object_mut().ok_or(FilepressError::MissingParameter("patch"))?;
        obj.insert(format!("{prefix}_state"), json!(event.outcome.as_str()));
        if let Some(result) = worker_result {
            obj.insert(format!("{prefix}_result"), result);
        }
        if let Some(error) = worker_error {
            obj.insert(format!("{prefix}_error"), error);
        }
        if let Some(stats) = worker_stats {
            obj.insert(
                format!("{prefix}_stats"),
                serde_json::to_value(&stats)
                    .map_err(|e| FilepressError::Serialization(e.to_string()))?,
            );
        }

        let mut guarded: Vec<Filter> = filter.to_vec();
        guarded.push(("immutable".to_string(), "false".to_string()));

        let changed = self.durable.update(TABLE_JOB_LOGS, &guarded, patch).await?;
        debug!(event = %event, changed, "job log rows patched");
        Ok(changed)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
