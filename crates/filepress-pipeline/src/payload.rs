use serde::{Deserialize, Serialize};
use serde_json::Value;

use filepress_core::types::{Credits, FileKind, JobId, PaymentMethod, Timestamp, Tool, UserRef};

/// Everything the Task worker needs, fixed at admission time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskPayload {
    pub job_id: JobId,
    pub user: UserRef,
    pub tool: Tool,
    pub tool_options: Value,
    pub file_links: Vec<String>,
    pub file_kind: FileKind,
    pub tool_price: Credits,
    pub payment_method: PaymentMethod,
    pub submitted_at: Timestamp,
}

/// Which webhook event produced a Downloader job.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum WebhookEvent {
    #[serde(rename = "task.completed")]
    TaskCompleted,
    #[serde(rename = "task.failed")]
    TaskFailed,
}

impl WebhookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEvent::TaskCompleted => "task.completed",
            WebhookEvent::TaskFailed    => "task.failed",
        }
    }
}

/// Downloader-stage job payload, built from a validated webhook callback.
/// Fields the callback omits are recovered from the Task stage's audit row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadPayload {
    pub job_id: JobId,
    pub event: WebhookEvent,
    pub tool: Option<Tool>,
    pub server: Option<String>,
    pub task_id: Option<String>,
    pub tg_user_id: Option<i64>,
    pub status: Option<String>,
    pub status_message: Option<String>,
}
