use serde::{Deserialize, Serialize};
use serde_json::Value;

use filepress_core::types::Tool;

/// A started task slot on the processing service: which regional server owns
/// it and its task id.
#[derive(Clone, Debug, Deserialize)]
pub struct TaskHandle {
    #[serde(deserialize_with = "unescaped_server")]
    pub server: String,
    #[serde(rename = "task")]
    pub task_id: String,
}

/// Strip JSON escaping artifacts from a server name (`api8g\/example.com`).
pub(crate) fn strip_server_escapes(server: &str) -> String {
    server.replace('\\', "")
}

fn unescaped_server<'de, D: serde::Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    let raw = String::deserialize(d)?;
    Ok(strip_server_escapes(&raw))
}

/// One uploaded input as the process call wants it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadedFile {
    pub server_filename: String,
    pub filename: String,
}

/// Everything the Task stage needs to submit one job.
#[derive(Clone, Debug)]
pub struct TaskRequest {
    pub tool: Tool,
    /// Source links, ordered. Single-input tools use the first.
    pub file_links: Vec<String>,
    /// Tool-specific options merged into the process call.
    pub tool_options: Value,
    /// Job fingerprint, echoed back by the webhook.
    pub custom_string: String,
    /// Telegram user id, echoed back by the webhook.
    pub custom_int: Option<i64>,
}

/// The Task stage result recorded in the job log: enough to locate the
/// artifact when the webhook arrives.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskResult {
    pub server: String,
    pub task_id: String,
    pub files: Vec<UploadedFile>,
}
