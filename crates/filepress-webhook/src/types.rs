use serde::Deserialize;
use serde_json::Value;

/// Callback body posted by the processing service. The schema is the
/// bit-for-bit contract: anything that does not parse is a 400.
#[derive(Debug, Deserialize)]
pub struct WebhookBody {
    pub event: String,
    pub data: WebhookData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookData {
    pub task: WebhookTask,
}

/// The task object inside a callback. Every field is optional on the wire
/// except that a missing `custom_string` makes the callback uncorrelatable.
#[derive(Debug, Deserialize)]
pub struct WebhookTask {
    pub tool: Option<String>,
    pub server: Option<String>,
    #[serde(rename = "task")]
    pub task_id: Option<String>,
    pub custom_int: Option<i64>,
    pub custom_string: Option<String>,
    pub status: Option<String>,
    pub status_message: Option<String>,
    pub output_filesize: Option<u64>,
    pub output_filenumber: Option<u64>,
    pub output_extensions: Option<Value>,
    pub output_filename: Option<String>,
}
