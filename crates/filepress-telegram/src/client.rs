use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use filepress_core::types::Tool;
use filepress_core::FilepressError;
use filepress_pipeline::Notifier;

use crate::callback::generate_callback_data;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Buttons per keyboard row.
const KEYBOARD_ROW_WIDTH: usize = 2;

/// Minimal Telegram Bot API client: the pipeline only ever sends text and
/// documents. The command surface and update handling live elsewhere.
pub struct BotClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

#[derive(Deserialize)]
struct BotResponse {
    ok: bool,
    description: Option<String>,
}

fn notify_err(e: impl std::fmt::Display) -> FilepressError {
    FilepressError::Notify(e.to_string())
}

fn button_label(tool: Tool) -> &'static str {
    match tool {
        Tool::UpscaleImage          => "Upscale",
        Tool::RemoveBackgroundImage => "Remove background",
        Tool::ImagePdf              => "Convert to PDF",
        Tool::Merge                 => "Merge",
        Tool::Compress              => "Compress",
    }
}

/// Build the follow-up inline keyboard: one button per chainable tool, the
/// delivered job's fingerprint as the callback task.
pub fn follow_up_keyboard(tools: &[Tool], job_hex: &str) -> Value {
    let buttons: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "text": button_label(*t),
                "callback_data": generate_callback_data(t.as_str(), job_hex),
            })
        })
        .collect();
    let rows: Vec<Value> = buttons
        .chunks(KEYBOARD_ROW_WIDTH)
        .map(|chunk| Value::Array(chunk.to_vec()))
        .collect();
    json!({ "inline_keyboard": rows })
}

impl BotClient {
    pub fn new(token: &str) -> Self {
        Self::with_api_base(token, DEFAULT_API_BASE)
    }

    pub fn with_api_base(token: &str, api_base: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    async fn check(resp: reqwest::Response, method: &str) -> Result<(), FilepressError> {
        let status = resp.status();
        let body: BotResponse = resp.json().await.map_err(notify_err)?;
        if !status.is_success() || !body.ok {
            return Err(FilepressError::Notify(format!(
                "{method} returned {status}: {}",
                body.description.unwrap_or_default()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for BotClient {
    async fn send_text(&self, tg_user_id: i64, text: &str) -> Result<(), FilepressError> {
        let resp = self
            .http
            .post(self.method_url("sendMessage"))
            .json(&json!({ "chat_id": tg_user_id, "text": text }))
            .send()
            .await
            .map_err(notify_err)?;
        Self::check(resp, "sendMessage").await?;
        debug!(tg_user_id, "message sent");
        Ok(())
    }

    async fn send_document(
        &self,
        tg_user_id: i64,
        filename: &str,
        bytes: Vec<u8>,
        caption: &str,
        follow_ups: &[Tool],
    ) -> Result<(), FilepressError> {
        let mut form = Form::new()
            .text("chat_id", tg_user_id.to_string())
            .text("caption", caption.to_string())
            .part(
                "document",
                Part::bytes(bytes).file_name(filename.to_string()),
            );
        if !follow_ups.is_empty() {
            form = form.text(
                "reply_markup",
                follow_up_keyboard(follow_ups, caption).to_string(),
            );
        }

        let resp = self
            .http
            .post(self.method_url("sendDocument"))
            .multipart(form)
            .send()
            .await
            .map_err(notify_err)?;
        Self::check(resp, "sendDocument").await?;
        debug!(tg_user_id, filename, "document delivered");
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
