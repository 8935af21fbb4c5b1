//! Inline-keyboard callback data codec.
//!
//! Telegram caps callback data at 64 bytes, so the format is a compact
//! `kind|task` pair. Parsing is the exact inverse of generation.

use filepress_core::FilepressError;

/// Telegram's hard limit on callback data.
pub const CALLBACK_DATA_MAX_BYTES: usize = 64;

pub fn generate_callback_data(kind: &str, task: &str) -> String {
    format!("{kind}|{task}")
}

pub fn parse_callback_data(data: &str) -> Result<(String, String), FilepressError> {
    let (kind, task) = data
        .split_once('|')
        .ok_or_else(|| FilepressError::Other(format!("malformed callback data: {data}")))?;
    if kind.is_empty() {
        return Err(FilepressError::Other(format!("malformed callback data: {data}")));
    }
    Ok((kind.to_string(), task.to_string()))
}
