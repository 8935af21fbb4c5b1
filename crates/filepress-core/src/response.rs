use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FilepressError;

/// Structured response envelope used by every HTTP surface.
///
/// `{ ok, statusCode, statusText, data?, error?{name, message} }`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub ok: bool,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(rename = "statusText")]
    pub status_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EnvelopeError>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnvelopeError {
    pub name: String,
    pub message: String,
}

impl Envelope {
    pub fn ok(status_code: u16, data: Option<Value>) -> Self {
        Self {
            ok: true,
            status_code,
            status_text: status_text(status_code).to_string(),
            data,
            error: None,
        }
    }

    pub fn error(status_code: u16, err: &FilepressError) -> Self {
        Self {
            ok: false,
            status_code,
            status_text: status_text(status_code).to_string(),
            data: None,
            error: Some(EnvelopeError {
                name: err.name().to_string(),
                message: err.to_string(),
            }),
        }
    }
}

fn status_text(code: u16) -> &'static str {
    match code {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        _   => "Unknown",
    }
}
