use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use filepress_core::FilepressError;

use crate::types::{TaskHandle, TaskRequest, TaskResult, UploadedFile};
use crate::IloveApi;

const DEFAULT_API_BASE: &str = "https://api.ilovepdf.com";

/// Lifetime of a locally self-signed token (seconds).
const SELF_SIGNED_TOKEN_TTL_SECS: i64 = 2 * 60 * 60;

/// Safety margin before a cached token is considered stale (seconds).
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Serialize)]
struct TokenClaims {
    iss: String,
    iat: i64,
    nbf: i64,
    exp: i64,
    jti: String,
}

struct CachedToken {
    token: String,
    expires_at: i64,
}

/// HTTP client for the iLoveAPI processing service.
///
/// When the secret key is configured, bearer tokens are self-signed locally
/// (HS256); otherwise they are requested from the auth endpoint. Tokens are
/// cached until shortly before expiry.
pub struct IloveClient {
    http: reqwest::Client,
    api_base: String,
    public_key: String,
    secret_key: Option<String>,
    token: Mutex<Option<CachedToken>>,
}

fn service_err(operation: &str, e: impl std::fmt::Display) -> FilepressError {
    FilepressError::ExternalService { operation: operation.to_string(), message: e.to_string() }
}

/// Last path segment of a source link, used as the upload filename and,
/// consistently, as the artifact's download filename.
pub fn filename_from_link(link: &str) -> String {
    link.rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(|s| s.split('?').next().unwrap_or(s).to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "file".to_string())
}

impl IloveClient {
    pub fn new(public_key: &str, secret_key: Option<&str>) -> Self {
        Self::with_api_base(public_key, secret_key, DEFAULT_API_BASE)
    }

    pub fn with_api_base(public_key: &str, secret_key: Option<&str>, api_base: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            public_key: public_key.to_string(),
            secret_key: secret_key.map(str::to_string),
            token: Mutex::new(None),
        }
    }

    // ── Auth ─────────────────────────────────────────────────────────────────

    async fn token(&self) -> Result<String, FilepressError> {
        let mut cached = self.token.lock().await;
        let now = Utc::now().timestamp();
        if let Some(t) = cached.as_ref() {
            if now < t.expires_at - TOKEN_EXPIRY_MARGIN_SECS {
                return Ok(t.token.clone());
            }
        }

        let (token, expires_at) = match &self.secret_key {
            Some(secret) => self.self_sign(secret, now)?,
            None => self.request_token().await?,
        };
        *cached = Some(CachedToken { token: token.clone(), expires_at });
        Ok(token)
    }

    fn self_sign(&self, secret: &str, now: i64) -> Result<(String, i64), FilepressError> {
        let expires_at = now + SELF_SIGNED_TOKEN_TTL_SECS;
        let claims = TokenClaims {
            iss: self.api_base.clone(),
            iat: now,
            nbf: now,
            exp: expires_at,
            jti: self.public_key.clone(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .map_err(|e| FilepressError::ExternalAuth(e.to_string()))?;
        Ok((token, expires_at))
    }

    async fn request_token(&self) -> Result<(String, i64), FilepressError> {
        #[derive(Deserialize)]
        struct AuthResponse {
            token: String,
        }

        let resp = self
            .http
            .post(format!("{}/v1/auth", self.api_base))
            .json(&json!({ "public_key": self.public_key }))
            .send()
            .await
            .map_err(|e| FilepressError::ExternalAuth(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(FilepressError::ExternalAuth(format!(
                "auth endpoint returned {}",
                resp.status()
            )));
        }
        let auth: AuthResponse = resp
            .json()
            .await
            .map_err(|e| FilepressError::ExternalAuth(e.to_string()))?;
        // Server-issued tokens carry their own expiry; refresh hourly.
        Ok((auth.token, Utc::now().timestamp() + 3600))
    }

    // ── Task operations ──────────────────────────────────────────────────────

    async fn start(&self, tool: &str) -> Result<TaskHandle, FilepressError> {
        let token = self.token().await?;
        let resp = self
            .http
            .get(format!("{}/v1/start/{}", self.api_base, tool))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| service_err("start", e))?;
        if !resp.status().is_success() {
            return Err(service_err("start", resp.status()));
        }
        resp.json().await.map_err(|e| service_err("start", e))
    }

    async fn upload(
        &self,
        handle: &TaskHandle,
        link: &str,
    ) -> Result<UploadedFile, FilepressError> {
        #[derive(Deserialize)]
        struct UploadResponse {
            server_filename: String,
        }

        let token = self.token().await?;
        let resp = self
            .http
            .post(format!("https://{}/v1/upload", handle.server))
            .bearer_auth(token)
            .json(&json!({ "task": handle.task_id, "cloud_file": link }))
            .send()
            .await
            .map_err(|e| service_err("upload", e))?;
        if !resp.status().is_success() {
            return Err(service_err("upload", resp.status()));
        }
        let uploaded: UploadResponse = resp.json().await.map_err(|e| service_err("upload", e))?;
        Ok(UploadedFile {
            server_filename: uploaded.server_filename,
            filename: filename_from_link(link),
        })
    }

    async fn process(
        &self,
        handle: &TaskHandle,
        request: &TaskRequest,
        files: &[UploadedFile],
    ) -> Result<(), FilepressError> {
        let mut body = json!({
            "task": handle.task_id,
            "tool": request.tool.as_str(),
            "files": files,
            "custom_string": request.custom_string,
            "custom_int": request.custom_int,
        });
        if let (Some(dst), Some(src)) = (body.as_object_mut(), request.tool_options.as_object()) {
            for (k, v) in src {
                dst.insert(k.clone(), v.clone());
            }
        }

        let token = self.token().await?;
        let resp = self
            .http
            .post(format!("https://{}/v1/process", handle.server))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| service_err("process", e))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let detail = resp.text().await.unwrap_or_default();
            warn!(tool = request.tool.as_str(), %status, detail, "process call rejected");
            return Err(service_err("process", status));
        }
        Ok(())
    }
}

#[async_trait]
impl IloveApi for IloveClient {
    async fn submit_task(&self, request: &TaskRequest) -> Result<TaskResult, FilepressError> {
        let handle = self.start(request.tool.as_str()).await?;
        debug!(
            tool = request.tool.as_str(),
            server = %handle.server,
            task_id = %handle.task_id,
            "task slot started"
        );

        let mut files = Vec::with_capacity(request.file_links.len());
        for link in &request.file_links {
            files.push(self.upload(&handle, link).await?);
        }

        self.process(&handle, request, &files).await?;
        Ok(TaskResult { server: handle.server, task_id: handle.task_id, files })
    }

    async fn download(&self, server: &str, task_id: &str) -> Result<Vec<u8>, FilepressError> {
        let server = crate::types::strip_server_escapes(server);
        let token = self.token().await?;
        let resp = self
            .http
            .get(format!("https://{server}/v1/download/{task_id}"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| service_err("download", e))?;
        if !resp.status().is_success() {
            return Err(service_err("download", resp.status()));
        }
        let bytes = resp.bytes().await.map_err(|e| service_err("download", e))?;
        Ok(bytes.to_vec())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use filepress_core::types::Tool;

    #[test]
    fn filename_from_link_takes_last_segment() {
        assert_eq!(filename_from_link("https://cdn.example/lorem.jpg"), "lorem.jpg");
        assert_eq!(filename_from_link("https://cdn.example/a/b/c.pdf?x=1"), "c.pdf");
        assert_eq!(filename_from_link("https://cdn.example/"), "file");
    }

    #[test]
    fn self_signed_token_has_sane_window() {
        let client = IloveClient::new("project_public_x", Some("secret"));
        let now = Utc::now().timestamp();
        let (token, expires_at) = client.self_sign("secret", now).unwrap();
        assert_eq!(token.matches('.').count(), 2, "JWT must have three segments");
        assert_eq!(expires_at, now + SELF_SIGNED_TOKEN_TTL_SECS);
    }

    #[test]
    fn process_body_keeps_correlation_tokens() {
        // The webhook relies on custom_string/custom_int echoing back.
        let request = TaskRequest {
            tool: Tool::UpscaleImage,
            file_links: vec!["https://cdn.example/lorem.jpg".into()],
            tool_options: json!({"multiplier": 4}),
            custom_string: "a".repeat(40),
            custom_int: Some(185150),
        };
        assert_eq!(request.custom_int, Some(185150));
        assert_eq!(request.tool_options["multiplier"], 4);
    }
}
