//! Webhook intake for the processing service.
//!
//! `POST /iloveapi` validates the callback against the schema, authenticates
//! it by shared secret or origin allow-list, and enqueues the Downloader
//! continuation keyed by the job fingerprint. Duplicate deliveries are safe:
//! the queue ignores a live id. `GET /health` answers deployment probes.

pub mod types;

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use filepress_core::types::{JobId, Tool};
use filepress_core::{Envelope, FilepressError};
use filepress_pipeline::{DownloadPayload, WebhookEvent};
use filepress_queue::{EnqueueOptions, JobQueue};

pub use types::{WebhookBody, WebhookData, WebhookTask};

// ── Auth ─────────────────────────────────────────────────────────────────────

/// Webhook authentication policy: a shared secret (header or query `apikey`)
/// or an allow-listed `Origin`/`Referer` host. Allow-list entries match
/// exactly, or by suffix when they start with a dot.
#[derive(Clone, Debug, Default)]
pub struct WebhookAuth {
    pub secret: Option<String>,
    pub allowed_hosts: Vec<String>,
}

/// Host portion of an Origin/Referer value (`https://sub.example.com/x` →
/// `sub.example.com`).
fn host_of(value: &str) -> Option<&str> {
    let rest = value.split_once("://").map(|(_, r)| r).unwrap_or(value);
    let host = rest.split(['/', '?']).next()?;
    let host = host.split('@').last()?;
    let host = host.split(':').next()?;
    if host.is_empty() { None } else { Some(host) }
}

impl WebhookAuth {
    fn host_allowed(&self, host: &str) -> bool {
        self.allowed_hosts.iter().any(|entry| {
            if let Some(suffix) = entry.strip_prefix('.') {
                host == suffix || host.ends_with(entry.as_str())
            } else {
                host == entry
            }
        })
    }

    pub fn authorize(&self, headers: &HeaderMap, query_apikey: Option<&str>) -> bool {
        if let Some(secret) = &self.secret {
            let header_key = headers.get("apikey").and_then(|v| v.to_str().ok());
            if header_key == Some(secret.as_str()) || query_apikey == Some(secret.as_str()) {
                return true;
            }
        }
        for header in ["origin", "referer"] {
            if let Some(value) = headers.get(header).and_then(|v| v.to_str().ok()) {
                if let Some(host) = host_of(value) {
                    if self.host_allowed(host) {
                        return true;
                    }
                }
            }
        }
        false
    }
}

// ── State & router ───────────────────────────────────────────────────────────

pub struct WebhookState {
    pub download_queue: Arc<JobQueue<DownloadPayload>>,
    pub auth: WebhookAuth,
}

pub fn router(state: Arc<WebhookState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .route("/iloveapi", post(iloveapi_webhook))
        .route("/health", get(health))
        .layer(cors)
        .with_state(state)
}

fn envelope_response(status: StatusCode, envelope: Envelope) -> Response {
    (status, Json(envelope)).into_response()
}

fn bad_request(err: FilepressError) -> Response {
    envelope_response(StatusCode::BAD_REQUEST, Envelope::error(400, &err))
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health() -> Response {
    envelope_response(StatusCode::OK, Envelope::ok(200, Some(json!({ "alive": true }))))
}

async fn iloveapi_webhook(
    State(state): State<Arc<WebhookState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Result<Json<WebhookBody>, JsonRejection>,
) -> Response {
    if !state.auth.authorize(&headers, query.get("apikey").map(String::as_str)) {
        warn!("webhook rejected: unauthorized");
        return envelope_response(
            StatusCode::UNAUTHORIZED,
            Envelope::error(401, &FilepressError::Unauthorized("bad api key or origin".into())),
        );
    }

    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            debug!(error = %rejection, "webhook body rejected");
            return bad_request(FilepressError::Other(rejection.body_text()));
        }
    };

    let event = match body.event.as_str() {
        "task.completed" => WebhookEvent::TaskCompleted,
        "task.failed" => WebhookEvent::TaskFailed,
        other => return bad_request(FilepressError::InvalidEvent(other.to_string())),
    };

    let task = body.data.task;
    let Some(custom_string) = task.custom_string.as_deref() else {
        return bad_request(FilepressError::MissingParameter("custom_string"));
    };
    let job_id = match JobId::from_hex(custom_string) {
        Ok(id) => id,
        Err(e) => return bad_request(e),
    };

    let payload = DownloadPayload {
        job_id,
        event,
        tool: task.tool.as_deref().and_then(|t| t.parse::<Tool>().ok()),
        server: task.server,
        task_id: task.task_id,
        tg_user_id: task.custom_int,
        status: task.status,
        status_message: task.status_message,
    };

    let enqueued = state.download_queue.add(
        event.as_str(),
        job_id,
        payload,
        EnqueueOptions::default(),
    );
    info!(job_id = %job_id, event = event.as_str(), enqueued, "webhook accepted");

    envelope_response(
        StatusCode::OK,
        Envelope::ok(
            200,
            Some(json!({ "isWaiting": enqueued, "jid": job_id.to_hex() })),
        ),
    )
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state(secret: Option<&str>, hosts: &[&str]) -> Arc<WebhookState> {
        Arc::new(WebhookState {
            download_queue: Arc::new(JobQueue::new("downloaderQueue")),
            auth: WebhookAuth {
                secret: secret.map(str::to_string),
                allowed_hosts: hosts.iter().map(|h| h.to_string()).collect(),
            },
        })
    }

    fn callback_json(event: &str, custom_string: &str) -> String {
        json!({
            "event": event,
            "data": {
                "task": {
                    "tool": "upscaleimage",
                    "server": "api8g.example.com",
                    "task": "T1",
                    "custom_int": 185150,
                    "custom_string": custom_string,
                    "status": "TaskSuccess",
                }
            }
        })
        .to_string()
    }

    fn post_webhook(body: &str, apikey: Option<&str>, origin: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/iloveapi")
            .header("content-type", "application/json");
        if let Some(key) = apikey {
            builder = builder.header("apikey", key);
        }
        if let Some(origin) = origin {
            builder = builder.header("origin", origin);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn job_hex() -> String {
        JobId::from_bytes([7; 20]).to_hex()
    }

    #[tokio::test]
    async fn completed_event_enqueues_downloader_job() {
        let state = state(Some("s3cret"), &[]);
        let app = router(Arc::clone(&state));

        let response = app
            .oneshot(post_webhook(&callback_json("task.completed", &job_hex()), Some("s3cret"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["ok"], true);
        assert_eq!(json["data"]["isWaiting"], true);
        assert_eq!(json["data"]["jid"], job_hex());
        assert_eq!(state.download_queue.counts().pending, 1);
    }

    #[tokio::test]
    async fn duplicate_delivery_is_ignored() {
        let state = state(Some("s3cret"), &[]);
        let app = router(Arc::clone(&state));
        let body = callback_json("task.completed", &job_hex());

        let first = app
            .clone()
            .oneshot(post_webhook(&body, Some("s3cret"), None))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .oneshot(post_webhook(&body, Some("s3cret"), None))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::OK);
        let json = body_json(second).await;
        assert_eq!(json["data"]["isWaiting"], false);
        assert_eq!(state.download_queue.counts().pending, 1);
    }

    #[tokio::test]
    async fn failed_event_is_also_enqueued() {
        let state = state(Some("s3cret"), &[]);
        let app = router(Arc::clone(&state));

        let response = app
            .oneshot(post_webhook(&callback_json("task.failed", &job_hex()), Some("s3cret"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.download_queue.counts().pending, 1);
    }

    #[tokio::test]
    async fn unknown_event_is_bad_request() {
        let app = router(state(Some("s3cret"), &[]));
        let response = app
            .oneshot(post_webhook(&callback_json("task.started", &job_hex()), Some("s3cret"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"]["name"], "ValidationError");
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let app = router(state(Some("s3cret"), &[]));
        let response = app
            .oneshot(post_webhook("{\"event\": \"task.completed\"}", Some("s3cret"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_custom_string_is_bad_request() {
        let app = router(state(Some("s3cret"), &[]));
        let body = json!({
            "event": "task.completed",
            "data": { "task": { "tool": "merge" } }
        })
        .to_string();
        let response = app
            .oneshot(post_webhook(&body, Some("s3cret"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_auth_is_unauthorized() {
        let app = router(state(Some("s3cret"), &[]));
        let response = app
            .oneshot(post_webhook(&callback_json("task.completed", &job_hex()), None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn query_apikey_is_accepted() {
        let state = state(Some("s3cret"), &[]);
        let app = router(Arc::clone(&state));
        let request = Request::builder()
            .method("POST")
            .uri("/iloveapi?apikey=s3cret")
            .header("content-type", "application/json")
            .body(Body::from(callback_json("task.completed", &job_hex())))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn allow_listed_origin_is_accepted() {
        let app = router(state(None, &["hooks.example.com", ".example.org"]));
        let response = app
            .clone()
            .oneshot(post_webhook(
                &callback_json("task.completed", &job_hex()),
                None,
                Some("https://hooks.example.com/callbacks"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Leading-dot entries match any subdomain.
        let response = app
            .oneshot(post_webhook(
                &callback_json("task.failed", &job_hex()),
                None,
                Some("https://eu1.example.org"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unlisted_origin_is_unauthorized() {
        let app = router(state(None, &["hooks.example.com"]));
        let response = app
            .oneshot(post_webhook(
                &callback_json("task.completed", &job_hex()),
                None,
                Some("https://evil.example.net"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn health_answers() {
        let app = router(state(None, &[]));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["data"]["alive"], true);
    }

    #[test]
    fn host_parsing() {
        assert_eq!(host_of("https://a.example.com/x?y"), Some("a.example.com"));
        assert_eq!(host_of("http://a.example.com:8443"), Some("a.example.com"));
        assert_eq!(host_of("a.example.com"), Some("a.example.com"));
        assert_eq!(host_of("https://"), None);
    }
}
