//! filepress-server — the pipeline backend binary.
//!
//! Startup sequence:
//!   1. Read configuration from the environment
//!   2. Connect the fast store (Redis) and durable store (Supabase REST)
//!   3. Build the shared credit ledger, rate limiter and both job queues
//!   4. Start the Task and Downloader workers
//!   5. Serve the webhook surface (`/iloveapi`, `/health`, telegram path)
//!   6. On SIGINT/SIGTERM: stop intake, drain workers, exit

mod config;

use std::sync::Arc;

use anyhow::Context;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use clap::Parser;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{info, warn};

use filepress_core::{Envelope, FilepressError};
use filepress_ilove::IloveClient;
use filepress_joblog::JobLogStore;
use filepress_ledger::SharedCredits;
use filepress_limiter::RateLimiter;
use filepress_pipeline::{
    DownloadPayload, DownloadProcessor, RefundSupervisor, TaskPayload, TaskProcessor,
};
use filepress_queue::{JobQueue, Worker, WorkerOptions};
use filepress_store::redis::RedisStore;
use filepress_store::supabase::SupabaseStore;
use filepress_telegram::BotClient;
use filepress_webhook::{WebhookAuth, WebhookState};

use config::Config;

#[derive(Parser, Debug)]
#[command(
    name = "filepress-server",
    version,
    about = "File-processing pipeline backend: shared credits, two-stage jobs, webhook continuation"
)]
struct Args {
    /// Override the listen port from the environment.
    #[arg(long)]
    port: Option<u16>,
}

/// State for the chat-platform webhook path. Update handling itself is the
/// bot adapter's concern; this route authenticates and acknowledges so the
/// platform keeps delivering.
struct BotGate {
    secret: Option<String>,
}

async fn telegram_update(
    State(gate): State<Arc<BotGate>>,
    headers: HeaderMap,
    _update: Json<Value>,
) -> impl IntoResponse {
    if let Some(secret) = &gate.secret {
        let presented = headers
            .get("x-telegram-bot-api-secret-token")
            .and_then(|v| v.to_str().ok());
        if presented != Some(secret.as_str()) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(Envelope::error(
                    401,
                    &FilepressError::Unauthorized("bad webhook secret token".into()),
                )),
            );
        }
    }
    (StatusCode::OK, Json(Envelope::ok(200, None)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,filepress=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    let mut config = Config::from_env().context("reading configuration")?;
    if let Some(port) = args.port {
        config.port = port;
    }
    info!(production = config.production, "filepress server starting");

    // ── Stores ────────────────────────────────────────────────────────────────
    let fast = Arc::new(
        RedisStore::connect(&config.redis_url)
            .await
            .map_err(|e| anyhow::anyhow!("connecting fast store: {e}"))?,
    );
    let durable = Arc::new(SupabaseStore::new(&config.sb_rest_url, &config.sb_service_key));

    // ── Ledger, limiter, queues ───────────────────────────────────────────────
    let credits = Arc::new(SharedCredits::new(Arc::clone(&fast), Arc::clone(&durable), "server"));
    let _limiter = Arc::new(RateLimiter::default());
    let task_queue: Arc<JobQueue<TaskPayload>> = Arc::new(JobQueue::new("taskQueue"));
    let download_queue: Arc<JobQueue<DownloadPayload>> = Arc::new(JobQueue::new("downloaderQueue"));

    // Bring today's pool up before traffic lands.
    let opening = credits
        .get_credits_left(true)
        .await
        .map_err(|e| anyhow::anyhow!("initializing shared credits: {e}"))?;
    info!(credits_left = opening, "shared credit pool ready");

    // ── External interfaces ───────────────────────────────────────────────────
    let ilove = Arc::new(IloveClient::new(
        &config.ilove_public_key,
        config.ilove_secret_key.as_deref(),
    ));
    let notifier = Arc::new(BotClient::new(&config.bot_token));

    // ── Pipeline wiring ───────────────────────────────────────────────────────
    // The chat-bot adapter (external) drives admission through an `Ingress`
    // built over `_limiter`, `credits` and `task_queue`.
    let log = Arc::new(JobLogStore::new(Arc::clone(&durable)));
    let refunds = Arc::new(RefundSupervisor::new(Arc::clone(&credits), Arc::clone(&notifier)));
    let task_processor = Arc::new(TaskProcessor::new(
        Arc::clone(&ilove),
        Arc::clone(&log),
        Arc::clone(&refunds),
        Arc::clone(&notifier),
    ));
    let download_processor = Arc::new(DownloadProcessor::new(
        Arc::clone(&ilove),
        Arc::clone(&log),
        Arc::clone(&refunds),
        Arc::clone(&notifier),
    ));

    // ── Workers ───────────────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_options = WorkerOptions::for_env(config.production);
    let task_worker = Worker::new(Arc::clone(&task_queue), task_processor, worker_options)
        .spawn(shutdown_rx.clone());
    let download_worker = Worker::new(Arc::clone(&download_queue), download_processor, worker_options)
        .spawn(shutdown_rx.clone());

    // ── HTTP surface ──────────────────────────────────────────────────────────
    let webhook_state = Arc::new(WebhookState {
        download_queue: Arc::clone(&download_queue),
        auth: WebhookAuth {
            secret: Some(config.app_secret_key.clone()),
            allowed_hosts: config.webhook_allowed_hosts(),
        },
    });
    let bot_gate = Arc::new(BotGate { secret: config.bot_webhook_secret.clone() });
    let app = filepress_webhook::router(webhook_state).merge(
        Router::new()
            .route(&config.bot_webhook_path, post(telegram_update))
            .with_state(bot_gate),
    );

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "webhook surface listening");

    let mut serve_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = serve_shutdown.changed().await;
            })
            .await;
        if let Err(e) = result {
            warn!(error = %e, "http server exited with error");
        }
    });

    info!("filepress ready");

    // ── Shutdown ──────────────────────────────────────────────────────────────
    wait_for_signal().await;
    info!("shutdown signal received, draining workers");
    let _ = shutdown_tx.send(true);

    let _ = server.await;
    let _ = task_worker.await;
    let _ = download_worker.await;

    info!(
        task_queue = ?task_queue.counts(),
        download_queue = ?download_queue.counts(),
        "filepress stopped"
    );
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, using ctrl-c only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
