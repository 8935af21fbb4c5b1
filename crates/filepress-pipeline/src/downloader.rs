use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use filepress_core::types::{
    Credits, FileKind, PaymentMethod, Stage, StageEvent, StageOutcome, Tool,
};
use filepress_core::FilepressError;
use filepress_ilove::IloveApi;
use filepress_joblog::JobLogStore;
use filepress_queue::{Job, Processor};
use filepress_store::{filters, DurableStore, FastStore};

use crate::notifier::Notifier;
use crate::payload::{DownloadPayload, WebhookEvent};
use crate::refund::RefundSupervisor;

/// Job context assembled from the webhook payload plus the Task stage's
/// audit row. The webhook is authoritative where it speaks; the row fills
/// the gaps.
struct JobContext {
    tg_user_id: Option<i64>,
    tool: Option<Tool>,
    tool_price: Option<Credits>,
    payment_method: PaymentMethod,
    server: Option<String>,
    task_id: Option<String>,
    filename: Option<String>,
}

impl JobContext {
    fn assemble(payload: &DownloadPayload, row: Option<&Value>) -> Self {
        let row_tool = row
            .and_then(|r| r["tool"].as_str())
            .and_then(|s| s.parse::<Tool>().ok());
        let result = row.map(|r| &r["task_worker_result"]);
        Self {
            tg_user_id: payload
                .tg_user_id
                .or_else(|| row.and_then(|r| r["tg_user_id"].as_i64())),
            tool: payload.tool.or(row_tool),
            tool_price: row.and_then(|r| r["tool_price"].as_i64()),
            payment_method: row
                .and_then(|r| r["payment_method"].as_str())
                .filter(|m| *m == "user_credit")
                .map(|_| PaymentMethod::UserCredit)
                .unwrap_or(PaymentMethod::SharedCredit),
            server: payload
                .server
                .clone()
                .or_else(|| result.and_then(|r| r["server"].as_str().map(str::to_string))),
            task_id: payload
                .task_id
                .clone()
                .or_else(|| result.and_then(|r| r["task_id"].as_str().map(str::to_string))),
            filename: result.and_then(|r| {
                r["files"][0]["filename"].as_str().map(str::to_string)
            }),
        }
    }
}

/// Downloader-stage processor: fetch the artifact, deliver it to the chat
/// user and close the audit row. `task.failed` callbacks surface here too so
/// both failure edges share one refund path.
pub struct DownloadProcessor<A, F, D, N>
where
    A: IloveApi,
    F: FastStore,
    D: DurableStore,
    N: Notifier,
{
    api: Arc<A>,
    log: Arc<JobLogStore<D>>,
    refunds: Arc<RefundSupervisor<F, D, N>>,
    notifier: Arc<N>,
}

impl<A, F, D, N> DownloadProcessor<A, F, D, N>
where
    A: IloveApi,
    F: FastStore,
    D: DurableStore,
    N: Notifier,
{
    pub fn new(
        api: Arc<A>,
        log: Arc<JobLogStore<D>>,
        refunds: Arc<RefundSupervisor<F, D, N>>,
        notifier: Arc<N>,
    ) -> Self {
        Self { api, log, refunds, notifier }
    }

    async fn load_context(&self, job: &Job<DownloadPayload>) -> JobContext {
        let row = match self
            .log
            .find_job_logs(&filters([("job_id", job.id.to_hex().as_str())]))
            .await
        {
            Ok(rows) => rows.into_iter().next(),
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "task audit row lookup failed");
                None
            }
        };
        JobContext::assemble(&job.payload, row.as_ref())
    }

    /// The happy path: download, classify, deliver.
    async fn deliver(
        &self,
        job: &Job<DownloadPayload>,
        ctx: &JobContext,
    ) -> Result<Value, FilepressError> {
        let server = ctx
            .server
            .as_deref()
            .ok_or(FilepressError::MissingParameter("server"))?;
        let task_id = ctx
            .task_id
            .as_deref()
            .ok_or(FilepressError::MissingParameter("task_id"))?;
        let tg_user_id = ctx
            .tg_user_id
            .ok_or(FilepressError::MissingParameter("tg_user_id"))?;

        let bytes = self.api.download(server, task_id).await?;

        // doc/image is the generic kind when the tool is unknown.
        let kind = ctx.tool.map(|t| t.output_kind()).unwrap_or(FileKind::DocImage);
        let filename = ctx
            .filename
            .clone()
            .unwrap_or_else(|| format!("{}.{}", &job.id.to_hex()[..12], kind.extension()));
        let follow_ups = Tool::follow_ups(kind);
        let size = bytes.len();

        self.notifier
            .send_document(tg_user_id, &filename, bytes, &job.id.to_hex(), &follow_ups)
            .await?;

        Ok(json!({
            "filename": filename,
            "size": size,
            "kind": kind.as_str(),
        }))
    }

    async fn patch_log(
        &self,
        job: &Job<DownloadPayload>,
        ctx: &JobContext,
        outcome: StageOutcome,
        result: Option<Value>,
        error: Option<Value>,
    ) {
        let Some(tg_user_id) = ctx.tg_user_id else {
            warn!(job_id = %job.id, "downloader patch skipped: no user identity");
            return;
        };
        let job_hex = job.id.to_hex();
        let tg = tg_user_id.to_string();
        let patched = self
            .log
            .update_worker_job_log(
                StageEvent::new(Stage::Downloader, outcome),
                &filters([("job_id", job_hex.as_str()), ("tg_user_id", tg.as_str())]),
                true,
                result,
                error,
                Some(job.stats_now()),
            )
            .await;
        match patched {
            Ok(0) => warn!(job_id = %job.id, "downloader patch matched no rows"),
            Ok(_) => {}
            Err(e) => warn!(job_id = %job.id, error = %e, "downloader patch failed"),
        }
    }

    async fn fail(
        &self,
        job: &Job<DownloadPayload>,
        ctx: &JobContext,
        error: &FilepressError,
    ) {
        let error_json = json!({ "name": error.name(), "message": error.to_string() });
        self.patch_log(job, ctx, StageOutcome::Failed, None, Some(error_json)).await;

        let price = ctx
            .tool_price
            .or_else(|| ctx.tool.map(|t| t.price()))
            .unwrap_or(0);
        self.refunds
            .handle_failure(
                Stage::Downloader,
                job.id,
                ctx.tg_user_id,
                price,
                ctx.payment_method,
                &error.to_string(),
            )
            .await;
    }
}

#[async_trait]
impl<A, F, D, N> Processor<DownloadPayload> for DownloadProcessor<A, F, D, N>
where
    A: IloveApi,
    F: FastStore,
    D: DurableStore,
    N: Notifier,
{
    async fn process(&self, job: &Job<DownloadPayload>) -> Result<Value, FilepressError> {
        let ctx = self.load_context(job).await;

        if job.payload.event == WebhookEvent::TaskFailed {
            let detail = job
                .payload
                .status_message
                .clone()
                .unwrap_or_else(|| "processing service reported failure".to_string());
            let err = FilepressError::ExternalService {
                operation: "process".to_string(),
                message: detail,
            };
            self.fail(job, &ctx, &err).await;
            // The failure callback itself was handled successfully.
            return Ok(json!({ "handled": "task.failed" }));
        }

        match self.deliver(job, &ctx).await {
            Ok(result) => {
                self.patch_log(job, &ctx, StageOutcome::Completed, Some(result.clone()), None)
                    .await;
                info!(job_id = %job.id, "artifact delivered");
                Ok(result)
            }
            Err(e) => {
                self.fail(job, &ctx, &e).await;
                Err(e)
            }
        }
    }
}
