use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use filepress_core::types::{Stage, StageEvent, StageOutcome};
use filepress_core::FilepressError;
use filepress_ilove::{IloveApi, TaskRequest};
use filepress_joblog::{JobLogEntry, JobLogStore};
use filepress_queue::{Job, Processor};
use filepress_store::{DurableStore, FastStore};

use crate::notifier::Notifier;
use crate::payload::TaskPayload;
use crate::refund::RefundSupervisor;

/// Task-stage processor: submit the job to the processing service and record
/// the outcome. The stage is terminal either way — the queue never retries;
/// a user retries with a fresh submission.
pub struct TaskProcessor<A, F, D, N>
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

impl<A, F, D, N> TaskProcessor<A, F, D, N>
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

    fn log_entry(
        job: &Job<TaskPayload>,
        outcome: StageOutcome,
        immutable: bool,
        result: Option<Value>,
        error: Option<Value>,
    ) -> JobLogEntry {
        let p = &job.payload;
        JobLogEntry {
            event: StageEvent::new(Stage::Task, outcome),
            job_id: job.id,
            user: p.user.clone(),
            immutable,
            tool: p.tool,
            tool_price: p.tool_price,
            tool_options: p.tool_options.clone(),
            payment_method: p.payment_method,
            files: json!(p.file_links),
            worker_result: result,
            worker_error: error,
            worker_stats: job.stats_now(),
        }
    }
}

#[async_trait]
impl<A, F, D, N> Processor<TaskPayload> for TaskProcessor<A, F, D, N>
where
    A: IloveApi,
    F: FastStore,
    D: DurableStore,
    N: Notifier,
{
    async fn process(&self, job: &Job<TaskPayload>) -> Result<Value, FilepressError> {
        let p = &job.payload;
        let request = TaskRequest {
            tool: p.tool,
            file_links: p.file_links.clone(),
            tool_options: p.tool_options.clone(),
            // The webhook correlates on these two tokens.
            custom_string: job.id.to_hex(),
            custom_int: p.user.tg_user_id(),
        };

        match self.api.submit_task(&request).await {
            Ok(result) => {
                let result_json = serde_json::to_value(&result)
                    .map_err(|e| FilepressError::Serialization(e.to_string()))?;
                let entry =
                    Self::log_entry(job, StageOutcome::Completed, false, Some(result_json.clone()), None);
                if let Err(e) = self.log.add_job_log(entry).await {
                    warn!(job_id = %job.id, error = %e, "task log append failed");
                    if let Some(tg_user_id) = p.user.tg_user_id() {
                        let text = format!(
                            "Your file is being processed, but the tracking slip for job {} \
                             could not be updated.",
                            job.id
                        );
                        if let Err(e) = self.notifier.send_text(tg_user_id, &text).await {
                            warn!(job_id = %job.id, error = %e, "courtesy message undelivered");
                        }
                    }
                }
                info!(job_id = %job.id, tool = p.tool.as_str(), server = %result.server,
                      task_id = %result.task_id, "task submitted to processing service");
                Ok(result_json)
            }
            Err(e) => {
                let error_json = json!({ "name": e.name(), "message": e.to_string() });
                let entry =
                    Self::log_entry(job, StageOutcome::Failed, true, None, Some(error_json));
                if let Err(log_err) = self.log.add_job_log(entry).await {
                    error!(job_id = %job.id, error = %log_err, "task failure log append failed");
                }
                self.refunds
                    .handle_failure(
                        Stage::Task,
                        job.id,
                        p.user.tg_user_id(),
                        p.tool_price,
                        p.payment_method,
                        &e.to_string(),
                    )
                    .await;
                Err(e)
            }
        }
    }
}
