use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info};

use filepress_core::types::{Credits, FileKind, JobId, PaymentMethod, Tool, UserRef};
use filepress_core::FilepressError;
use filepress_ledger::SharedCredits;
use filepress_limiter::RateLimiter;
use filepress_queue::{EnqueueOptions, JobQueue};
use filepress_store::{DurableStore, FastStore};

use crate::payload::TaskPayload;

/// An admitted user request, validated upstream by the chat-bot layer.
#[derive(Clone, Debug)]
pub struct SubmitRequest {
    pub user: UserRef,
    pub tool: Tool,
    pub tool_options: Value,
    pub file_links: Vec<String>,
    pub file_kind: FileKind,
    /// Overrides the tool's default price when set.
    pub tool_price: Option<Credits>,
    pub payment_method: PaymentMethod,
}

/// Admission result. Rejections are clean domain outcomes, not errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngressOutcome {
    Enqueued { job_id: JobId },
    RateLimited,
    OutOfQuota,
}

/// Front door of the pipeline: fingerprint, rate-limit, charge, enqueue.
pub struct Ingress<F: FastStore, D: DurableStore> {
    limiter: Arc<RateLimiter>,
    credits: Arc<SharedCredits<F, D>>,
    task_queue: Arc<JobQueue<TaskPayload>>,
}

impl<F: FastStore, D: DurableStore> Ingress<F, D> {
    pub fn new(
        limiter: Arc<RateLimiter>,
        credits: Arc<SharedCredits<F, D>>,
        task_queue: Arc<JobQueue<TaskPayload>>,
    ) -> Self {
        Self { limiter, credits, task_queue }
    }

    /// Admit or reject a submission, in order: fingerprint, per-user attempt,
    /// credit consume, enqueue. A rate-limit rejection happens before any
    /// credit is touched; an out-of-quota rejection needs no compensation.
    pub async fn submit(&self, request: SubmitRequest)
        -> Result<IngressOutcome, FilepressError>
    {
        let submitted_at = Utc::now().timestamp();
        let user_key = request.user.key();
        let job_id = JobId::derive(&user_key, request.tool, submitted_at);
        let job_hex = job_id.to_hex();

        if !self.limiter.attempt(&user_key, Some(&job_hex)) {
            debug!(user = %user_key, job_id = %job_id, "submission rate limited");
            return Ok(IngressOutcome::RateLimited);
        }

        let price = request.tool_price.unwrap_or_else(|| request.tool.price());
        if request.payment_method == PaymentMethod::SharedCredit {
            let taken = self
                .credits
                .consume_credits(price, Some(request.tool.as_str()), Some(&job_hex), None)
                .await?;
            if !taken {
                debug!(user = %user_key, job_id = %job_id, price, "shared pool exhausted");
                return Ok(IngressOutcome::OutOfQuota);
            }
        }

        let payload = TaskPayload {
            job_id,
            user: request.user,
            tool: request.tool,
            tool_options: request.tool_options,
            file_links: request.file_links,
            file_kind: request.file_kind,
            tool_price: price,
            payment_method: request.payment_method,
            submitted_at,
        };
        self.task_queue
            .add("task.submit", job_id, payload, EnqueueOptions::default());

        info!(job_id = %job_id, tool = request.tool.as_str(), price, "task job enqueued");
        Ok(IngressOutcome::Enqueued { job_id })
    }
}
