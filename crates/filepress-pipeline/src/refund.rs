use std::sync::Arc;

use tracing::{error, info, warn};

use filepress_core::types::{Credits, JobId, PaymentMethod, Stage};
use filepress_ledger::SharedCredits;
use filepress_store::{DurableStore, FastStore};

use crate::notifier::Notifier;

/// Compensation on any terminal failure edge: return the job's credits to
/// the shared pool and tell the user what happened.
///
/// Credits must never be silently lost — a refund failure is logged at
/// error level so reconciliation picks it up. Notification failures are
/// logged and swallowed.
pub struct RefundSupervisor<F: FastStore, D: DurableStore, N: Notifier> {
    credits: Arc<SharedCredits<F, D>>,
    notifier: Arc<N>,
}

impl<F: FastStore, D: DurableStore, N: Notifier> RefundSupervisor<F, D, N> {
    pub fn new(credits: Arc<SharedCredits<F, D>>, notifier: Arc<N>) -> Self {
        Self { credits, notifier }
    }

    pub async fn handle_failure(
        &self,
        stage: Stage,
        job_id: JobId,
        tg_user_id: Option<i64>,
        tool_price: Credits,
        payment_method: PaymentMethod,
        detail: &str,
    ) {
        let reason = format!("{}.failed", stage.as_str());

        if payment_method == PaymentMethod::SharedCredit {
            match self.credits.refund_credits(tool_price, Some(&reason)).await {
                Ok(()) => info!(job_id = %job_id, amount = tool_price, reason, "credits refunded"),
                Err(e) => {
                    error!(job_id = %job_id, amount = tool_price, error = %e, "refund failed")
                }
            }
        }

        if let Some(tg_user_id) = tg_user_id {
            let text = format!(
                "Your {} job {} failed and the credits were returned. \
                 Please try again with a fresh submission.\n{}",
                stage.as_str(),
                job_id,
                detail,
            );
            if let Err(e) = self.notifier.send_text(tg_user_id, &text).await {
                warn!(job_id = %job_id, tg_user_id, error = %e, "failure notification undelivered");
            }
        }
    }
}
