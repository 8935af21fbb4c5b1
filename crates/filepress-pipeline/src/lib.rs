//! The two-stage job pipeline.
//!
//! Ingress admits a submission (fingerprint → rate limit → credit consume →
//! enqueue), the Task worker submits it to the processing service, the
//! webhook enqueues the continuation, and the Downloader worker delivers the
//! artifact. Every terminal failure edge runs the refund supervisor so no
//! consumed credit is silently lost.

pub mod downloader;
pub mod ingress;
pub mod notifier;
pub mod payload;
pub mod refund;
pub mod task_worker;

pub use downloader::DownloadProcessor;
pub use ingress::{Ingress, IngressOutcome, SubmitRequest};
pub use notifier::Notifier;
pub use payload::{DownloadPayload, TaskPayload, WebhookEvent};
pub use refund::RefundSupervisor;
pub use task_worker::TaskProcessor;
