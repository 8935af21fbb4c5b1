//! End-to-end pipeline scenarios against the in-memory store doubles and
//! stubbed external interfaces: happy path, quota exhaustion, rate limiting
//! and both failure-refund edges.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use filepress_core::constants::TABLE_JOB_LOGS;
use filepress_core::types::{FileKind, JobId, PaymentMethod, Tool, UserRef};
use filepress_core::FilepressError;
use filepress_ilove::{IloveApi, TaskRequest, TaskResult, UploadedFile};
use filepress_joblog::JobLogStore;
use filepress_ledger::SharedCredits;
use filepress_limiter::RateLimiter;
use filepress_pipeline::{
    DownloadPayload, DownloadProcessor, Ingress, IngressOutcome, Notifier, RefundSupervisor,
    SubmitRequest, TaskPayload, TaskProcessor, WebhookEvent,
};
use filepress_queue::{EnqueueOptions, JobQueue, Processor};
use filepress_store::memory::{MemoryDurableStore, MemoryFastStore};

const LOCK: Duration = Duration::from_secs(40);

// ── Stub external interfaces ─────────────────────────────────────────────────

#[derive(Default)]
struct StubIlove {
    fail_submit: bool,
    fail_download: bool,
    submissions: Mutex<Vec<(String, Option<i64>)>>,
}

#[async_trait]
impl IloveApi for StubIlove {
    async fn submit_task(&self, request: &TaskRequest) -> Result<TaskResult, FilepressError> {
        if self.fail_submit {
            return Err(FilepressError::ExternalService {
                operation: "process".into(),
                message: "service rejected the task".into(),
            });
        }
        self.submissions
            .lock()
            .await
            .push((request.custom_string.clone(), request.custom_int));
        Ok(TaskResult {
            server: "api8g.example.com".into(),
            task_id: "T1".into(),
            files: vec![UploadedFile {
                server_filename: "srv-0001.jpg".into(),
                filename: "lorem.jpg".into(),
            }],
        })
    }

    async fn download(&self, _server: &str, _task_id: &str) -> Result<Vec<u8>, FilepressError> {
        if self.fail_download {
            return Err(FilepressError::ExternalService {
                operation: "download".into(),
                message: "artifact unavailable".into(),
            });
        }
        Ok(vec![0xFF, 0xD8, 0xFF])
    }
}

#[derive(Default)]
struct StubNotifier {
    texts: Mutex<Vec<(i64, String)>>,
    documents: Mutex<Vec<(i64, String, Vec<Tool>)>>,
}

#[async_trait]
impl Notifier for StubNotifier {
    async fn send_text(&self, tg_user_id: i64, text: &str) -> Result<(), FilepressError> {
        self.texts.lock().await.push((tg_user_id, text.to_string()));
        Ok(())
    }

    async fn send_document(
        &self,
        tg_user_id: i64,
        filename: &str,
        _bytes: Vec<u8>,
        _caption: &str,
        follow_ups: &[Tool],
    ) -> Result<(), FilepressError> {
        self.documents
            .lock()
            .await
            .push((tg_user_id, filename.to_string(), follow_ups.to_vec()));
        Ok(())
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

struct Harness {
    durable: Arc<MemoryDurableStore>,
    credits: Arc<SharedCredits<MemoryFastStore, MemoryDurableStore>>,
    limiter: Arc<RateLimiter>,
    ilove: Arc<StubIlove>,
    notifier: Arc<StubNotifier>,
    task_queue: Arc<JobQueue<TaskPayload>>,
    download_queue: Arc<JobQueue<DownloadPayload>>,
    ingress: Ingress<MemoryFastStore, MemoryDurableStore>,
    task_processor:
        TaskProcessor<StubIlove, MemoryFastStore, MemoryDurableStore, StubNotifier>,
    download_processor:
        DownloadProcessor<StubIlove, MemoryFastStore, MemoryDurableStore, StubNotifier>,
}

fn harness(ilove: StubIlove) -> Harness {
    let fast = Arc::new(MemoryFastStore::new());
    let durable = Arc::new(MemoryDurableStore::new());
    let credits = Arc::new(SharedCredits::new(
        Arc::clone(&fast),
        Arc::clone(&durable),
        "pipeline",
    ));
    let limiter = Arc::new(RateLimiter::default());
    let ilove = Arc::new(ilove);
    let notifier = Arc::new(StubNotifier::default());
    let log = Arc::new(JobLogStore::new(Arc::clone(&durable)));
    let refunds = Arc::new(RefundSupervisor::new(Arc::clone(&credits), Arc::clone(&notifier)));
    let task_queue = Arc::new(JobQueue::new("taskQueue"));
    let download_queue = Arc::new(JobQueue::new("downloaderQueue"));

    Harness {
        ingress: Ingress::new(
            Arc::clone(&limiter),
            Arc::clone(&credits),
            Arc::clone(&task_queue),
        ),
        task_processor: TaskProcessor::new(
            Arc::clone(&ilove),
            Arc::clone(&log),
            Arc::clone(&refunds),
            Arc::clone(&notifier),
        ),
        download_processor: DownloadProcessor::new(
            Arc::clone(&ilove),
            Arc::clone(&log),
            Arc::clone(&refunds),
            Arc::clone(&notifier),
        ),
        durable,
        credits,
        limiter,
        ilove,
        notifier,
        task_queue,
        download_queue,
    }
}

fn submit_request() -> SubmitRequest {
    SubmitRequest {
        user: UserRef::Telegram(185150),
        tool: Tool::UpscaleImage,
        tool_options: json!({}),
        file_links: vec!["https://cdn.example/lorem.jpg".into()],
        file_kind: FileKind::Image,
        tool_price: None,
        payment_method: PaymentMethod::SharedCredit,
    }
}

fn webhook_payload(job_id: JobId, event: WebhookEvent) -> DownloadPayload {
    DownloadPayload {
        job_id,
        event,
        tool: Some(Tool::UpscaleImage),
        server: Some("api8g.example.com".into()),
        task_id: Some("T1".into()),
        tg_user_id: Some(185150),
        status: None,
        status_message: match event {
            WebhookEvent::TaskFailed => Some("upstream worker crashed".into()),
            WebhookEvent::TaskCompleted => None,
        },
    }
}

async fn run_task_stage(h: &Harness) -> JobId {
    let job = h.task_queue.take_next(LOCK).expect("task job queued");
    let outcome = h.task_processor.process(&job).await;
    h.task_queue.finish(&job.id, outcome.is_ok());
    job.id
}

async fn run_download_stage(h: &Harness) -> Result<Value, FilepressError> {
    let job = h.download_queue.take_next(LOCK).expect("download job queued");
    let outcome = h.download_processor.process(&job).await;
    h.download_queue.finish(&job.id, outcome.is_ok());
    outcome
}

async fn job_log_row(h: &Harness) -> Value {
    let rows = h.durable.rows(TABLE_JOB_LOGS).await;
    assert_eq!(rows.len(), 1, "exactly one audit row per fingerprint");
    rows[0].clone()
}

// ── S1: happy path ───────────────────────────────────────────────────────────

#[tokio::test]
async fn happy_path_two_stages() {
    let h = harness(StubIlove::default());
    h.credits.init_daily_credits(None).await.unwrap();

    let outcome = h.ingress.submit(submit_request()).await.unwrap();
    let IngressOutcome::Enqueued { job_id } = outcome else {
        panic!("expected enqueue, got {outcome:?}")
    };
    assert_eq!(h.credits.get_credits_left(false).await.unwrap(), Some(50));

    let processed = run_task_stage(&h).await;
    assert_eq!(processed, job_id);

    // The correlation tokens reached the processing service.
    let submissions = h.ilove.submissions.lock().await;
    assert_eq!(submissions.as_slice(), &[(job_id.to_hex(), Some(185150))]);
    drop(submissions);

    let row = job_log_row(&h).await;
    assert_eq!(row["task_worker_state"], "completed");
    assert_eq!(row["immutable"], false);

    // Webhook continuation, idempotent on the same fingerprint.
    assert!(h.download_queue.add(
        "task.completed",
        job_id,
        webhook_payload(job_id, WebhookEvent::TaskCompleted),
        EnqueueOptions::default(),
    ));
    assert!(!h.download_queue.add(
        "task.completed",
        job_id,
        webhook_payload(job_id, WebhookEvent::TaskCompleted),
        EnqueueOptions::default(),
    ));

    run_download_stage(&h).await.unwrap();

    let documents = h.notifier.documents.lock().await;
    assert_eq!(documents.len(), 1);
    let (tg, filename, follow_ups) = &documents[0];
    assert_eq!(*tg, 185150);
    assert_eq!(filename, "lorem.jpg", "delivery keeps the original filename");
    assert!(!follow_ups.contains(&Tool::Merge));
    drop(documents);

    let row = job_log_row(&h).await;
    assert_eq!(row["downloader_worker_state"], "completed");
    assert_eq!(row["immutable"], true);
    assert_eq!(h.credits.get_credits_left(false).await.unwrap(), Some(50));
}

// ── S2: out of quota ─────────────────────────────────────────────────────────

#[tokio::test]
async fn out_of_quota_rejects_cleanly() {
    let h = harness(StubIlove::default());
    h.credits.init_daily_credits(Some(10)).await.unwrap();

    let outcome = h.ingress.submit(submit_request()).await.unwrap();
    assert_eq!(outcome, IngressOutcome::OutOfQuota);
    assert_eq!(h.credits.get_credits_left(false).await.unwrap(), Some(10));
    assert_eq!(h.task_queue.counts().pending, 0);
}

// ── S3: rate limited ─────────────────────────────────────────────────────────

#[tokio::test]
async fn rate_limited_before_credits_touched() {
    let h = harness(StubIlove::default());
    h.credits.init_daily_credits(None).await.unwrap();

    for _ in 0..3 {
        assert!(h.limiter.attempt("185150", None));
    }
    let outcome = h.ingress.submit(submit_request()).await.unwrap();
    assert_eq!(outcome, IngressOutcome::RateLimited);
    assert_eq!(
        h.credits.get_credits_left(false).await.unwrap(),
        Some(70),
        "a rate-limited submission must not consume credits"
    );
    assert_eq!(h.task_queue.counts().pending, 0);
}

// ── S4: task failure → refund ────────────────────────────────────────────────

#[tokio::test]
async fn task_failure_refunds_and_notifies() {
    let h = harness(StubIlove { fail_submit: true, ..Default::default() });
    h.credits.init_daily_credits(None).await.unwrap();

    let IngressOutcome::Enqueued { job_id } = h.ingress.submit(submit_request()).await.unwrap()
    else {
        panic!("expected enqueue")
    };
    assert_eq!(h.credits.get_credits_left(false).await.unwrap(), Some(50));

    run_task_stage(&h).await;

    let row = job_log_row(&h).await;
    assert_eq!(row["task_worker_state"], "failed");
    assert_eq!(row["immutable"], true);

    assert_eq!(h.credits.get_credits_left(false).await.unwrap(), Some(70));

    let texts = h.notifier.texts.lock().await;
    assert_eq!(texts.len(), 1);
    assert_eq!(texts[0].0, 185150);
    assert!(texts[0].1.contains(&job_id.to_hex()), "notification names the job");
}

// ── S5: webhook reports failure ──────────────────────────────────────────────

#[tokio::test]
async fn webhook_failure_short_circuits_to_refund() {
    let h = harness(StubIlove::default());
    h.credits.init_daily_credits(None).await.unwrap();

    let IngressOutcome::Enqueued { job_id } = h.ingress.submit(submit_request()).await.unwrap()
    else {
        panic!("expected enqueue")
    };
    run_task_stage(&h).await;
    assert_eq!(h.credits.get_credits_left(false).await.unwrap(), Some(50));

    h.download_queue.add(
        "task.failed",
        job_id,
        webhook_payload(job_id, WebhookEvent::TaskFailed),
        EnqueueOptions::default(),
    );
    // The failure callback is handled, not failed.
    run_download_stage(&h).await.unwrap();

    let row = job_log_row(&h).await;
    assert_eq!(row["downloader_worker_state"], "failed");
    assert_eq!(row["immutable"], true);
    assert_eq!(h.credits.get_credits_left(false).await.unwrap(), Some(70));

    let documents = h.notifier.documents.lock().await;
    assert!(documents.is_empty(), "no artifact delivery on failure");
}

// ── Download failure → refund ────────────────────────────────────────────────

#[tokio::test]
async fn download_failure_refunds() {
    let h = harness(StubIlove { fail_download: true, ..Default::default() });
    h.credits.init_daily_credits(None).await.unwrap();

    let IngressOutcome::Enqueued { job_id } = h.ingress.submit(submit_request()).await.unwrap()
    else {
        panic!("expected enqueue")
    };
    run_task_stage(&h).await;

    h.download_queue.add(
        "task.completed",
        job_id,
        webhook_payload(job_id, WebhookEvent::TaskCompleted),
        EnqueueOptions::default(),
    );
    assert!(run_download_stage(&h).await.is_err());

    let row = job_log_row(&h).await;
    assert_eq!(row["downloader_worker_state"], "failed");
    assert_eq!(row["immutable"], true);
    assert_eq!(h.credits.get_credits_left(false).await.unwrap(), Some(70));
}

// ── Courtesy message when the tracking slip write fails ──────────────────────

#[tokio::test]
async fn log_append_failure_sends_courtesy_message() {
    let h = harness(StubIlove::default());
    h.credits.init_daily_credits(None).await.unwrap();

    h.ingress.submit(submit_request()).await.unwrap();
    h.durable.fail_writes(true);
    run_task_stage(&h).await;
    h.durable.fail_writes(false);

    let texts = h.notifier.texts.lock().await;
    assert_eq!(texts.len(), 1);
    assert!(texts[0].1.contains("tracking slip"));
}

// ── Fast store stays the arbiter end to end ──────────────────────────────────

#[tokio::test]
async fn concurrent_submissions_respect_the_pool() {
    let h = Arc::new(harness(StubIlove::default()));
    h.credits.init_daily_credits(None).await.unwrap();

    // Distinct users so the rate limiter stays out of the way.
    let mut handles = Vec::new();
    for i in 0..6 {
        let h = Arc::clone(&h);
        handles.push(tokio::spawn(async move {
            let request = SubmitRequest {
                user: UserRef::Telegram(1000 + i),
                ..submit_request()
            };
            h.ingress.submit(request).await.unwrap()
        }));
    }

    let mut enqueued = 0;
    for handle in handles {
        if matches!(handle.await.unwrap(), IngressOutcome::Enqueued { .. }) {
            enqueued += 1;
        }
    }
    assert_eq!(enqueued, 3, "70 credits admit exactly three 20-credit jobs");
    assert_eq!(h.credits.get_credits_left(false).await.unwrap(), Some(10));
    assert_eq!(h.task_queue.counts().pending, 3);
}
