use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;
use std::str::FromStr;

use crate::error::FilepressError;

/// Shared-credit amount. Signed so transient fast-store negatives stay
/// representable until the compensating increment runs.
pub type Credits = i64;

/// Unix timestamp (seconds, UTC).
pub type Timestamp = i64;

// ── JobId ────────────────────────────────────────────────────────────────────

/// 20-byte job fingerprint: SHA-1 of `user-key ‖ ":" ‖ tool ‖ ":" ‖ unix-seconds`.
///
/// The single correlation key threading the Task stage, the webhook and the
/// Downloader stage, and every audit row. Serialized as lowercase hex on
/// every wire (queue payloads, `custom_string`, job-log rows).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub [u8; 20]);

impl JobId {
    /// Derive the fingerprint for a submission.
    pub fn derive(user_key: &str, tool: Tool, submitted_at: Timestamp) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(user_key.as_bytes());
        hasher.update(b":");
        hasher.update(tool.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(submitted_at.to_string().as_bytes());
        Self(hasher.finalize().into())
    }

    pub fn from_bytes(b: [u8; 20]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, FilepressError> {
        let bytes = hex::decode(s)
            .map_err(|_| FilepressError::InvalidJobId(s.to_string()))?;
        if bytes.len() != 20 {
            return Err(FilepressError::InvalidJobId(s.to_string()));
        }
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobId({}…)", &self.to_hex()[..8])
    }
}

impl Serialize for JobId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        JobId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// ── Tool ─────────────────────────────────────────────────────────────────────

/// Processing tools dispatched to the external service. Wire names match the
/// service's endpoint identifiers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum Tool {
    #[serde(rename = "upscaleimage")]
    UpscaleImage,
    #[serde(rename = "removebackgroundimage")]
    RemoveBackgroundImage,
    #[serde(rename = "imagepdf")]
    ImagePdf,
    #[serde(rename = "merge")]
    Merge,
    #[serde(rename = "compress")]
    Compress,
}

impl Tool {
    pub const ALL: [Tool; 5] = [
        Tool::UpscaleImage,
        Tool::RemoveBackgroundImage,
        Tool::ImagePdf,
        Tool::Merge,
        Tool::Compress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tool::UpscaleImage          => "upscaleimage",
            Tool::RemoveBackgroundImage => "removebackgroundimage",
            Tool::ImagePdf              => "imagepdf",
            Tool::Merge                 => "merge",
            Tool::Compress              => "compress",
        }
    }

    /// Shared-credit price per submission. Ingress callers may override.
    pub fn price(&self) -> Credits {
        match self {
            Tool::UpscaleImage          => 20,
            Tool::RemoveBackgroundImage => 20,
            Tool::ImagePdf              => 10,
            Tool::Merge                 => 10,
            Tool::Compress              => 10,
        }
    }

    /// Kind of artifact the tool produces.
    pub fn output_kind(&self) -> FileKind {
        match self {
            Tool::UpscaleImage | Tool::RemoveBackgroundImage => FileKind::Image,
            Tool::ImagePdf | Tool::Merge | Tool::Compress    => FileKind::Pdf,
        }
    }

    /// Whether the tool can be offered as a follow-up action on a delivered
    /// artifact. Merge needs several inputs and cannot chain from one file.
    pub fn chains(&self) -> bool {
        !matches!(self, Tool::Merge)
    }

    /// Follow-up tools applicable to an artifact of `kind`, chainable only.
    pub fn follow_ups(kind: FileKind) -> Vec<Tool> {
        Tool::ALL
            .into_iter()
            .filter(|t| t.chains() && t.accepts(kind))
            .collect()
    }

    /// Whether the tool accepts an input of `kind`.
    pub fn accepts(&self, kind: FileKind) -> bool {
        match self {
            Tool::UpscaleImage | Tool::RemoveBackgroundImage | Tool::ImagePdf => {
                matches!(kind, FileKind::Image | FileKind::DocImage)
            }
            Tool::Merge | Tool::Compress => matches!(kind, FileKind::Pdf),
        }
    }
}

impl FromStr for Tool {
    type Err = FilepressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upscaleimage"          => Ok(Tool::UpscaleImage),
            "removebackgroundimage" => Ok(Tool::RemoveBackgroundImage),
            "imagepdf"              => Ok(Tool::ImagePdf),
            "merge"                 => Ok(Tool::Merge),
            "compress"              => Ok(Tool::Compress),
            other                   => Err(FilepressError::UnknownTool(other.to_string())),
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── FileKind ─────────────────────────────────────────────────────────────────

/// Input/output file classification carried on job payloads and log rows.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum FileKind {
    #[serde(rename = "doc/image")]
    DocImage,
    #[serde(rename = "image")]
    Image,
    #[serde(rename = "pdf")]
    Pdf,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::DocImage => "doc/image",
            FileKind::Image    => "image",
            FileKind::Pdf      => "pdf",
        }
    }

    /// File extension used when naming a delivered artifact.
    pub fn extension(&self) -> &'static str {
        match self {
            FileKind::Pdf => "pdf",
            FileKind::Image | FileKind::DocImage => "jpg",
        }
    }
}

// ── PaymentMethod ────────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum PaymentMethod {
    #[serde(rename = "user_credit")]
    UserCredit,
    #[serde(rename = "shared_credit")]
    SharedCredit,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::UserCredit   => "user_credit",
            PaymentMethod::SharedCredit => "shared_credit",
        }
    }
}

// ── UserRef ──────────────────────────────────────────────────────────────────

/// Identity of the submitting user: exactly one of a platform user id or a
/// telegram user id, enforced by construction.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum UserRef {
    User(String),
    Telegram(i64),
}

impl UserRef {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            UserRef::User(id) => Some(id),
            UserRef::Telegram(_) => None,
        }
    }

    pub fn tg_user_id(&self) -> Option<i64> {
        match self {
            UserRef::User(_) => None,
            UserRef::Telegram(id) => Some(*id),
        }
    }

    /// Key used for rate limiting and fingerprint derivation.
    pub fn key(&self) -> String {
        match self {
            UserRef::User(id) => id.clone(),
            UserRef::Telegram(id) => id.to_string(),
        }
    }
}

// ── Stages & events ──────────────────────────────────────────────────────────

/// Pipeline stage of a job.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Stage {
    Task,
    Downloader,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Task       => "task",
            Stage::Downloader => "downloader",
        }
    }

    /// Column prefix of this stage's fields on a job-log row.
    pub fn column_prefix(&self) -> &'static str {
        match self {
            Stage::Task       => "task_worker",
            Stage::Downloader => "downloader_worker",
        }
    }
}

/// Terminal outcome of a stage.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum StageOutcome {
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
}

impl StageOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageOutcome::Completed => "completed",
            StageOutcome::Failed    => "failed",
        }
    }
}

/// A `{stage}.{outcome}` audit event, e.g. `task.completed`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct StageEvent {
    pub stage: Stage,
    pub outcome: StageOutcome,
}

impl StageEvent {
    pub fn new(stage: Stage, outcome: StageOutcome) -> Self {
        Self { stage, outcome }
    }

    pub fn parse(s: &str) -> Result<Self, FilepressError> {
        let (stage, outcome) = s
            .split_once('.')
            .ok_or_else(|| FilepressError::InvalidEvent(s.to_string()))?;
        let stage = match stage {
            "task"       => Stage::Task,
            "downloader" => Stage::Downloader,
            _            => return Err(FilepressError::InvalidEvent(s.to_string())),
        };
        let outcome = match outcome {
            "completed" => StageOutcome::Completed,
            "failed"    => StageOutcome::Failed,
            _           => return Err(FilepressError::InvalidEvent(s.to_string())),
        };
        Ok(Self { stage, outcome })
    }
}

impl fmt::Display for StageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.stage.as_str(), self.outcome.as_str())
    }
}

// ── JobStats ─────────────────────────────────────────────────────────────────

/// Per-stage execution statistics recorded on every audit row.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct JobStats {
    /// When the job was enqueued (unix ms).
    pub created_at: i64,
    /// When a worker picked the job up (unix ms).
    pub processed_at: i64,
    /// When the stage reached a terminal outcome (unix ms).
    pub finished_at: i64,
    /// Attempts started.
    pub ats: u32,
    /// Attempts made (completed, either way).
    pub atm: u32,
    /// Scheduling delay the job was enqueued with (ms).
    pub delay: u64,
    /// Queue priority the job ran at.
    pub priority: u8,
}

impl JobStats {
    /// Queue wait time in milliseconds, zero when the clock went backwards.
    pub fn wait_ms(&self) -> i64 {
        (self.processed_at - self.created_at).max(0)
    }
}

// ── File-size guard ──────────────────────────────────────────────────────────

/// Admission guard for inbound files. `max == 0` means no maximum.
pub fn check_file_size(size: u64, max: u64) -> bool {
    max == 0 || size <= max
}

// ── Tests ────────────────────────────────────────────────────────────────────
