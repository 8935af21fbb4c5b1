use thiserror::Error;

#[derive(Debug, Error)]
pub enum FilepressError {
    // ── Validation ───────────────────────────────────────────────────────────
    #[error("amount must be a non-negative integer, got {0}")]
    InvalidAmount(i64),

    #[error("invalid job id: {0}")]
    InvalidJobId(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid stage event: {0}")]
    InvalidEvent(String),

    #[error("missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("exactly one of user_id and tg_user_id must be set")]
    AmbiguousUserRef,

    #[error("update filter needs at least two predicates, got {0}")]
    FilterTooBroad(usize),

    #[error("update filter may not constrain field: {0}")]
    FilterFieldForbidden(String),

    // ── Authentication ───────────────────────────────────────────────────────
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    // ── Stores ───────────────────────────────────────────────────────────────
    #[error("fast store error: {0}")]
    FastStore(String),

    #[error("durable store error: {0}")]
    DurableStore(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    // ── External services ────────────────────────────────────────────────────
    #[error("processing service auth failed: {0}")]
    ExternalAuth(String),

    #[error("processing service {operation} failed: {message}")]
    ExternalService { operation: String, message: String },

    #[error("notification failed: {0}")]
    Notify(String),

    // ── Queue / workers ──────────────────────────────────────────────────────
    #[error("queue {0} is closed")]
    QueueClosed(String),

    #[error("job lease lost: {0}")]
    LeaseLost(String),

    // ── General ──────────────────────────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

impl FilepressError {
    /// Short machine-readable name used in the response envelope.
    pub fn name(&self) -> &'static str {
        match self {
            FilepressError::InvalidAmount(_)
            | FilepressError::InvalidJobId(_)
            | FilepressError::UnknownTool(_)
            | FilepressError::InvalidEvent(_)
            | FilepressError::MissingParameter(_)
            | FilepressError::AmbiguousUserRef
            | FilepressError::FilterTooBroad(_)
            | FilepressError::FilterFieldForbidden(_) => "ValidationError",
            FilepressError::Unauthorized(_) => "AuthError",
            FilepressError::FastStore(_) => "FastStoreError",
            FilepressError::DurableStore(_) => "DurableStoreError",
            FilepressError::Serialization(_) => "SerializationError",
            FilepressError::ExternalAuth(_) | FilepressError::ExternalService { .. } => {
                "ExternalServiceError"
            }
            FilepressError::Notify(_) => "NotifyError",
            FilepressError::QueueClosed(_) | FilepressError::LeaseLost(_) => "QueueError",
            FilepressError::Other(_) => "InternalError",
        }
    }
}
