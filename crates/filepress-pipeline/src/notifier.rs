use async_trait::async_trait;

use filepress_core::types::Tool;
use filepress_core::FilepressError;

/// Outbound messages to the chat user. The chat-bot layer implements this;
/// the pipeline never imports chat internals.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn send_text(&self, tg_user_id: i64, text: &str) -> Result<(), FilepressError>;

    /// Deliver an artifact with a caption and follow-up tool actions.
    async fn send_document(
        &self,
        tg_user_id: i64,
        filename: &str,
        bytes: Vec<u8>,
        caption: &str,
        follow_ups: &[Tool],
    ) -> Result<(), FilepressError>;
}
