//! Client for the iLoveAPI processing service.
//!
//! The pipeline depends on the [`IloveApi`] trait only; production wires
//! [`IloveClient`], tests substitute a stub.

pub mod client;
pub mod types;

use async_trait::async_trait;

use filepress_core::FilepressError;

pub use client::{filename_from_link, IloveClient};
pub use types::{TaskHandle, TaskRequest, TaskResult, UploadedFile};

/// The two operations the pipeline needs from the processing service.
#[async_trait]
pub trait IloveApi: Send + Sync + 'static {
    /// Submit one job: start a task slot, upload every source link, then
    /// request processing. The result locates the external work unit.
    async fn submit_task(&self, request: &TaskRequest) -> Result<TaskResult, FilepressError>;

    /// Fetch the processed artifact for `(server, task_id)`.
    async fn download(&self, server: &str, task_id: &str) -> Result<Vec<u8>, FilepressError>;
}
