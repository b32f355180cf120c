//! ResultSink port - hand-off of finished tasks to the system of record.
//!
//! The queue keeps results only in memory. Whatever stores them for real
//! (patient/image tables, files, ...) implements this trait.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::VolumetricResult;
use crate::queue::TaskRecord;

#[derive(Debug, Error)]
#[error("result sink failed: {0}")]
pub struct SinkError(pub String);

/// Called by the worker after it commits a terminal state.
///
/// Errors are logged and never change the task's state.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn on_completed(
        &self,
        record: &TaskRecord,
        result: &VolumetricResult,
    ) -> Result<(), SinkError>;

    /// Terminal failure (retries exhausted or non-retryable).
    async fn on_failed(&self, _record: &TaskRecord) -> Result<(), SinkError> {
        Ok(())
    }
}
