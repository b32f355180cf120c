//! ResultSink that only logs.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::domain::VolumetricResult;
use crate::ports::{ResultSink, SinkError};
use crate::queue::TaskRecord;

/// Logs terminal outcomes. For deployments where the caller reads results
/// by polling status and stores them itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingResultSink;

#[async_trait]
impl ResultSink for LoggingResultSink {
    async fn on_completed(
        &self,
        record: &TaskRecord,
        result: &VolumetricResult,
    ) -> Result<(), SinkError> {
        info!(
            task_id = %record.task_id,
            input = %record.input_path.display(),
            gm = result.gm_volume,
            wm = result.wm_volume,
            csf = result.csf_volume,
            tiv = result.tiv_volume,
            "segmentation completed"
        );
        Ok(())
    }

    async fn on_failed(&self, record: &TaskRecord) -> Result<(), SinkError> {
        warn!(
            task_id = %record.task_id,
            input = %record.input_path.display(),
            error = record.error.as_deref().unwrap_or_default(),
            retries = record.retry_count,
            "segmentation failed"
        );
        Ok(())
    }
}
