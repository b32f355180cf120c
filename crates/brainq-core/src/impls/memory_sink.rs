//! In-memory ResultSink.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{TaskId, VolumetricResult};
use crate::ports::{ResultSink, SinkError};
use crate::queue::TaskRecord;

/// Collects terminal outcomes in arrival order.
#[derive(Debug, Default)]
pub struct MemoryResultSink {
    completed: Mutex<Vec<(TaskId, VolumetricResult)>>,
    failed: Mutex<Vec<(TaskId, String)>>,
}

impl MemoryResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn completed(&self) -> Vec<(TaskId, VolumetricResult)> {
        self.completed.lock().await.clone()
    }

    pub async fn failed(&self) -> Vec<(TaskId, String)> {
        self.failed.lock().await.clone()
    }
}

#[async_trait]
impl ResultSink for MemoryResultSink {
    async fn on_completed(
        &self,
        record: &TaskRecord,
        result: &VolumetricResult,
    ) -> Result<(), SinkError> {
        self.completed
            .lock()
            .await
            .push((record.task_id.clone(), *result));
        Ok(())
    }

    async fn on_failed(&self, record: &TaskRecord) -> Result<(), SinkError> {
        self.failed.lock().await.push((
            record.task_id.clone(),
            record.error.clone().unwrap_or_default(),
        ));
        Ok(())
    }
}
