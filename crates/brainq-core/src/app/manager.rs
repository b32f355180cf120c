//! QueueManager - the public face of the scheduler.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::QueueConfig;
use crate::domain::{Priority, TaskId};
use crate::error::QueueError;
use crate::observability::{QueueSnapshot, TaskStatusView};
use crate::queue::{PriorityQueue, TaskRecord, TaskStatus, TaskStore};

use super::builder::QueueManagerBuilder;
use super::worker_pool::WorkerPool;

/// Accepts scan-processing requests, schedules them by priority across a
/// fixed worker pool and answers status queries.
///
/// Build one with [`QueueManager::builder`]. All methods take `&self`, so a
/// manager can be shared behind an `Arc` between request handlers.
pub struct QueueManager {
    queue: Arc<PriorityQueue>,
    store: Arc<TaskStore>,
    config: QueueConfig,
    pool: Mutex<Option<WorkerPool>>,
}

impl QueueManager {
    pub fn builder(config: QueueConfig) -> QueueManagerBuilder {
        QueueManagerBuilder::new(config)
    }

    pub(crate) fn new(
        queue: Arc<PriorityQueue>,
        store: Arc<TaskStore>,
        config: QueueConfig,
        pool: WorkerPool,
    ) -> Self {
        Self {
            queue,
            store,
            config,
            pool: Mutex::new(Some(pool)),
        }
    }

    /// Register a task under a fresh id and enqueue it.
    ///
    /// The task's working directory is `<output_dir>/<task id>`.
    pub async fn submit(
        &self,
        input_path: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        priority: Priority,
    ) -> Result<TaskId, QueueError> {
        self.submit_with_id(TaskId::generate(), input_path, output_dir, priority)
            .await
    }

    /// Like [`submit`](Self::submit) with a caller-chosen id.
    pub async fn submit_with_id(
        &self,
        task_id: TaskId,
        input_path: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        priority: Priority,
    ) -> Result<TaskId, QueueError> {
        let input_path = input_path.into();
        let output_dir = output_dir.into().join(task_id.as_str());
        let record = TaskRecord::new(
            task_id.clone(),
            input_path.clone(),
            output_dir,
            priority,
            self.config.max_retries,
        );
        self.store.insert(record).await?;

        // the queue decides admission; a rejected task leaves no trace
        if !self.queue.enqueue(task_id.clone(), priority).await {
            self.store.remove(&task_id).await;
            return Err(QueueError::Closed);
        }
        info!(
            task_id = %task_id,
            priority = %priority,
            input = %input_path.display(),
            "task submitted"
        );
        Ok(task_id)
    }

    pub async fn get_status(&self, task_id: &TaskId) -> Result<TaskStatusView, QueueError> {
        self.store
            .get(task_id)
            .await
            .map(|record| TaskStatusView::from(&record))
            .ok_or_else(|| QueueError::NotFound(task_id.clone()))
    }

    /// Full record, including per-attempt error history.
    pub async fn get_record(&self, task_id: &TaskId) -> Result<TaskRecord, QueueError> {
        self.store
            .get(task_id)
            .await
            .ok_or_else(|| QueueError::NotFound(task_id.clone()))
    }

    pub async fn get_queue_snapshot(&self) -> QueueSnapshot {
        let records = self.store.records().await;
        let processing_count = records
            .iter()
            .filter(|r| r.status == TaskStatus::Processing)
            .count();
        let tasks = records
            .iter()
            .map(|r| (r.task_id.clone(), TaskStatusView::from(r)))
            .collect();

        QueueSnapshot {
            queue_size: self.queue.len().await,
            processing_count,
            max_concurrent: self.config.max_concurrent,
            tasks,
        }
    }

    /// Poll until the task is terminal: COMPLETED, or FAILED with no retry
    /// coming.
    pub async fn wait_for_terminal(
        &self,
        task_id: &TaskId,
        poll_interval: Duration,
    ) -> Result<TaskStatusView, QueueError> {
        loop {
            let status = self.get_status(task_id).await?;
            if status.terminal {
                return Ok(status);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Stop accepting tasks and stop the workers.
    ///
    /// Queued tasks stay PENDING. In-flight tasks get the configured grace
    /// period, after which they are aborted and marked FAILED. Calling this
    /// twice is harmless.
    pub async fn shutdown(&self) {
        self.queue.close().await;

        let Some(pool) = self.pool.lock().await.take() else {
            debug!("shutdown already done");
            return;
        };
        info!(
            grace_secs = self.config.shutdown_grace.as_secs_f64(),
            "shutting down queue"
        );
        pool.shutdown_and_join(self.config.shutdown_grace).await;
    }
}
