//! Status views handed to pollers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Priority, TaskId, VolumetricResult};
use crate::queue::{Stage, TaskRecord, TaskStatus};

/// Read-only view of one task, as returned by status polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusView {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<VolumetricResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub priority: Priority,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// False while a retry is still coming.
    pub terminal: bool,
}

impl From<&TaskRecord> for TaskStatusView {
    fn from(record: &TaskRecord) -> Self {
        Self {
            task_id: record.task_id.clone(),
            status: record.status,
            progress: record.progress,
            stage: record.stage,
            result: record.result,
            error: record.error.clone(),
            priority: record.priority,
            retry_count: record.retry_count,
            created_at: record.created_at,
            started_at: record.started_at,
            finished_at: record.finished_at,
            terminal: record.is_terminal(),
        }
    }
}

/// Aggregate queue state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Tasks waiting for a worker, including retries in backoff.
    pub queue_size: usize,
    pub processing_count: usize,
    pub max_concurrent: usize,
    pub tasks: BTreeMap<TaskId, TaskStatusView>,
}
