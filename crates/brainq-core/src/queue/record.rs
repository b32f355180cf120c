//! Task record: submission parameters + lifecycle state.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::warn;

use super::{Stage, TaskStatus};
use crate::domain::{Priority, TaskId, VolumetricResult};
use crate::error::PipelineError;

/// The single source of truth for one task.
///
/// Only the worker currently processing the task mutates it; everyone else
/// reads clones through the store. All transitions go through the methods
/// below, which refuse (and log) anything the state machine does not allow.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub input_path: PathBuf,
    /// Exclusively owned by this task; always ends with the task id.
    pub output_dir: PathBuf,
    pub priority: Priority,

    pub status: TaskStatus,
    pub progress: u8,
    pub stage: Option<Stage>,

    pub result: Option<VolumetricResult>,
    pub error: Option<String>,
    error_retryable: bool,

    pub retry_count: u32,
    pub max_retries: u32,
    /// Errors of earlier attempts that were retried, oldest first.
    pub attempt_errors: Vec<String>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn new(
        task_id: TaskId,
        input_path: PathBuf,
        output_dir: PathBuf,
        priority: Priority,
        max_retries: u32,
    ) -> Self {
        Self {
            task_id,
            input_path,
            output_dir,
            priority,
            status: TaskStatus::Pending,
            progress: 0,
            stage: None,
            result: None,
            error: None,
            error_retryable: false,
            retry_count: 0,
            max_retries,
            attempt_errors: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Pending -> Processing.
    pub fn mark_processing(&mut self) -> bool {
        if !self.transition(TaskStatus::Processing) {
            return false;
        }
        self.progress = 0;
        self.started_at = Some(Utc::now());
        self.finished_at = None;
        true
    }

    /// Best-effort progress telemetry.
    ///
    /// Rejected (logged, not raised) when the task is not processing, when
    /// `pct` is out of range, or when it would move progress backwards.
    /// 100 is reserved for `complete`.
    pub fn update_progress(&mut self, pct: u8) -> bool {
        if self.status != TaskStatus::Processing {
            warn!(task_id = %self.task_id, status = ?self.status, pct, "progress update outside processing ignored");
            return false;
        }
        if pct >= 100 {
            warn!(task_id = %self.task_id, pct, "progress update out of range ignored");
            return false;
        }
        if pct < self.progress {
            warn!(task_id = %self.task_id, pct, current = self.progress, "progress decrease ignored");
            return false;
        }
        self.progress = pct;
        true
    }

    /// Record that the pipeline reached `stage`.
    pub fn enter_stage(&mut self, stage: Stage) -> bool {
        if !self.update_progress(stage.progress()) {
            return false;
        }
        self.stage = Some(stage);
        true
    }

    /// Processing -> Completed.
    pub fn complete(&mut self, result: VolumetricResult) -> bool {
        if !self.transition(TaskStatus::Completed) {
            return false;
        }
        self.progress = 100;
        self.stage = None;
        self.result = Some(result);
        self.error = None;
        self.finished_at = Some(Utc::now());
        true
    }

    /// Processing -> Failed.
    pub fn fail(&mut self, error: &PipelineError) -> bool {
        self.fail_with(error.to_string(), error.is_retryable())
    }

    pub(crate) fn fail_with(&mut self, message: String, retryable: bool) -> bool {
        if !self.transition(TaskStatus::Failed) {
            return false;
        }
        self.result = None;
        self.error = Some(message);
        self.error_retryable = retryable;
        self.finished_at = Some(Utc::now());
        true
    }

    /// Failed with a retryable error and retries remain.
    pub fn is_retryable(&self) -> bool {
        self.status == TaskStatus::Failed
            && self.error_retryable
            && self.retry_count < self.max_retries
    }

    /// Failed -> Pending for another attempt.
    pub fn requeue(&mut self) -> bool {
        if !self.is_retryable() || !self.transition(TaskStatus::Pending) {
            return false;
        }
        if let Some(error) = self.error.take() {
            self.attempt_errors.push(error);
        }
        self.retry_count += 1;
        self.error_retryable = false;
        self.progress = 0;
        self.stage = None;
        self.started_at = None;
        self.finished_at = None;
        true
    }

    /// Completed, or Failed with no retry coming.
    pub fn is_terminal(&self) -> bool {
        match self.status {
            TaskStatus::Completed => true,
            TaskStatus::Failed => !self.is_retryable(),
            TaskStatus::Pending | TaskStatus::Processing => false,
        }
    }

    fn transition(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_transition_to(next) {
            warn!(task_id = %self.task_id, from = ?self.status, to = ?next, "invalid task transition ignored");
            return false;
        }
        self.status = next;
        true
    }
}
