//! External pipeline invoker.
//!
//! The `Pipeline` trait is the seam between the scheduler and the toolchain:
//! workers hand it a `PipelineJob` and get tissue volumes or a
//! `PipelineError` back. `Cat12Pipeline` drives MATLAB + SPM12 + CAT12; tests
//! plug in scripted fakes.

mod cat12;
pub mod format;
pub mod nifti;
pub mod process;

pub use cat12::Cat12Pipeline;
pub use format::ScanFormat;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{TaskId, VolumetricResult};
use crate::error::PipelineError;
use crate::queue::{Stage, TaskStore};

/// Everything one invocation needs.
#[derive(Debug, Clone)]
pub struct PipelineJob {
    pub task_id: TaskId,
    pub input_path: PathBuf,
    /// Owned by this task alone. Intermediate files and results go here.
    pub output_dir: PathBuf,
    pub format: ScanFormat,
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    /// Run the toolchain for one scan. Must not modify `job.input_path`.
    async fn invoke(
        &self,
        job: &PipelineJob,
        progress: &ProgressReporter,
    ) -> Result<VolumetricResult, PipelineError>;
}

/// Lets a pipeline report stage checkpoints on behalf of the worker that
/// owns the task.
#[derive(Clone)]
pub struct ProgressReporter {
    store: Arc<TaskStore>,
    task_id: TaskId,
}

impl ProgressReporter {
    pub fn new(store: Arc<TaskStore>, task_id: TaskId) -> Self {
        Self { store, task_id }
    }

    pub async fn stage(&self, stage: Stage) {
        self.store
            .update(&self.task_id, |record| record.enter_stage(stage))
            .await;
    }
}
