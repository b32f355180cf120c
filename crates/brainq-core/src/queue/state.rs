//! Task status state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a task.
///
/// Transitions:
/// - Pending -> Processing -> Completed
/// - Pending -> Processing -> Failed
/// - Failed -> Pending (retry, while retries remain)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Waiting in the queue (fresh, or waiting out a retry delay).
    Pending,

    /// Owned by a worker.
    Processing,

    Completed,

    Failed,
}

impl TaskStatus {
    pub(crate) fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Processing)
                | (TaskStatus::Processing, TaskStatus::Completed)
                | (TaskStatus::Processing, TaskStatus::Failed)
                | (TaskStatus::Failed, TaskStatus::Pending)
        )
    }
}

/// Checkpoint the pipeline has reached inside a Processing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Converting,
    Segmenting,
    Extracting,
}

impl Stage {
    /// Progress percentage reported when the stage begins.
    pub fn progress(self) -> u8 {
        match self {
            Stage::Converting => 10,
            Stage::Segmenting => 30,
            Stage::Extracting => 80,
        }
    }
}
