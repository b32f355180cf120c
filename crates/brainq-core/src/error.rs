use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::domain::TaskId;

/// Failure of one pipeline invocation.
///
/// Every variant ends up as data on the task record; none of them escape the
/// worker loop.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unsupported input format: {}", path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("pipeline exited with {}: {stderr}", exit_label(*exit_code))]
    Process {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("expected pipeline artifact is missing: {}", .0.display())]
    MissingArtifact(PathBuf),

    #[error("invalid pipeline artifact {}: {reason}", path.display())]
    InvalidArtifact { path: PathBuf, reason: String },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("pipeline invocation panicked: {0}")]
    Panicked(String),

    #[error("task exceeded the maximum processing time of {}s", .0.as_secs())]
    Timeout(Duration),
}

impl PipelineError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Unsupported input never gets better, and a timeout most likely means
    /// the toolchain is stuck.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            PipelineError::UnsupportedFormat { .. } | PipelineError::Timeout(_)
        )
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        PipelineError::Io {
            context: context.into(),
            source,
        }
    }
}

fn exit_label(exit_code: Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

/// Errors surfaced by the queue manager to its callers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("task id already in use: {0}")]
    DuplicateTask(TaskId),

    #[error("queue is shut down")]
    Closed,
}

/// Startup configuration errors. These are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} not found at {}", path.display())]
    MissingExecutable { name: &'static str, path: PathBuf },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}
