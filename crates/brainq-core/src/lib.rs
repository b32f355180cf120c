//! brainq-core
//!
//! Priority task queue for structural MRI segmentation. Scans are submitted
//! with a priority, processed by a fixed pool of workers driving the
//! MATLAB + SPM12 + CAT12 toolchain, and polled for status, progress and
//! tissue volumes.
//!
//! # Modules
//! - **domain**: ids, priorities, volumetric results
//! - **queue**: task records and their state machine, the priority queue, the task store, retry policy
//! - **pipeline**: the `Pipeline` seam, CAT12 invocation, subprocess runner, NIfTI reader
//! - **app**: `QueueManager`, its builder and the worker pool
//! - **ports** / **impls**: the result-persistence callback and its implementations
//! - **observability**: status views
//! - **config** / **error**: configuration and error types

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod pipeline;
pub mod ports;
pub mod queue;

pub use app::{BuildError, QueueManager, QueueManagerBuilder};
pub use config::{AppConfig, PipelineConfig, QueueConfig};
pub use domain::{Priority, TaskId, VolumetricResult};
pub use error::{ConfigError, PipelineError, QueueError};
pub use observability::{QueueSnapshot, TaskStatusView};
