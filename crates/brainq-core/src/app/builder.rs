//! QueueManagerBuilder - wiring and startup validation.
//!
//! Configuration problems surface from `build()`, before any worker starts.

use std::sync::Arc;

use crate::config::QueueConfig;
use crate::error::ConfigError;
use crate::impls::LoggingResultSink;
use crate::pipeline::Pipeline;
use crate::ports::ResultSink;
use crate::queue::{PriorityQueue, TaskStore};

use super::manager::QueueManager;
use super::worker_pool::{WorkerContext, WorkerPool};

/// Builds a [`QueueManager`].
///
/// ```ignore
/// let manager = QueueManager::builder(config.queue)
///     .pipeline(Arc::new(Cat12Pipeline::new(config.pipeline)?))
///     .result_sink(Arc::new(LoggingResultSink))
///     .build()?;
/// ```
///
/// `build()` spawns the worker pool and so must run inside a tokio runtime.
pub struct QueueManagerBuilder {
    config: QueueConfig,
    pipeline: Option<Arc<dyn Pipeline>>,
    sink: Option<Arc<dyn ResultSink>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no pipeline configured; call QueueManagerBuilder::pipeline before build")]
    MissingPipeline,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl QueueManagerBuilder {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            pipeline: None,
            sink: None,
        }
    }

    pub fn pipeline(mut self, pipeline: Arc<dyn Pipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Defaults to [`LoggingResultSink`].
    pub fn result_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> Result<QueueManager, BuildError> {
        self.config.validate()?;
        let pipeline = self.pipeline.ok_or(BuildError::MissingPipeline)?;
        let sink = self
            .sink
            .unwrap_or_else(|| Arc::new(LoggingResultSink) as Arc<dyn ResultSink>);

        let queue = Arc::new(PriorityQueue::new());
        let store = Arc::new(TaskStore::new());
        let ctx = Arc::new(WorkerContext {
            queue: Arc::clone(&queue),
            store: Arc::clone(&store),
            pipeline,
            sink,
            config: self.config.clone(),
        });
        let pool = WorkerPool::spawn(ctx);

        Ok(QueueManager::new(queue, store, self.config, pool))
    }
}
