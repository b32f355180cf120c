//! Fixed-size worker pool.
//!
//! Each worker pulls the next entry from the priority queue, runs the
//! pipeline for it and writes the outcome back into the task store. Failures
//! of one task never take a worker down: pipeline errors, timeouts and panics
//! all become data on the task record.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::domain::{TaskId, VolumetricResult};
use crate::error::PipelineError;
use crate::pipeline::{Pipeline, PipelineJob, ProgressReporter, ScanFormat};
use crate::ports::ResultSink;
use crate::queue::{PriorityQueue, QueueEntry, TaskStatus, TaskStore};

const SHUTDOWN_MESSAGE: &str = "interrupted by shutdown";

/// Shared state every worker reads.
pub(crate) struct WorkerContext {
    pub(crate) queue: Arc<PriorityQueue>,
    pub(crate) store: Arc<TaskStore>,
    pub(crate) pipeline: Arc<dyn Pipeline>,
    pub(crate) sink: Arc<dyn ResultSink>,
    pub(crate) config: QueueConfig,
}

/// Worker pool handle.
/// - `request_shutdown` stops workers from taking new tasks
/// - `shutdown_and_join` waits for in-flight tasks, then aborts stragglers
pub(crate) struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
    store: Arc<TaskStore>,
    sink: Arc<dyn ResultSink>,
}

impl WorkerPool {
    /// Spawn `config.max_concurrent` workers.
    pub(crate) fn spawn(ctx: Arc<WorkerContext>) -> Self {
        let n = ctx.config.max_concurrent;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let ctx = Arc::clone(&ctx);
            let mut rx = shutdown_rx.clone();
            joins.push(tokio::spawn(async move {
                worker_loop(worker_id, ctx, &mut rx).await;
            }));
        }
        debug!(workers = n, "worker pool started");

        Self {
            shutdown_tx,
            joins,
            store: Arc::clone(&ctx.store),
            sink: Arc::clone(&ctx.sink),
        }
    }

    pub(crate) fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop the pool. In-flight tasks get `grace` to finish; whatever is
    /// still running afterwards is aborted and recorded as failed.
    pub(crate) async fn shutdown_and_join(mut self, grace: Duration) {
        self.request_shutdown();

        let deadline = tokio::time::Instant::now() + grace;
        let mut aborted = 0usize;
        for join in self.joins.iter_mut() {
            match tokio::time::timeout_at(deadline, &mut *join).await {
                Ok(joined) => log_join_error(joined),
                Err(_) => {
                    join.abort();
                    log_join_error((&mut *join).await);
                    aborted += 1;
                }
            }
        }

        if aborted > 0 {
            warn!(aborted, "workers aborted after shutdown grace period");
            self.fail_interrupted().await;
        }
        info!("worker pool stopped");
    }

    /// Every worker has exited, so anything still PROCESSING was cut off.
    async fn fail_interrupted(&self) {
        for record in self.store.records().await {
            if record.status != TaskStatus::Processing {
                continue;
            }
            let failed = self
                .store
                .update(&record.task_id, |r| {
                    r.fail_with(SHUTDOWN_MESSAGE.to_string(), false)
                        .then(|| r.clone())
                })
                .await
                .flatten();
            let Some(failed) = failed else {
                continue;
            };
            warn!(task_id = %failed.task_id, "task interrupted by shutdown");
            if let Err(e) = self.sink.on_failed(&failed).await {
                error!(task_id = %failed.task_id, error = %e, "result sink rejected failed task");
            }
        }
    }
}

fn log_join_error(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(error = %e, "worker panicked");
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    ctx: Arc<WorkerContext>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // dequeue waits; race it against shutdown
        let entry = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            entry = ctx.queue.dequeue() => entry,
        };

        // None means the queue was closed
        let Some(entry) = entry else {
            break;
        };

        ctx.run_task(worker_id, entry).await;
    }
    debug!(worker_id, "worker stopped");
}

/// Aborts the wrapped task when dropped, so an aborted worker takes its
/// pipeline invocation (and any child process) down with it.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl WorkerContext {
    async fn run_task(&self, worker_id: usize, entry: QueueEntry) {
        let task_id = entry.task_id;

        let started = self
            .store
            .update(&task_id, |r| {
                r.mark_processing()
                    .then(|| (r.input_path.clone(), r.output_dir.clone(), r.retry_count))
            })
            .await
            .flatten();
        let Some((input_path, output_dir, attempt)) = started else {
            warn!(worker_id, task_id = %task_id, "dequeued task is not pending; skipping");
            return;
        };
        info!(
            worker_id,
            task_id = %task_id,
            priority = %entry.priority,
            attempt = attempt + 1,
            input = %input_path.display(),
            "task started"
        );

        match self.execute(&task_id, input_path, output_dir).await {
            Ok(result) => self.on_success(worker_id, &task_id, result).await,
            Err(err) => self.on_failure(worker_id, &task_id, err).await,
        }
    }

    async fn execute(
        &self,
        task_id: &TaskId,
        input_path: PathBuf,
        output_dir: PathBuf,
    ) -> Result<VolumetricResult, PipelineError> {
        let format = ScanFormat::detect(&input_path)?;
        let job = PipelineJob {
            task_id: task_id.clone(),
            input_path,
            output_dir,
            format,
        };
        let progress = ProgressReporter::new(Arc::clone(&self.store), task_id.clone());
        let pipeline = Arc::clone(&self.pipeline);

        // own task so a panicking pipeline is contained here
        let handle = tokio::spawn(async move { pipeline.invoke(&job, &progress).await });
        let _guard = AbortOnDrop(handle.abort_handle());

        let limit = self.config.process_timeout;
        match tokio::time::timeout(limit, handle).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_err)) => Err(PipelineError::Panicked(join_err.to_string())),
            Err(_) => Err(PipelineError::Timeout(limit)),
        }
    }

    async fn on_success(&self, worker_id: usize, task_id: &TaskId, result: VolumetricResult) {
        let record = self
            .store
            .update(task_id, |r| r.complete(result).then(|| r.clone()))
            .await
            .flatten();
        let Some(record) = record else {
            warn!(worker_id, task_id = %task_id, "result discarded; task no longer processing");
            return;
        };
        info!(
            worker_id,
            task_id = %task_id,
            tiv = result.tiv_volume,
            "task completed"
        );

        if let Err(e) = self.sink.on_completed(&record, &result).await {
            error!(task_id = %task_id, error = %e, "result sink rejected completed task");
        }
    }

    async fn on_failure(&self, worker_id: usize, task_id: &TaskId, err: PipelineError) {
        let outcome = self
            .store
            .update(task_id, |r| {
                if !r.fail(&err) {
                    return None;
                }
                let retrying = r.requeue();
                Some((retrying, r.clone()))
            })
            .await
            .flatten();
        let Some((retrying, record)) = outcome else {
            warn!(worker_id, task_id = %task_id, error = %err, "failure discarded; task no longer processing");
            return;
        };

        if retrying {
            let delay = self.config.retry.next_delay(record.retry_count);
            warn!(
                worker_id,
                task_id = %task_id,
                error = %err,
                retry = record.retry_count,
                max_retries = record.max_retries,
                delay_ms = delay.as_millis() as u64,
                "task attempt failed; retrying"
            );
            if !self
                .queue
                .enqueue_after(task_id.clone(), record.priority, delay)
                .await
            {
                warn!(task_id = %task_id, "queue closed; retry dropped");
            }
            return;
        }

        error!(
            worker_id,
            task_id = %task_id,
            error = %err,
            retries = record.retry_count,
            retryable = err.is_retryable(),
            "task failed"
        );
        if let Err(e) = self.sink.on_failed(&record).await {
            error!(task_id = %task_id, error = %e, "result sink rejected failed task");
        }
    }
}
