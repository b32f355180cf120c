use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use brainq_core::impls::LoggingResultSink;
use brainq_core::pipeline::Cat12Pipeline;
use brainq_core::queue::TaskStatus;
use brainq_core::{AppConfig, Priority, QueueManager, QueueSnapshot, TaskId};

/// Submit structural MRI scans for CAT12 segmentation and wait for their
/// tissue volumes.
#[derive(Debug, Parser)]
#[command(name = "brainq", version)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, short = 'c', env = "BRAINQ_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "BRAINQ_MAX_CONCURRENT")]
    max_concurrent: Option<usize>,

    #[arg(long, env = "BRAINQ_MAX_RETRIES")]
    max_retries: Option<u32>,

    #[arg(long, env = "MATLAB_PATH")]
    matlab_path: Option<PathBuf>,

    #[arg(long, env = "SPM_PATH")]
    spm_path: Option<PathBuf>,

    #[arg(long, env = "CAT12_PATH")]
    cat12_path: Option<PathBuf>,

    /// Each task writes into `<output-dir>/<task id>`.
    #[arg(long, short = 'o', default_value = "brainq-output")]
    output_dir: PathBuf,

    /// HIGH, NORMAL or LOW.
    #[arg(long, short = 'p', default_value_t = Priority::Normal)]
    priority: Priority,

    #[arg(long, default_value_t = 500)]
    poll_interval_ms: u64,

    /// Used when RUST_LOG is unset.
    #[arg(long, default_value_t = LevelFilter::INFO)]
    log_level: LevelFilter,

    /// DICOM (.dcm) or NIfTI (.nii / .nii.gz) scans.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
}

#[derive(Debug, Serialize)]
struct Report {
    submitted: Vec<TaskId>,
    snapshot: QueueSnapshot,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    start_logger(cli.log_level);

    let config = load_config(&cli)?;
    let pipeline = Cat12Pipeline::new(config.pipeline.clone())
        .context("segmentation toolchain is not usable")?;
    let manager = QueueManager::builder(config.queue.clone())
        .pipeline(Arc::new(pipeline))
        .result_sink(Arc::new(LoggingResultSink))
        .build()
        .context("failed to start queue")?;

    let output_dir = std::path::absolute(&cli.output_dir)
        .with_context(|| format!("invalid output directory {}", cli.output_dir.display()))?;

    let mut submitted = Vec::with_capacity(cli.inputs.len());
    for input in &cli.inputs {
        let task_id = manager
            .submit(input.clone(), output_dir.clone(), cli.priority)
            .await?;
        submitted.push(task_id);
    }
    info!(count = submitted.len(), priority = %cli.priority, "scans submitted");

    let poll_interval = Duration::from_millis(cli.poll_interval_ms);
    tokio::select! {
        res = wait_all(&manager, &submitted, poll_interval) => res?,
        _ = tokio::signal::ctrl_c() => warn!("interrupted; shutting down"),
    }

    manager.shutdown().await;

    let snapshot = manager.get_queue_snapshot().await;
    let failed = snapshot
        .tasks
        .values()
        .filter(|t| t.status != TaskStatus::Completed)
        .count();
    let report = Report {
        submitted,
        snapshot,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    if failed > 0 {
        anyhow::bail!("{failed} task(s) did not complete");
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = AppConfig::load(cli.config.as_deref())?;

    if let Some(n) = cli.max_concurrent {
        config.queue.max_concurrent = n;
    }
    if let Some(n) = cli.max_retries {
        config.queue.max_retries = n;
    }
    if let Some(path) = &cli.matlab_path {
        config.pipeline.matlab_path = path.clone();
    }
    if let Some(path) = &cli.spm_path {
        config.pipeline.spm_path = path.clone();
    }
    if let Some(path) = &cli.cat12_path {
        config.pipeline.cat12_path = path.clone();
    }
    Ok(config)
}

async fn wait_all(
    manager: &QueueManager,
    task_ids: &[TaskId],
    poll_interval: Duration,
) -> Result<()> {
    for task_id in task_ids {
        let status = manager.wait_for_terminal(task_id, poll_interval).await?;
        info!(task_id = %task_id, status = ?status.status, "task finished");
    }
    Ok(())
}

fn start_logger(default_level: LevelFilter) {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        _ => EnvFilter::default().add_directive(default_level.into()),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
