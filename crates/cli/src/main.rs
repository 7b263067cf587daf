mod cli;
mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use simq_queue::{build_driver, JobQueue, JobQueueManager, JobSpec};

use crate::cli::{CliArgs, Command, RunArgs};
use crate::config::{expand_pattern, resolve_config, run_path};

/// How often aggregate counts are logged while the queue runs.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    match args.command {
        Command::Run(run) => run_queue(run).await,
    }
}

async fn run_queue(args: RunArgs) -> Result<ExitCode> {
    let config = resolve_config(&args)?;
    config.log_summary();

    let script = args
        .script
        .clone()
        .or_else(|| config.job_script.as_ref().map(PathBuf::from))
        .context("no job script: pass --script or set job_script in the config")?;
    let script = script
        .canonicalize()
        .with_context(|| format!("job script not found: {}", script.display()))?;

    let driver = build_driver(&config);
    let queue = Arc::new(JobQueue::new(driver, &config).context("failed to create job queue")?);

    for realization in 0..args.realizations {
        let path = run_path(&args.runpath, realization);
        std::fs::create_dir_all(&path)
            .with_context(|| format!("failed to create run directory: {}", path.display()))?;
        let spec = JobSpec::new(expand_pattern(&args.name, realization), &script, path)
            .with_num_cpu(config.num_cpu)
            .with_arguments(serde_json::json!({ "realization": realization }));
        queue.add_job(spec)?;
    }
    queue.submit_complete();
    info!(jobs = queue.len(), script = %script.display(), "Jobs queued");

    let manager = Arc::new(JobQueueManager::from_config(Arc::clone(&queue), &config));
    let mut handle = manager.start();
    let mut progress = tokio::time::interval(PROGRESS_INTERVAL);

    let summary = loop {
        tokio::select! {
            joined = &mut handle => break joined.context("job queue manager panicked")?,
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, stopping job queue");
                manager.stop_queue().await;
            }
            _ = progress.tick() => info!("{}", manager),
        }
    };

    if args.json {
        let snapshot = serde_json::to_string_pretty(&queue.snapshot())
            .context("failed to serialize job snapshot")?;
        println!("{}", snapshot);
    }

    if summary.all_succeeded() {
        println!("All {} active jobs complete.", summary.total);
        Ok(ExitCode::SUCCESS)
    } else {
        println!("{} active job(s) failed.", summary.total - summary.success);
        Ok(ExitCode::FAILURE)
    }
}
