use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use simq_core::{DriverKind, LaunchBound};

/// Run batches of external jobs under a concurrency bound.
///
/// Each job's outcome is read from marker files its script writes into the
/// job's run directory.
#[derive(Parser, Debug)]
#[command(name = "simq", about = "Job queue scheduler for batches of simulation runs")]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one job per realization and wait for all of them
    Run(RunArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Path to a TOML queue config (defaults apply when omitted)
    #[arg(long, env = "SIMQ_CONFIG")]
    pub config: Option<PathBuf>,

    /// Job script executed in each run directory (falls back to `job_script`
    /// from the config)
    #[arg(long)]
    pub script: Option<PathBuf>,

    /// Number of realizations (one job each)
    #[arg(long, default_value = "1")]
    pub realizations: usize,

    /// Run directory pattern; `%d` is replaced by the realization number
    #[arg(long, default_value = "simulations/realization-%d")]
    pub runpath: String,

    /// Job name pattern; `%d` is replaced by the realization number
    #[arg(long, default_value = "job_%d")]
    pub name: String,

    /// Override the concurrency bound
    #[arg(long)]
    pub max_running: Option<usize>,

    /// Override the submit attempts per job
    #[arg(long)]
    pub max_submit: Option<u32>,

    /// Execution backend: local, lsf, slurm or torque
    #[arg(long)]
    pub driver: Option<DriverKind>,

    /// Launch guard: one_over (default) or exact
    #[arg(long)]
    pub launch_bound: Option<LaunchBound>,

    /// Stop the whole run after this many seconds
    #[arg(long)]
    pub max_runtime: Option<u64>,

    /// Print the final per-job snapshot as JSON
    #[arg(long)]
    pub json: bool,
}
