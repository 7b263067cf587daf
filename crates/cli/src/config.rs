use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use simq_core::{load_dotenv, QueueConfig};

use crate::cli::RunArgs;

/// Resolve the queue config for a run.
/// Priority: CLI flags > `SIMQ_*` env vars > config file > defaults.
pub fn resolve_config(args: &RunArgs) -> Result<QueueConfig> {
    load_dotenv();

    let mut config = match &args.config {
        Some(path) => {
            debug!(config = %path.display(), "Loading queue config");
            QueueConfig::from_file(path)
                .with_context(|| format!("failed to load config: {}", path.display()))?
        }
        None => QueueConfig::default(),
    };
    config
        .apply_env()
        .context("invalid SIMQ_* environment override")?;

    if let Some(max_running) = args.max_running {
        config.max_running = max_running;
    }
    if let Some(max_submit) = args.max_submit {
        config.max_submit = max_submit;
    }
    if let Some(driver) = args.driver {
        config.driver = driver;
    }
    if let Some(bound) = args.launch_bound {
        config.launch_bound = bound;
    }
    if let Some(secs) = args.max_runtime {
        config.max_runtime_secs = Some(secs);
    }

    config.validate().context("invalid queue config")?;
    Ok(config)
}

/// Substitute the realization number for every `%d` in `pattern`.
pub fn expand_pattern(pattern: &str, realization: usize) -> String {
    pattern.replace("%d", &realization.to_string())
}

pub fn run_path(pattern: &str, realization: usize) -> PathBuf {
    PathBuf::from(expand_pattern(pattern, realization))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    use crate::cli::{CliArgs, Command};

    fn run_args(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["simq", "run", "--script", "job.sh"];
        argv.extend_from_slice(extra);
        let CliArgs { command: Command::Run(args) } = CliArgs::parse_from(argv);
        args
    }

    #[test]
    fn test_expand_pattern() {
        assert_eq!(expand_pattern("sim/realization-%d/iter-%d", 7), "sim/realization-7/iter-7");
        assert_eq!(expand_pattern("fixed", 3), "fixed");
        assert_eq!(run_path("runs/%d", 2), PathBuf::from("runs/2"));
    }

    #[test]
    fn test_cli_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.toml");
        std::fs::write(&path, "max_running = 8\nmax_submit = 4\ndriver = \"slurm\"\n").unwrap();
        let config_arg = path.to_str().unwrap();

        let args = run_args(&["--config", config_arg, "--max-running", "2", "--driver", "local"]);
        let config = resolve_config(&args).unwrap();
        assert_eq!(config.max_running, 2);
        assert_eq!(config.max_submit, 4);
        assert_eq!(config.driver, simq_core::DriverKind::Local);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let args = run_args(&["--max-submit", "0"]);
        assert!(resolve_config(&args).is_err());
    }

    #[test]
    fn test_defaults_and_flags_parse() {
        let args = run_args(&["--realizations", "4", "--launch-bound", "exact", "--json"]);
        assert_eq!(args.realizations, 4);
        assert_eq!(args.runpath, "simulations/realization-%d");
        assert_eq!(args.launch_bound, Some(simq_core::LaunchBound::Exact));
        assert!(args.json);
    }
}
