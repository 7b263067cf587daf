use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_parse<T: FromStr>(profile: &str, key: &str) -> Result<Option<T>, ConfigError> {
    match profiled_env_opt(profile, key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(format!("{}={} is not a valid value", key, raw))),
        None => Ok(None),
    }
}

// ── Enums ─────────────────────────────────────────────────────

/// Execution backend selected for a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    /// Child processes on this host.
    Local,
    /// IBM Spectrum LSF (`bsub`/`bjobs`/`bkill`).
    Lsf,
    /// Slurm (`sbatch`/`sacct`/`scancel`).
    Slurm,
    /// Torque/PBS (`qsub`/`qstat`/`qdel`).
    Torque,
}

impl FromStr for DriverKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(DriverKind::Local),
            "lsf" => Ok(DriverKind::Lsf),
            "slurm" => Ok(DriverKind::Slurm),
            "torque" | "pbs" => Ok(DriverKind::Torque),
            other => Err(ConfigError::Invalid(format!("unknown driver '{}'", other))),
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverKind::Local => write!(f, "local"),
            DriverKind::Lsf => write!(f, "lsf"),
            DriverKind::Slurm => write!(f, "slurm"),
            DriverKind::Torque => write!(f, "torque"),
        }
    }
}

/// How the launch guard compares the occupied slot count with `max_running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchBound {
    /// Launch while `occupied <= max_running`; peak occupancy is `max_running + 1`.
    #[default]
    OneOver,
    /// Launch while `occupied < max_running`; peak occupancy is `max_running`.
    Exact,
}

impl LaunchBound {
    /// Whether another job may be launched with `occupied` slots in use.
    pub fn permits(self, occupied: usize, max_running: usize) -> bool {
        match self {
            LaunchBound::OneOver => occupied <= max_running,
            LaunchBound::Exact => occupied < max_running,
        }
    }
}

impl FromStr for LaunchBound {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "one_over" | "inclusive" => Ok(LaunchBound::OneOver),
            "exact" | "exclusive" => Ok(LaunchBound::Exact),
            other => Err(ConfigError::Invalid(format!("unknown launch bound '{}'", other))),
        }
    }
}

// ── Queue config ──────────────────────────────────────────────

/// Queue configuration, typically parsed from TOML and overridden from env.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Execution backend.
    #[serde(default = "default_driver")]
    pub driver: DriverKind,
    /// Concurrency bound for jobs occupying a slot.
    #[serde(default = "default_max_running")]
    pub max_running: usize,
    /// Default submit-attempt bound, overridable per job.
    #[serde(default = "default_max_submit")]
    pub max_submit: u32,
    /// Marker written by the job when it starts producing output.
    #[serde(default = "default_status_file")]
    pub status_file: String,
    /// Marker written by the job on success.
    #[serde(default = "default_ok_file")]
    pub ok_file: String,
    /// Marker written by the job on failure.
    #[serde(default = "default_exit_file")]
    pub exit_file: String,
    /// Manager control loop interval in milliseconds. 0 = yield only.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Per-job completion polling interval in milliseconds. 0 = yield only.
    #[serde(default = "default_poll_interval")]
    pub job_poll_interval_ms: u64,
    /// How long to wait for the ok marker after the backend reports success.
    #[serde(default)]
    pub marker_grace_ms: u64,
    /// Wall-clock limit for a single job attempt.
    #[serde(default)]
    pub max_job_duration_secs: Option<u64>,
    /// Wall-clock limit for the whole queue; exceeding it stops the queue.
    #[serde(default)]
    pub max_runtime_secs: Option<u64>,
    #[serde(default)]
    pub launch_bound: LaunchBound,
    /// CPU units requested per job.
    #[serde(default = "default_num_cpu")]
    pub num_cpu: u32,
    /// Cluster queue / partition name.
    #[serde(default)]
    pub queue_name: Option<String>,
    /// Default job script.
    #[serde(default)]
    pub job_script: Option<String>,
}

fn default_driver() -> DriverKind { DriverKind::Local }
fn default_max_running() -> usize { 5 }
fn default_max_submit() -> u32 { 2 }
fn default_status_file() -> String { "STATUS".to_string() }
fn default_ok_file() -> String { "OK".to_string() }
fn default_exit_file() -> String { "EXIT".to_string() }
fn default_poll_interval() -> u64 { 1000 }
fn default_num_cpu() -> u32 { 1 }

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            max_running: default_max_running(),
            max_submit: default_max_submit(),
            status_file: default_status_file(),
            ok_file: default_ok_file(),
            exit_file: default_exit_file(),
            poll_interval_ms: default_poll_interval(),
            job_poll_interval_ms: default_poll_interval(),
            marker_grace_ms: 0,
            max_job_duration_secs: None,
            max_runtime_secs: None,
            launch_bound: LaunchBound::default(),
            num_cpu: default_num_cpu(),
            queue_name: None,
            job_script: None,
        }
    }
}

impl QueueConfig {
    /// Parse a TOML config file. Missing keys take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: QueueConfig = toml::from_str(raw)?;
        Ok(config)
    }

    /// Apply `SIMQ_*` environment overrides (call `load_dotenv()` first).
    /// When `SIMQ_PROFILE` is set (e.g. `CLUSTER`), every key is first looked
    /// up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        let profile = env_opt("SIMQ_PROFILE").unwrap_or_default().to_uppercase();
        let p = profile.as_str();

        if let Some(v) = profiled_env_parse(p, "SIMQ_DRIVER")? {
            self.driver = v;
        }
        if let Some(v) = profiled_env_parse(p, "SIMQ_MAX_RUNNING")? {
            self.max_running = v;
        }
        if let Some(v) = profiled_env_parse(p, "SIMQ_MAX_SUBMIT")? {
            self.max_submit = v;
        }
        if let Some(v) = profiled_env_parse(p, "SIMQ_POLL_INTERVAL_MS")? {
            self.poll_interval_ms = v;
        }
        if let Some(v) = profiled_env_parse(p, "SIMQ_JOB_POLL_INTERVAL_MS")? {
            self.job_poll_interval_ms = v;
        }
        if let Some(v) = profiled_env_parse(p, "SIMQ_MAX_JOB_DURATION_SECS")? {
            self.max_job_duration_secs = Some(v);
        }
        if let Some(v) = profiled_env_parse(p, "SIMQ_MAX_RUNTIME_SECS")? {
            self.max_runtime_secs = Some(v);
        }
        if let Some(v) = profiled_env_parse(p, "SIMQ_LAUNCH_BOUND")? {
            self.launch_bound = v;
        }
        if let Some(v) = profiled_env_opt(p, "SIMQ_QUEUE_NAME") {
            self.queue_name = Some(v);
        }
        Ok(())
    }

    /// Reject configurations the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_running == 0 {
            return Err(ConfigError::Invalid("max_running must be at least 1".into()));
        }
        if self.max_submit == 0 {
            return Err(ConfigError::Invalid("max_submit must be at least 1".into()));
        }
        let markers = [&self.status_file, &self.ok_file, &self.exit_file];
        if markers.iter().any(|m| m.trim().is_empty()) {
            return Err(ConfigError::Invalid("marker file names must not be empty".into()));
        }
        if markers[0] == markers[1] || markers[0] == markers[2] || markers[1] == markers[2] {
            return Err(ConfigError::Invalid("marker file names must be distinct".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn job_poll_interval(&self) -> Duration {
        Duration::from_millis(self.job_poll_interval_ms)
    }

    pub fn marker_grace(&self) -> Duration {
        Duration::from_millis(self.marker_grace_ms)
    }

    pub fn max_job_duration(&self) -> Option<Duration> {
        self.max_job_duration_secs.map(Duration::from_secs)
    }

    pub fn max_runtime(&self) -> Option<Duration> {
        self.max_runtime_secs.map(Duration::from_secs)
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Queue config loaded:");
        tracing::info!("  driver:      {}", self.driver);
        tracing::info!("  slots:       max_running={}, bound={:?}", self.max_running, self.launch_bound);
        tracing::info!("  retries:     max_submit={}", self.max_submit);
        tracing::info!("  markers:     status={}, ok={}, exit={}", self.status_file, self.ok_file, self.exit_file);
        tracing::info!(
            "  limits:      job={:?}s, runtime={:?}s",
            self.max_job_duration_secs, self.max_runtime_secs
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.driver, DriverKind::Local);
        assert_eq!(config.max_running, 5);
        assert_eq!(config.max_submit, 2);
        assert_eq!(config.status_file, "STATUS");
        assert_eq!(config.ok_file, "OK");
        assert_eq!(config.exit_file, "EXIT");
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.launch_bound, LaunchBound::OneOver);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let config = QueueConfig::from_toml(
            r#"
            driver = "slurm"
            max_running = 20
            launch_bound = "exact"
            queue_name = "short"
            "#,
        )
        .unwrap();
        assert_eq!(config.driver, DriverKind::Slurm);
        assert_eq!(config.max_running, 20);
        assert_eq!(config.max_submit, 2);
        assert_eq!(config.launch_bound, LaunchBound::Exact);
        assert_eq!(config.queue_name.as_deref(), Some("short"));
    }

    #[test]
    fn from_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_submit = 7\nmax_runtime_secs = 60").unwrap();
        let config = QueueConfig::from_file(file.path()).unwrap();
        assert_eq!(config.max_submit, 7);
        assert_eq!(config.max_runtime(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn unknown_driver_rejected() {
        assert!(QueueConfig::from_toml("driver = \"kubernetes\"").is_err());
        assert!("kubernetes".parse::<DriverKind>().is_err());
        assert_eq!("PBS".parse::<DriverKind>().unwrap(), DriverKind::Torque);
    }

    #[test]
    fn validate_rejects_zero_bounds() {
        let mut config = QueueConfig::default();
        config.max_running = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = QueueConfig::default();
        config.max_submit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_clashing_markers() {
        let mut config = QueueConfig::default();
        config.exit_file = "OK".to_string();
        assert!(config.validate().is_err());

        let mut config = QueueConfig::default();
        config.status_file = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn launch_bound_guard() {
        assert!(LaunchBound::OneOver.permits(5, 5));
        assert!(!LaunchBound::OneOver.permits(6, 5));
        assert!(LaunchBound::Exact.permits(4, 5));
        assert!(!LaunchBound::Exact.permits(5, 5));
    }
}
