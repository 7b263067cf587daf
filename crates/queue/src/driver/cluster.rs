//! Batch-scheduler drivers (LSF, Slurm, Torque).
//!
//! Each backend is driven through its command-line tools. Output parsing is
//! kept in pure functions so it can be tested without a cluster.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::DriverError;

use super::{Driver, DriverStatus, JobDescriptor, JobHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterKind {
    Lsf,
    Slurm,
    Torque,
}

impl ClusterKind {
    fn name(self) -> &'static str {
        match self {
            ClusterKind::Lsf => "lsf",
            ClusterKind::Slurm => "slurm",
            ClusterKind::Torque => "torque",
        }
    }

    fn default_commands(self) -> (&'static str, &'static str, &'static str) {
        match self {
            ClusterKind::Lsf => ("bsub", "bjobs", "bkill"),
            ClusterKind::Slurm => ("sbatch", "sacct", "scancel"),
            ClusterKind::Torque => ("qsub", "qstat", "qdel"),
        }
    }
}

/// Driver for a batch scheduler reached through its CLI tools.
#[derive(Debug, Clone)]
pub struct ClusterDriver {
    kind: ClusterKind,
    queue_name: Option<String>,
    submit_cmd: String,
    status_cmd: String,
    kill_cmd: String,
}

impl ClusterDriver {
    pub fn new(kind: ClusterKind) -> Self {
        let (submit, status, kill) = kind.default_commands();
        Self {
            kind,
            queue_name: None,
            submit_cmd: submit.to_string(),
            status_cmd: status.to_string(),
            kill_cmd: kill.to_string(),
        }
    }

    /// Queue (LSF/Torque) or partition (Slurm) to submit to.
    pub fn with_queue_name(mut self, queue: impl Into<String>) -> Self {
        self.queue_name = Some(queue.into());
        self
    }

    /// Override the submit/status/kill executables (e.g. site wrappers).
    pub fn with_commands(
        mut self,
        submit: impl Into<String>,
        status: impl Into<String>,
        kill: impl Into<String>,
    ) -> Self {
        self.submit_cmd = submit.into();
        self.status_cmd = status.into();
        self.kill_cmd = kill.into();
        self
    }

    pub fn kind(&self) -> ClusterKind {
        self.kind
    }

    // Flag/value pairs kept one pair per line.
    #[rustfmt::skip]
    pub(crate) fn submit_args(&self, job: &JobDescriptor) -> Vec<String> {
        let run_path = job.run_path.display().to_string();
        let stdout = job.run_path.join(format!("{}.stdout", job.name)).display().to_string();
        let stderr = job.run_path.join(format!("{}.stderr", job.name)).display().to_string();
        let mut args: Vec<String> = match self.kind {
            ClusterKind::Lsf => vec![
                "-J".into(), job.name.clone(),
                "-n".into(), job.num_cpu.to_string(),
                "-cwd".into(), run_path,
                "-o".into(), stdout,
                "-e".into(), stderr,
            ],
            ClusterKind::Slurm => vec![
                "--parsable".into(),
                format!("--job-name={}", job.name),
                format!("--chdir={}", run_path),
                format!("--ntasks={}", job.num_cpu),
                format!("--output={}", stdout),
                format!("--error={}", stderr),
            ],
            ClusterKind::Torque => vec![
                "-N".into(), job.name.clone(),
                "-d".into(), run_path,
                "-l".into(), format!("nodes=1:ppn={}", job.num_cpu),
                "-o".into(), stdout,
                "-e".into(), stderr,
            ],
        };
        if let Some(queue) = &self.queue_name {
            match self.kind {
                ClusterKind::Slurm => args.push(format!("--partition={}", queue)),
                ClusterKind::Lsf | ClusterKind::Torque => {
                    args.push("-q".into());
                    args.push(queue.clone());
                }
            }
        }
        args.push(job.script.display().to_string());
        args
    }

    #[rustfmt::skip]
    pub(crate) fn status_args(&self, handle: &JobHandle) -> Vec<String> {
        match self.kind {
            ClusterKind::Lsf => vec!["-noheader".into(), "-o".into(), "stat".into(), handle.id.clone()],
            ClusterKind::Slurm => vec![
                "-n".into(), "-X".into(), "-P".into(),
                "-j".into(), handle.id.clone(),
                "-o".into(), "State".into(),
            ],
            ClusterKind::Torque => vec!["-f".into(), handle.id.clone()],
        }
    }
}

/// Extract the backend job id from the submit command's stdout.
pub(crate) fn parse_submit_output(kind: ClusterKind, stdout: &str) -> Option<String> {
    match kind {
        // "Job <1234> is submitted to queue <normal>."
        ClusterKind::Lsf => {
            let start = stdout.find('<')? + 1;
            let end = start + stdout[start..].find('>')?;
            let id = stdout[start..end].trim();
            (!id.is_empty()).then(|| id.to_string())
        }
        // "1234" or "1234;cluster"
        ClusterKind::Slurm => {
            let line = stdout.lines().map(str::trim).find(|l| !l.is_empty())?;
            let id = line.split(';').next()?.trim();
            id.chars().all(|c| c.is_ascii_digit()).then(|| id.to_string())
        }
        // "1234.server"
        ClusterKind::Torque => stdout
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string),
    }
}

/// Map status command output to a driver status. `None` means the state
/// could not be interpreted and the caller should keep polling.
pub(crate) fn parse_status(kind: ClusterKind, stdout: &str) -> Option<DriverStatus> {
    match kind {
        ClusterKind::Lsf => {
            let Some(stat) = stdout.split_whitespace().next() else {
                // Finished jobs age out of bjobs.
                return Some(DriverStatus::Failed);
            };
            match stat {
                "PEND" | "PSUSP" | "WAIT" => Some(DriverStatus::Pending),
                "RUN" | "USUSP" | "SSUSP" => Some(DriverStatus::Running),
                "DONE" => Some(DriverStatus::Succeeded),
                "EXIT" | "ZOMBI" => Some(DriverStatus::Failed),
                _ => None,
            }
        }
        ClusterKind::Slurm => {
            let Some(line) = stdout.lines().map(str::trim).find(|l| !l.is_empty()) else {
                // sacct lags behind sbatch right after submission.
                return Some(DriverStatus::Pending);
            };
            // "CANCELLED by 1000"
            let state = line.split_whitespace().next().unwrap_or(line);
            match state {
                "PENDING" | "CONFIGURING" | "REQUEUED" | "RESIZING" => Some(DriverStatus::Pending),
                "RUNNING" | "COMPLETING" | "SUSPENDED" | "STOPPED" => Some(DriverStatus::Running),
                "COMPLETED" => Some(DriverStatus::Succeeded),
                "FAILED" | "CANCELLED" | "TIMEOUT" | "NODE_FAIL" | "OUT_OF_MEMORY"
                | "PREEMPTED" | "BOOT_FAIL" | "DEADLINE" => Some(DriverStatus::Failed),
                _ => None,
            }
        }
        ClusterKind::Torque => {
            let field = |key: &str| {
                stdout.lines().find_map(|line| {
                    let (k, v) = line.split_once('=')?;
                    (k.trim() == key).then(|| v.trim().to_string())
                })
            };
            let Some(state) = field("job_state") else {
                // Purged from the server.
                return Some(DriverStatus::Failed);
            };
            match state.as_str() {
                "Q" | "H" | "W" | "T" => Some(DriverStatus::Pending),
                "R" | "E" => Some(DriverStatus::Running),
                "C" => match field("exit_status").as_deref() {
                    None | Some("0") => Some(DriverStatus::Succeeded),
                    Some(_) => Some(DriverStatus::Failed),
                },
                _ => None,
            }
        }
    }
}

async fn run_command(program: &str, args: &[String]) -> std::io::Result<std::process::Output> {
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
}

#[async_trait]
impl Driver for ClusterDriver {
    fn name(&self) -> &str {
        self.kind.name()
    }

    async fn submit(&self, job: &JobDescriptor) -> Result<JobHandle, DriverError> {
        let args = self.submit_args(job);
        debug!(job = %job.name, command = %self.submit_cmd, ?args, "submitting to cluster");

        let output = run_command(&self.submit_cmd, &args)
            .await
            .map_err(|e| DriverError::Submission(format!("failed to run {}: {}", self.submit_cmd, e)))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DriverError::Submission(format!(
                "{} exited with {}: {}",
                self.submit_cmd,
                output.status,
                stderr.trim()
            )));
        }

        parse_submit_output(self.kind, &stdout)
            .map(JobHandle::new)
            .ok_or_else(|| {
                DriverError::Submission(format!("unrecognised {} output: {}", self.submit_cmd, stdout.trim()))
            })
    }

    async fn poll(&self, handle: &JobHandle) -> Result<DriverStatus, DriverError> {
        let output = run_command(&self.status_cmd, &self.status_args(handle))
            .await
            .map_err(|e| DriverError::Poll(format!("failed to run {}: {}", self.status_cmd, e)))?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        match parse_status(self.kind, &stdout) {
            Some(status) => Ok(status),
            None => {
                debug!(handle = %handle.id, output = %stdout.trim(), "unrecognised cluster state");
                Ok(DriverStatus::Running)
            }
        }
    }

    async fn kill(&self, handle: &JobHandle) -> Result<(), DriverError> {
        match run_command(&self.kill_cmd, std::slice::from_ref(&handle.id)).await {
            Ok(output) if !output.status.success() => {
                // Already finished or unknown to the scheduler.
                debug!(
                    handle = %handle.id,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "cluster kill returned non-zero"
                );
            }
            Ok(_) => {}
            Err(e) => debug!(handle = %handle.id, error = %e, "cluster kill failed to run"),
        }
        Ok(())
    }
}
