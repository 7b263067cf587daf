//! Local-process driver.
//!
//! Runs the job script as a child process with the run directory as working
//! directory. stdout/stderr go to `<name>.stdout` / `<name>.stderr` there.

use std::collections::HashMap;
use std::fs::File;
use std::process::{ExitStatus, Stdio};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::DriverError;

use super::{Driver, DriverStatus, JobDescriptor, JobHandle};

struct LocalProcess {
    child: Child,
    exit: Option<ExitStatus>,
}

/// Spawns each job as a process on this host.
#[derive(Default)]
pub struct LocalDriver {
    processes: Mutex<HashMap<String, LocalProcess>>,
}

impl LocalDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn processes(&self) -> MutexGuard<'_, HashMap<String, LocalProcess>> {
        self.processes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of submissions not yet released.
    pub fn tracked(&self) -> usize {
        self.processes().len()
    }

    fn output_file(job: &JobDescriptor, suffix: &str) -> Result<Stdio, DriverError> {
        let path = job.run_path.join(format!("{}.{}", job.name, suffix));
        let file = File::create(&path).map_err(|e| {
            DriverError::Submission(format!("cannot create {}: {}", path.display(), e))
        })?;
        Ok(Stdio::from(file))
    }
}

#[async_trait]
impl Driver for LocalDriver {
    fn name(&self) -> &str {
        "local"
    }

    async fn submit(&self, job: &JobDescriptor) -> Result<JobHandle, DriverError> {
        // Relative program paths are ambiguous once current_dir is set.
        let script = std::fs::canonicalize(&job.script).map_err(|e| {
            DriverError::Submission(format!("job script {}: {}", job.script.display(), e))
        })?;

        let child = Command::new(&script)
            .current_dir(&job.run_path)
            .stdin(Stdio::null())
            .stdout(Self::output_file(job, "stdout")?)
            .stderr(Self::output_file(job, "stderr")?)
            .spawn()
            .map_err(|e| DriverError::Submission(format!("failed to spawn {}: {}", script.display(), e)))?;

        let handle = JobHandle::new(Uuid::new_v4().to_string());
        debug!(
            job = %job.name,
            pid = ?child.id(),
            handle = %handle.id,
            "spawned local job"
        );
        self.processes()
            .insert(handle.id.clone(), LocalProcess { child, exit: None });
        Ok(handle)
    }

    async fn poll(&self, handle: &JobHandle) -> Result<DriverStatus, DriverError> {
        let mut processes = self.processes();
        let process = processes
            .get_mut(&handle.id)
            .ok_or_else(|| DriverError::UnknownHandle(handle.id.clone()))?;

        if process.exit.is_none() {
            process.exit = process
                .child
                .try_wait()
                .map_err(|e| DriverError::Poll(e.to_string()))?;
        }

        Ok(match process.exit {
            None => DriverStatus::Running,
            Some(status) if status.success() => DriverStatus::Succeeded,
            Some(_) => DriverStatus::Failed,
        })
    }

    async fn kill(&self, handle: &JobHandle) -> Result<(), DriverError> {
        let mut processes = self.processes();
        let Some(process) = processes.get_mut(&handle.id) else {
            return Ok(());
        };
        if process.exit.is_some() {
            return Ok(());
        }
        if let Err(e) = process.child.start_kill() {
            // The process may have exited between polls.
            warn!(handle = %handle.id, error = %e, "kill of local job failed");
        }
        Ok(())
    }

    async fn release(&self, handle: &JobHandle) {
        self.processes().remove(&handle.id);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    fn write_script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("job.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn descriptor(script: PathBuf, run_path: PathBuf) -> JobDescriptor {
        JobDescriptor {
            name: "job_0".to_string(),
            index: 0,
            script,
            run_path,
            num_cpu: 1,
            status_file: "STATUS".to_string(),
            ok_file: "OK".to_string(),
            exit_file: "EXIT".to_string(),
        }
    }

    async fn wait_terminal(driver: &LocalDriver, handle: &JobHandle) -> DriverStatus {
        for _ in 0..500 {
            match driver.poll(handle).await.unwrap() {
                DriverStatus::Running | DriverStatus::Pending => {
                    tokio::time::sleep(Duration::from_millis(10)).await
                }
                terminal => return terminal,
            }
        }
        panic!("local job did not finish");
    }

    #[tokio::test]
    async fn successful_script_runs_in_run_path() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "echo hello; echo done > OK");
        let run_path = dir.path().join("run");
        std::fs::create_dir(&run_path).unwrap();

        let driver = LocalDriver::new();
        let handle = driver.submit(&descriptor(script, run_path.clone())).await.unwrap();

        assert_eq!(wait_terminal(&driver, &handle).await, DriverStatus::Succeeded);
        assert!(run_path.join("OK").exists());
        let stdout = std::fs::read_to_string(run_path.join("job_0.stdout")).unwrap();
        assert_eq!(stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn failing_script_reports_failed() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "exit 3");
        let driver = LocalDriver::new();
        let handle = driver
            .submit(&descriptor(script, dir.path().to_path_buf()))
            .await
            .unwrap();
        assert_eq!(wait_terminal(&driver, &handle).await, DriverStatus::Failed);
    }

    #[tokio::test]
    async fn kill_terminates_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "sleep 30");
        let driver = LocalDriver::new();
        let handle = driver
            .submit(&descriptor(script, dir.path().to_path_buf()))
            .await
            .unwrap();

        driver.kill(&handle).await.unwrap();
        assert_eq!(wait_terminal(&driver, &handle).await, DriverStatus::Failed);
        driver.kill(&handle).await.unwrap();

        driver.release(&handle).await;
        assert_eq!(driver.tracked(), 0);
        driver.kill(&handle).await.unwrap();
        assert!(matches!(
            driver.poll(&handle).await,
            Err(DriverError::UnknownHandle(_))
        ));
    }

    #[tokio::test]
    async fn missing_run_path_rejects_submission() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "true");
        let driver = LocalDriver::new();
        let err = driver
            .submit(&descriptor(script, dir.path().join("missing")))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Submission(_)));
    }

    #[tokio::test]
    async fn missing_script_rejects_submission() {
        let dir = tempfile::tempdir().unwrap();
        let driver = LocalDriver::new();
        let err = driver
            .submit(&descriptor(dir.path().join("nope.sh"), dir.path().to_path_buf()))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Submission(_)));
    }
}
