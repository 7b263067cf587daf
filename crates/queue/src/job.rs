//! State machine for one external job.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::driver::{Driver, DriverStatus, JobDescriptor, JobHandle};
use crate::error::QueueError;
use crate::markers::{CompletionMarkers, Outcome};
use crate::pacing::pause;
use crate::status::JobStatus;

/// Caller hook invoked on a finished attempt.
pub type Callback = Arc<dyn Fn(&CallbackContext) + Send + Sync>;

/// What a callback receives: the caller's bound arguments plus the run
/// directory and attempt that produced the outcome.
#[derive(Debug, Clone)]
pub struct CallbackContext {
    pub job_name: String,
    pub index: usize,
    pub run_path: PathBuf,
    pub submit_attempt: u32,
    pub arguments: serde_json::Value,
}

/// Caller-side description of a job, turned into a [`Job`] by
/// [`JobQueue::add_job`](crate::JobQueue::add_job).
#[derive(Clone)]
pub struct JobSpec {
    pub name: String,
    pub script: PathBuf,
    pub run_path: PathBuf,
    pub num_cpu: u32,
    /// Overrides the queue's `max_submit` when set.
    pub max_submit: Option<u32>,
    pub arguments: serde_json::Value,
    pub on_done: Option<Callback>,
    pub on_exit: Option<Callback>,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, script: impl Into<PathBuf>, run_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            script: script.into(),
            run_path: run_path.into(),
            num_cpu: 1,
            max_submit: None,
            arguments: serde_json::Value::Null,
            on_done: None,
            on_exit: None,
        }
    }

    pub fn with_num_cpu(mut self, num_cpu: u32) -> Self {
        self.num_cpu = num_cpu;
        self
    }

    pub fn with_max_submit(mut self, max_submit: u32) -> Self {
        self.max_submit = Some(max_submit);
        self
    }

    pub fn with_arguments(mut self, arguments: serde_json::Value) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn on_done<F>(mut self, f: F) -> Self
    where
        F: Fn(&CallbackContext) + Send + Sync + 'static,
    {
        self.on_done = Some(Arc::new(f));
        self
    }

    pub fn on_exit<F>(mut self, f: F) -> Self
    where
        F: Fn(&CallbackContext) + Send + Sync + 'static,
    {
        self.on_exit = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for JobSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobSpec")
            .field("name", &self.name)
            .field("script", &self.script)
            .field("run_path", &self.run_path)
            .field("num_cpu", &self.num_cpu)
            .field("max_submit", &self.max_submit)
            .finish_non_exhaustive()
    }
}

/// Timing knobs for one execution unit, shared by every job in a queue.
#[derive(Debug, Clone, Copy)]
pub struct RunSettings {
    /// Interval between completion checks. Zero only yields.
    pub poll_interval: Duration,
    /// Wait for the ok marker after the backend reports success.
    pub marker_grace: Duration,
    /// Wall-clock limit for one attempt.
    pub max_job_duration: Option<Duration>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            marker_grace: Duration::ZERO,
            max_job_duration: None,
        }
    }
}

/// Result of claiming a waiting job for a new attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The job is SUBMITTED and the attempt should be driven.
    Attempt(u32),
    /// `max_submit` was already used up; the job is now FAILED.
    Exhausted,
}

#[derive(Debug, Clone)]
struct JobState {
    status: JobStatus,
    submit_attempt: u32,
    handle: Option<JobHandle>,
    kill_requested: bool,
    submitted_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

/// Serializable point-in-time view of a job for progress reporting.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub index: usize,
    pub name: String,
    pub run_path: PathBuf,
    pub status: JobStatus,
    pub submit_attempt: u32,
    pub max_submit: u32,
    pub submitted_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// One external job owned by a [`JobQueue`](crate::JobQueue).
///
/// All mutable state sits behind a lock: the job's own execution unit writes
/// it while the manager reads aggregate counts concurrently.
pub struct Job {
    descriptor: JobDescriptor,
    max_submit: u32,
    arguments: serde_json::Value,
    on_done: Option<Callback>,
    on_exit: Option<Callback>,
    state: RwLock<JobState>,
}

impl Job {
    pub(crate) fn new(spec: JobSpec, descriptor: JobDescriptor, max_submit: u32) -> Self {
        Self {
            descriptor,
            max_submit,
            arguments: spec.arguments,
            on_done: spec.on_done,
            on_exit: spec.on_exit,
            state: RwLock::new(JobState {
                status: JobStatus::Waiting,
                submit_attempt: 0,
                handle: None,
                kill_requested: false,
                submitted_at: None,
                finished_at: None,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, JobState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, JobState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn index(&self) -> usize {
        self.descriptor.index
    }

    pub fn run_path(&self) -> &Path {
        &self.descriptor.run_path
    }

    pub fn descriptor(&self) -> &JobDescriptor {
        &self.descriptor
    }

    pub fn max_submit(&self) -> u32 {
        self.max_submit
    }

    pub fn status(&self) -> JobStatus {
        self.read().status
    }

    pub fn submit_attempt(&self) -> u32 {
        self.read().submit_attempt
    }

    pub fn kill_requested(&self) -> bool {
        self.read().kill_requested
    }

    pub fn markers(&self) -> CompletionMarkers {
        CompletionMarkers::new(
            &self.descriptor.run_path,
            &self.descriptor.status_file,
            &self.descriptor.ok_file,
            &self.descriptor.exit_file,
        )
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.read();
        JobSnapshot {
            index: self.descriptor.index,
            name: self.descriptor.name.clone(),
            run_path: self.descriptor.run_path.clone(),
            status: state.status,
            submit_attempt: state.submit_attempt,
            max_submit: self.max_submit,
            submitted_at: state.submitted_at,
            finished_at: state.finished_at,
        }
    }

    fn set_status(&self, status: JobStatus) {
        let mut state = self.write();
        state.status = status;
        if status.is_terminal() {
            state.finished_at = Some(Utc::now());
        }
    }

    /// Start a new attempt: WAITING -> SUBMITTED, counting the attempt.
    ///
    /// Runs synchronously so the slot is occupied before the execution unit
    /// is spawned. An attempt past `max_submit` fails the job without
    /// touching the driver.
    pub(crate) fn claim(&self) -> Result<Claim, QueueError> {
        let mut state = self.write();
        if state.status != JobStatus::Waiting {
            return Err(QueueError::IllegalTransition { from: state.status, op: "run" });
        }
        state.submit_attempt += 1;
        if state.submit_attempt > self.max_submit {
            state.submit_attempt = self.max_submit;
            state.status = JobStatus::Failed;
            state.finished_at = Some(Utc::now());
            return Ok(Claim::Exhausted);
        }
        state.status = JobStatus::Submitted;
        state.handle = None;
        state.submitted_at = Some(Utc::now());
        Ok(Claim::Attempt(state.submit_attempt))
    }

    /// Claim and drive one attempt to its end. Returns the status the job
    /// was left in (WAITING when a retry is due).
    ///
    /// Callers outside the crate go through [`JobQueue::run_job`], which
    /// refuses once the queue is stopped.
    ///
    /// [`JobQueue::run_job`]: crate::JobQueue::run_job
    pub(crate) async fn run(&self, driver: &dyn Driver, settings: RunSettings) -> Result<JobStatus, QueueError> {
        match self.claim()? {
            Claim::Attempt(attempt) => Ok(self.drive_attempt(driver, settings, attempt).await),
            Claim::Exhausted => Ok(JobStatus::Failed),
        }
    }

    /// Request termination of a submitted or running job.
    ///
    /// Fire-and-forget: the execution unit observes the termination and
    /// settles the final status. Repeated calls issue one kill.
    pub async fn stop(&self, driver: &dyn Driver) {
        let handle = {
            let mut state = self.write();
            if !state.status.occupies_slot() || state.kill_requested {
                return;
            }
            state.kill_requested = true;
            state.handle.clone()
        };
        info!(job = %self.name(), index = self.index(), "kill requested");
        // Without a handle the submission is still in flight; the execution
        // unit kills it as soon as the handle arrives.
        if let Some(handle) = handle {
            if let Err(e) = driver.kill(&handle).await {
                warn!(job = %self.name(), error = %e, "driver kill failed");
            }
        }
    }

    /// Mark a job that never launched as killed. Used by the end-of-run sweep.
    pub fn kill_if_waiting(&self) -> bool {
        let mut state = self.write();
        if state.status != JobStatus::Waiting {
            return false;
        }
        state.status = JobStatus::IsKilled;
        state.finished_at = Some(Utc::now());
        true
    }

    /// Drive a claimed attempt: submit, watch the markers and the backend,
    /// then settle DONE, WAITING (retry), FAILED or IS_KILLED.
    pub(crate) async fn drive_attempt(&self, driver: &dyn Driver, settings: RunSettings, attempt: u32) -> JobStatus {
        let markers = self.markers();
        if let Err(e) = markers.clear_outcome() {
            warn!(job = %self.name(), error = %e, "could not clear stale markers");
        }

        if self.kill_requested() {
            return self.settle_killed();
        }

        debug!(job = %self.name(), attempt, driver = driver.name(), "submitting job");
        let handle = match driver.submit(&self.descriptor).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(job = %self.name(), attempt, error = %e, "submission failed");
                return self.settle(Outcome::Failure, attempt).await;
            }
        };

        let kill_pending = {
            let mut state = self.write();
            state.handle = Some(handle.clone());
            state.kill_requested
        };
        if kill_pending {
            if let Err(e) = driver.kill(&handle).await {
                warn!(job = %self.name(), error = %e, "driver kill failed");
            }
        }

        let outcome = self.watch(driver, &handle, &markers, settings).await;
        driver.release(&handle).await;
        self.settle(outcome, attempt).await
    }

    async fn watch(
        &self,
        driver: &dyn Driver,
        handle: &JobHandle,
        markers: &CompletionMarkers,
        settings: RunSettings,
    ) -> Outcome {
        let started = Instant::now();
        loop {
            if let Some(outcome) = markers.outcome() {
                return outcome;
            }

            match driver.poll(handle).await {
                Ok(DriverStatus::Pending) => {
                    let status = if markers.started() { JobStatus::Running } else { JobStatus::Pending };
                    self.set_status(status);
                }
                Ok(DriverStatus::Running) => self.set_status(JobStatus::Running),
                Ok(DriverStatus::Succeeded) => {
                    // Markers decide when present; backend success is the fallback.
                    return markers
                        .wait_for_outcome(settings.marker_grace, settings.poll_interval)
                        .await
                        .unwrap_or_else(|| {
                            debug!(job = %self.name(), "no outcome marker, trusting backend success");
                            Outcome::Success
                        });
                }
                Ok(DriverStatus::Failed) => return markers.outcome().unwrap_or(Outcome::Failure),
                Err(e) => {
                    if self.kill_requested() {
                        return Outcome::Failure;
                    }
                    warn!(job = %self.name(), error = %e, "status poll failed");
                }
            }

            if let Some(limit) = settings.max_job_duration {
                if started.elapsed() >= limit {
                    warn!(job = %self.name(), ?limit, "job exceeded max duration, killing");
                    if let Err(e) = driver.kill(handle).await {
                        warn!(job = %self.name(), error = %e, "driver kill failed");
                    }
                    return markers.outcome().unwrap_or(Outcome::Failure);
                }
            }

            pause(settings.poll_interval).await;
        }
    }

    async fn settle(&self, outcome: Outcome, attempt: u32) -> JobStatus {
        match outcome {
            Outcome::Success => {
                self.invoke(self.on_done.as_ref(), attempt, "done").await;
                self.set_status(JobStatus::Done);
                info!(job = %self.name(), attempt, "job done");
                JobStatus::Done
            }
            Outcome::Failure if self.kill_requested() => self.settle_killed(),
            Outcome::Failure => {
                self.invoke(self.on_exit.as_ref(), attempt, "exit").await;
                let status = if attempt < self.max_submit {
                    JobStatus::Waiting
                } else {
                    JobStatus::Failed
                };
                self.set_status(status);
                if status == JobStatus::Waiting {
                    info!(job = %self.name(), attempt, max_submit = self.max_submit, "job failed, will retry");
                } else {
                    warn!(job = %self.name(), attempt, "job failed, retries exhausted");
                }
                status
            }
        }
    }

    fn settle_killed(&self) -> JobStatus {
        self.set_status(JobStatus::IsKilled);
        info!(job = %self.name(), "job killed");
        JobStatus::IsKilled
    }

    async fn invoke(&self, callback: Option<&Callback>, attempt: u32, kind: &'static str) {
        let Some(callback) = callback else {
            return;
        };
        let callback = Arc::clone(callback);
        let ctx = CallbackContext {
            job_name: self.descriptor.name.clone(),
            index: self.descriptor.index,
            run_path: self.descriptor.run_path.clone(),
            submit_attempt: attempt,
            arguments: self.arguments.clone(),
        };
        if let Err(e) = tokio::task::spawn_blocking(move || callback(&ctx)).await {
            error!(job = %self.name(), callback = kind, error = %e, "callback panicked");
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        f.debug_struct("Job")
            .field("name", &self.descriptor.name)
            .field("index", &self.descriptor.index)
            .field("status", &state.status)
            .field("submit_attempt", &state.submit_attempt)
            .field("max_submit", &self.max_submit)
            .finish()
    }
}
