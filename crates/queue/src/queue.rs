//! Ordered collection of jobs sharing one driver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};
use std::time::Duration;

use tracing::{debug, info};

use simq_core::{LaunchBound, QueueConfig};

use crate::driver::{Driver, JobDescriptor};
use crate::error::QueueError;
use crate::job::{Job, JobSnapshot, JobSpec, RunSettings};
use crate::status::JobStatus;

/// Jobs of one batch run, in insertion order.
///
/// Indices returned by [`add_job`](Self::add_job) stay valid for the lifetime
/// of the queue; jobs are never removed.
pub struct JobQueue {
    driver: Arc<dyn Driver>,
    jobs: RwLock<Vec<Arc<Job>>>,
    max_running: usize,
    max_submit: u32,
    launch_bound: LaunchBound,
    status_file: String,
    ok_file: String,
    exit_file: String,
    settings: RwLock<RunSettings>,
    stopped_by_user: AtomicBool,
    submit_complete: AtomicBool,
}

impl JobQueue {
    /// Create a queue using the bounds and marker names from `config`.
    pub fn new(driver: Arc<dyn Driver>, config: &QueueConfig) -> Result<Self, QueueError> {
        config.validate()?;
        Ok(Self {
            driver,
            jobs: RwLock::new(Vec::new()),
            max_running: config.max_running,
            max_submit: config.max_submit,
            launch_bound: config.launch_bound,
            status_file: config.status_file.clone(),
            ok_file: config.ok_file.clone(),
            exit_file: config.exit_file.clone(),
            settings: RwLock::new(RunSettings {
                poll_interval: config.job_poll_interval(),
                marker_grace: config.marker_grace(),
                max_job_duration: config.max_job_duration(),
            }),
            stopped_by_user: AtomicBool::new(false),
            submit_complete: AtomicBool::new(false),
        })
    }

    fn jobs_read(&self) -> RwLockReadGuard<'_, Vec<Arc<Job>>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a job and return its stable index.
    ///
    /// The job's `max_submit` is resolved here: its own override, else the
    /// queue default.
    pub fn add_job(&self, spec: JobSpec) -> Result<usize, QueueError> {
        if self.is_submit_complete() {
            return Err(QueueError::SubmitClosed);
        }
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let index = jobs.len();
        let descriptor = JobDescriptor {
            name: spec.name.clone(),
            index,
            script: spec.script.clone(),
            run_path: spec.run_path.clone(),
            num_cpu: spec.num_cpu,
            status_file: self.status_file.clone(),
            ok_file: self.ok_file.clone(),
            exit_file: self.exit_file.clone(),
        };
        let max_submit = spec.max_submit.unwrap_or(self.max_submit);
        debug!(job = %spec.name, index, max_submit, "job added");
        jobs.push(Arc::new(Job::new(spec, descriptor, max_submit)));
        Ok(index)
    }

    /// Declare that no more jobs will be added.
    pub fn submit_complete(&self) {
        self.submit_complete.store(true, Ordering::SeqCst);
    }

    pub fn is_submit_complete(&self) -> bool {
        self.submit_complete.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.jobs_read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs_read().is_empty()
    }

    pub fn job(&self, index: usize) -> Result<Arc<Job>, QueueError> {
        self.jobs_read()
            .get(index)
            .cloned()
            .ok_or(QueueError::JobIndexOutOfRange(index))
    }

    /// Snapshot of the job list (cheap `Arc` clones).
    pub fn jobs(&self) -> Vec<Arc<Job>> {
        self.jobs_read().clone()
    }

    pub fn driver(&self) -> Arc<dyn Driver> {
        Arc::clone(&self.driver)
    }

    pub fn max_running(&self) -> usize {
        self.max_running
    }

    pub fn max_submit(&self) -> u32 {
        self.max_submit
    }

    pub fn launch_bound(&self) -> LaunchBound {
        self.launch_bound
    }

    pub fn status_file(&self) -> &str {
        &self.status_file
    }

    pub fn ok_file(&self) -> &str {
        &self.ok_file
    }

    pub fn exit_file(&self) -> &str {
        &self.exit_file
    }

    pub fn run_settings(&self) -> RunSettings {
        *self.settings.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wall-clock limit for each job attempt. Applies to attempts launched
    /// after the call.
    pub fn set_max_job_duration(&self, limit: Option<Duration>) {
        self.settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .max_job_duration = limit;
    }

    /// First WAITING job in queue order.
    pub fn fetch_next_waiting(&self) -> Option<Arc<Job>> {
        self.jobs_read()
            .iter()
            .find(|job| job.status() == JobStatus::Waiting)
            .cloned()
    }

    /// Jobs occupying a concurrency slot (SUBMITTED, PENDING or RUNNING).
    pub fn count_running(&self) -> usize {
        self.jobs_read()
            .iter()
            .filter(|job| job.status().occupies_slot())
            .count()
    }

    pub fn count_status(&self, status: JobStatus) -> usize {
        self.jobs_read()
            .iter()
            .filter(|job| job.status() == status)
            .count()
    }

    /// Whether the queue still has work in flight or work it may launch.
    pub fn is_running(&self) -> bool {
        let jobs = self.jobs_read();
        if jobs.iter().any(|job| job.status().occupies_slot()) {
            return true;
        }
        if self.stopped_by_user() {
            return false;
        }
        !self.is_submit_complete() || jobs.iter().any(|job| job.status() == JobStatus::Waiting)
    }

    pub fn stopped_by_user(&self) -> bool {
        self.stopped_by_user.load(Ordering::SeqCst)
    }

    /// Set the user-stop flag. Returns `true` the first time only.
    pub fn stop_by_user(&self) -> bool {
        let first = !self.stopped_by_user.swap(true, Ordering::SeqCst);
        if first {
            info!(jobs = self.len(), "job queue stopped by user");
        }
        first
    }

    /// Stop the queue and issue a kill to every job holding a slot.
    pub async fn kill_all_jobs(&self) {
        self.stop_by_user();
        for job in self.jobs() {
            job.stop(self.driver.as_ref()).await;
        }
    }

    /// Run one attempt of the job at `index` outside the manager loop.
    /// Refused once the queue is stopped, like manager launches.
    pub async fn run_job(&self, index: usize) -> Result<JobStatus, QueueError> {
        if self.stopped_by_user() {
            return Err(QueueError::Stopped);
        }
        let job = self.job(index)?;
        job.run(self.driver.as_ref(), self.run_settings()).await
    }

    pub fn snapshot(&self) -> Vec<JobSnapshot> {
        self.jobs_read().iter().map(|job| job.snapshot()).collect()
    }
}
