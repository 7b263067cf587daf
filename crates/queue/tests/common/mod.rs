#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use simq_core::QueueConfig;
use simq_queue::{
    Driver, DriverError, DriverStatus, JobDescriptor, JobHandle, JobQueue, JobQueueManager, JobSpec, QueueSummary,
};

struct MockRun {
    job: JobDescriptor,
    polls: u32,
    succeed: bool,
    killed: bool,
}

/// In-process backend that plays the job side of the marker protocol.
///
/// Each submission reports PENDING once, RUNNING for `polls_to_finish`
/// polls, then writes the ok or exit marker and reports the matching status.
pub struct MockDriver {
    polls_to_finish: u32,
    /// Attempts that fail before one succeeds; `u32::MAX` never succeeds.
    failures_before_success: u32,
    runs: Mutex<HashMap<String, MockRun>>,
    attempts: Mutex<HashMap<String, u32>>,
    active: AtomicUsize,
    peak: AtomicUsize,
    submits: AtomicUsize,
    kills: AtomicUsize,
}

impl MockDriver {
    pub fn succeeding() -> Self {
        Self::new(0)
    }

    pub fn failing() -> Self {
        Self::new(u32::MAX)
    }

    pub fn new(failures_before_success: u32) -> Self {
        Self {
            polls_to_finish: 3,
            failures_before_success,
            runs: Mutex::new(HashMap::new()),
            attempts: Mutex::new(HashMap::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            submits: AtomicUsize::new(0),
            kills: AtomicUsize::new(0),
        }
    }

    pub fn with_polls_to_finish(mut self, polls: u32) -> Self {
        self.polls_to_finish = polls;
        self
    }

    /// Highest number of submissions alive at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Driver for MockDriver {
    fn name(&self) -> &str {
        "mock"
    }

    async fn submit(&self, job: &JobDescriptor) -> Result<JobHandle, DriverError> {
        let n = self.submits.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);

        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let count = attempts.entry(job.name.clone()).or_insert(0);
            *count += 1;
            *count
        };
        let handle = JobHandle::new(format!("mock-{}", n));
        self.runs.lock().unwrap().insert(
            handle.id.clone(),
            MockRun {
                job: job.clone(),
                polls: 0,
                succeed: attempt > self.failures_before_success,
                killed: false,
            },
        );
        Ok(handle)
    }

    async fn poll(&self, handle: &JobHandle) -> Result<DriverStatus, DriverError> {
        let mut runs = self.runs.lock().unwrap();
        let run = runs
            .get_mut(&handle.id)
            .ok_or_else(|| DriverError::UnknownHandle(handle.id.clone()))?;
        if run.killed {
            return Ok(DriverStatus::Failed);
        }
        run.polls += 1;
        if run.polls == 1 {
            return Ok(DriverStatus::Pending);
        }
        if run.polls <= self.polls_to_finish {
            std::fs::write(run.job.run_path.join(&run.job.status_file), "running").map_err(DriverError::Io)?;
            return Ok(DriverStatus::Running);
        }
        let (marker, status) = if run.succeed {
            (&run.job.ok_file, DriverStatus::Succeeded)
        } else {
            (&run.job.exit_file, DriverStatus::Failed)
        };
        std::fs::write(run.job.run_path.join(marker), "done").map_err(DriverError::Io)?;
        Ok(status)
    }

    async fn kill(&self, handle: &JobHandle) -> Result<(), DriverError> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        if let Some(run) = self.runs.lock().unwrap().get_mut(&handle.id) {
            run.killed = true;
        }
        Ok(())
    }

    async fn release(&self, handle: &JobHandle) {
        if self.runs.lock().unwrap().remove(&handle.id).is_some() {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

pub fn config(max_running: usize, max_submit: u32) -> QueueConfig {
    QueueConfig {
        max_running,
        max_submit,
        poll_interval_ms: 0,
        job_poll_interval_ms: 0,
        ..QueueConfig::default()
    }
}

/// Queue with `n` jobs, each in its own existing run directory under `root`.
pub fn queue_with_jobs(
    driver: Arc<dyn Driver>,
    config: &QueueConfig,
    root: &std::path::Path,
    n: usize,
    customize: impl Fn(JobSpec) -> JobSpec,
) -> Arc<JobQueue> {
    let queue = JobQueue::new(driver, config).unwrap();
    for i in 0..n {
        let run_path = root.join(format!("realization-{}", i));
        std::fs::create_dir_all(&run_path).unwrap();
        let spec = JobSpec::new(format!("job_{}", i), "job.sh", run_path)
            .with_arguments(serde_json::json!({ "realization": i }));
        queue.add_job(customize(spec)).unwrap();
    }
    queue.submit_complete();
    Arc::new(queue)
}

pub fn manager(queue: Arc<JobQueue>) -> JobQueueManager {
    JobQueueManager::new(queue).with_poll_interval(Duration::ZERO)
}

/// Run the manager to completion while sampling how many jobs hold a slot
/// (SUBMITTED, PENDING or RUNNING). Returns the summary and the highest
/// count observed.
pub async fn execute_tracking_slots(manager: Arc<JobQueueManager>) -> (QueueSummary, usize) {
    let queue = Arc::clone(manager.queue());
    let handle = manager.start();
    let mut peak = 0;
    while !handle.is_finished() {
        peak = peak.max(queue.count_running());
        tokio::task::yield_now().await;
    }
    (handle.await.unwrap(), peak)
}
