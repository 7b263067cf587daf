use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::info;

use simq_core::QueueConfig;

use crate::error::QueueError;
use crate::queue::JobQueue;
use crate::status::JobStatus;

/// Final tally returned by [`JobQueueManager::execute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub killed: usize,
}

impl QueueSummary {
    pub fn all_succeeded(&self) -> bool {
        self.success == self.total
    }
}

/// The scheduling loop for one queue. Counts and per-job queries can be read
/// from any task while [`execute`](Self::execute) runs.
pub struct JobQueueManager {
    pub(super) queue: Arc<JobQueue>,
    /// Pause between launch bursts. Zero yields instead of sleeping.
    pub(super) poll_interval: Duration,
    /// Whole-run deadline; exceeding it stops the queue.
    pub(super) max_runtime: Option<Duration>,
}

impl JobQueueManager {
    pub fn new(queue: Arc<JobQueue>) -> Self {
        Self {
            queue,
            poll_interval: Duration::from_secs(1),
            max_runtime: None,
        }
    }

    /// Manager with the loop interval and deadline taken from `config`.
    pub fn from_config(queue: Arc<JobQueue>, config: &QueueConfig) -> Self {
        Self::new(queue)
            .with_poll_interval(config.poll_interval())
            .with_max_runtime(config.max_runtime())
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_runtime(mut self, limit: Option<Duration>) -> Self {
        self.max_runtime = limit;
        self
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn max_running(&self) -> usize {
        self.queue.max_running()
    }

    pub fn max_submit(&self) -> u32 {
        self.queue.max_submit()
    }

    pub fn is_running(&self) -> bool {
        self.queue.is_running()
    }

    pub fn num_waiting(&self) -> usize {
        self.queue.count_status(JobStatus::Waiting)
    }

    pub fn num_pending(&self) -> usize {
        self.queue.count_status(JobStatus::Pending)
    }

    /// Jobs holding a slot: SUBMITTED, PENDING or RUNNING.
    pub fn num_running(&self) -> usize {
        self.queue.count_running()
    }

    pub fn num_success(&self) -> usize {
        self.queue.count_status(JobStatus::Done)
    }

    pub fn num_failed(&self) -> usize {
        self.queue.count_status(JobStatus::Failed)
    }

    pub fn num_killed(&self) -> usize {
        self.queue.count_status(JobStatus::IsKilled)
    }

    pub fn job_status(&self, index: usize) -> Result<JobStatus, QueueError> {
        Ok(self.queue.job(index)?.status())
    }

    /// Neither holding a slot nor waiting to launch.
    pub fn is_job_complete(&self, index: usize) -> Result<bool, QueueError> {
        let status = self.job_status(index)?;
        Ok(!status.occupies_slot() && status != JobStatus::Waiting)
    }

    pub fn is_job_running(&self, index: usize) -> Result<bool, QueueError> {
        Ok(self.job_status(index)? == JobStatus::Running)
    }

    pub fn is_job_waiting(&self, index: usize) -> Result<bool, QueueError> {
        Ok(self.job_status(index)? == JobStatus::Waiting)
    }

    pub fn did_job_fail(&self, index: usize) -> Result<bool, QueueError> {
        Ok(self.job_status(index)? == JobStatus::Failed)
    }

    pub fn did_job_succeed(&self, index: usize) -> Result<bool, QueueError> {
        Ok(self.job_status(index)? == JobStatus::Done)
    }

    /// Request cancellation. Prevents new launches; the loop kills jobs
    /// holding a slot on its next pass.
    pub fn stop(&self) {
        self.queue.stop_by_user();
    }

    /// Stop the queue and issue kills right away instead of waiting for the
    /// control loop.
    pub async fn stop_queue(&self) {
        self.queue.kill_all_jobs().await;
    }

    /// Run [`execute`](Self::execute) on a background task.
    pub fn start(self: &Arc<Self>) -> JoinHandle<QueueSummary> {
        let manager = Arc::clone(self);
        info!(jobs = manager.queue.len(), "starting job queue manager");
        tokio::spawn(async move { manager.execute().await })
    }

    pub fn summary(&self) -> QueueSummary {
        QueueSummary {
            total: self.queue.len(),
            success: self.num_success(),
            failed: self.num_failed(),
            killed: self.num_killed(),
        }
    }
}

impl fmt::Display for JobQueueManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "JobQueueManager(waiting={}, running={}, success={}, failed={}, {})",
            self.num_waiting(),
            self.num_running(),
            self.num_success(),
            self.num_failed(),
            if self.is_running() { "running" } else { "not running" }
        )
    }
}
