use std::time::Instant;

use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::pacing::pause;
use crate::status::JobStatus;

use super::{JobQueueManager, QueueSummary};

impl JobQueueManager {
    /// Drive the queue until nothing is left to run or a user stop drains it.
    ///
    /// Never returns while an execution unit is alive: every spawned attempt
    /// is joined, so all jobs are terminal on return and no callback is still
    /// executing.
    pub async fn execute(&self) -> QueueSummary {
        let started = Instant::now();
        let driver = self.queue.driver();
        let mut units: JoinSet<JobStatus> = JoinSet::new();

        info!(
            jobs = self.queue.len(),
            max_running = self.queue.max_running(),
            max_submit = self.queue.max_submit(),
            driver = driver.name(),
            "job queue started"
        );

        while self.queue.is_running() {
            let launched = self.launch_waiting(&driver, &mut units);
            if launched > 0 {
                debug!(launched, running = self.num_running(), "launch burst");
            }

            pause(self.poll_interval).await;

            if let Some(limit) = self.max_runtime {
                if started.elapsed() >= limit && !self.queue.stopped_by_user() {
                    warn!(?limit, "max runtime exceeded, stopping queue");
                    self.queue.stop_by_user();
                }
            }

            if self.queue.stopped_by_user() {
                self.queue.kill_all_jobs().await;
            }

            while let Some(result) = units.try_join_next() {
                Self::record_unit(result);
            }
        }

        while let Some(result) = units.join_next().await {
            Self::record_unit(result);
        }

        let mut swept = 0;
        for job in self.queue.jobs() {
            if job.kill_if_waiting() {
                swept += 1;
            }
        }
        if swept > 0 {
            info!(jobs = swept, "waiting jobs marked killed after stop");
        }

        let summary = self.summary();
        info!(
            total = summary.total,
            success = summary.success,
            failed = summary.failed,
            killed = summary.killed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "job queue finished"
        );
        summary
    }

    fn record_unit(result: Result<JobStatus, JoinError>) {
        match result {
            Ok(status) => debug!(%status, "execution unit finished"),
            Err(e) => error!(error = %e, "execution unit panicked"),
        }
    }
}
