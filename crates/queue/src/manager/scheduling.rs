use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::driver::Driver;
use crate::job::Claim;
use crate::status::JobStatus;

use super::JobQueueManager;

impl JobQueueManager {
    /// Launch waiting jobs in queue order until the slot guard refuses or
    /// nothing is waiting. Returns the number of attempts spawned.
    pub(super) fn launch_waiting(&self, driver: &Arc<dyn Driver>, units: &mut JoinSet<JobStatus>) -> usize {
        let settings = self.queue.run_settings();
        let bound = self.queue.launch_bound();
        let max_running = self.queue.max_running();
        let mut launched = 0;

        loop {
            if self.queue.stopped_by_user() {
                break;
            }
            let Some(job) = self.queue.fetch_next_waiting() else {
                break;
            };
            if !bound.permits(self.queue.count_running(), max_running) {
                break;
            }

            match job.claim() {
                Ok(Claim::Attempt(attempt)) => {
                    debug!(job = %job.name(), attempt, "launching job");
                    let driver = Arc::clone(driver);
                    units.spawn(async move { job.drive_attempt(driver.as_ref(), settings, attempt).await });
                    launched += 1;
                }
                Ok(Claim::Exhausted) => {
                    warn!(job = %job.name(), "submit attempts exhausted before launch");
                }
                Err(e) => {
                    // Only the manager claims, so this means state was changed
                    // behind its back. Leave the job for the next pass.
                    warn!(job = %job.name(), error = %e, "could not claim job");
                    break;
                }
            }
        }

        launched
    }
}
