use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a queued job.
///
/// `Waiting -> Submitted -> Pending/Running -> Done | Failed | IsKilled`, with
/// a failed attempt looping back to `Waiting` while retries remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Eligible for launch.
    Waiting,
    /// Handed to the driver, not yet confirmed.
    Submitted,
    /// Accepted by a remote scheduler but not executing.
    Pending,
    Running,
    /// Terminal success.
    Done,
    /// Terminal failure, retries exhausted.
    Failed,
    /// Terminal cancellation. Never reported as a failure.
    IsKilled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Waiting,
        JobStatus::Submitted,
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Done,
        JobStatus::Failed,
        JobStatus::IsKilled,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed | JobStatus::IsKilled)
    }

    /// Whether a job in this state holds one of the `max_running` slots.
    pub fn occupies_slot(self) -> bool {
        matches!(self, JobStatus::Submitted | JobStatus::Pending | JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Waiting => "WAITING",
            JobStatus::Submitted => "SUBMITTED",
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Done => "DONE",
            JobStatus::Failed => "FAILED",
            JobStatus::IsKilled => "IS_KILLED",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        let terminal: Vec<_> = JobStatus::ALL.iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(terminal, vec![&JobStatus::Done, &JobStatus::Failed, &JobStatus::IsKilled]);
    }

    #[test]
    fn slot_states() {
        assert!(JobStatus::Submitted.occupies_slot());
        assert!(JobStatus::Pending.occupies_slot());
        assert!(JobStatus::Running.occupies_slot());
        assert!(!JobStatus::Waiting.occupies_slot());
        assert!(!JobStatus::Done.occupies_slot());
    }

    #[test]
    fn display_and_serde_agree() {
        for status in JobStatus::ALL {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status));
        }
    }
}
