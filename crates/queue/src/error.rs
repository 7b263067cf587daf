//! Queue error types.

use thiserror::Error;

use simq_core::ConfigError;

use crate::status::JobStatus;

/// Errors reported by an execution backend.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The backend refused the job. Counts as a failed attempt.
    #[error("submission rejected: {0}")]
    Submission(String),

    #[error("status query failed: {0}")]
    Poll(String),

    #[error("unknown job handle: {0}")]
    UnknownHandle(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job submission is closed for this queue")]
    SubmitClosed,

    #[error("job queue was stopped by the user")]
    Stopped,

    #[error("job index {0} out of range")]
    JobIndexOutOfRange(usize),

    #[error("cannot {op} a job in state {from}")]
    IllegalTransition { from: JobStatus, op: &'static str },

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}
