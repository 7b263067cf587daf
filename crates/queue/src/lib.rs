//! Job queue scheduler for batches of external forward-model runs.
//!
//! A [`JobQueue`] owns an ordered list of [`Job`]s that share one
//! [`Driver`]. The [`JobQueueManager`] drives the queue to completion under a
//! concurrency bound, while each job retries failed attempts on its own and
//! detects its outcome from marker files in its run directory.

pub mod driver;
pub mod error;
pub mod job;
pub mod manager;
pub mod markers;
pub mod queue;
pub mod status;

mod pacing;

pub use driver::{
    build_driver, ClusterDriver, ClusterKind, Driver, DriverStatus, JobDescriptor, JobHandle,
    LocalDriver,
};
pub use error::{DriverError, QueueError};
pub use job::{Callback, CallbackContext, Claim, Job, JobSnapshot, JobSpec, RunSettings};
pub use manager::{JobQueueManager, QueueSummary};
pub use markers::{CompletionMarkers, Outcome};
pub use queue::JobQueue;
pub use status::JobStatus;
