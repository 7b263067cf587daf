//! Job queue manager -- drives a [`JobQueue`](crate::JobQueue) to completion.
//!
//! Split into focused submodules:
//! - `core`: manager struct, constructor, query surface and stop/start
//! - `execution`: the control loop, final join and end-of-run sweep
//! - `scheduling`: launching waiting jobs under the concurrency bound

mod core;
mod execution;
mod scheduling;

pub use self::core::{JobQueueManager, QueueSummary};
