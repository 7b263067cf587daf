//! Execution backend contract and concrete drivers.

mod cluster;
mod local;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use simq_core::{DriverKind, QueueConfig};

use crate::error::DriverError;

pub use cluster::{ClusterDriver, ClusterKind};
pub use local::LocalDriver;

/// Everything a backend needs to start one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub name: String,
    /// Stable position in the owning queue.
    pub index: usize,
    pub script: PathBuf,
    pub run_path: PathBuf,
    /// CPU units requested.
    pub num_cpu: u32,
    pub status_file: String,
    pub ok_file: String,
    pub exit_file: String,
}

/// Backend-issued identifier for one submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: String,
}

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Backend view of a submission. Advisory: the marker files decide outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Trait for execution backends.
///
/// Implementations never touch job state; they only report what the backend
/// says. `kill` must be idempotent and must not fail for jobs that already
/// finished.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Hand a job to the backend.
    async fn submit(&self, job: &JobDescriptor) -> Result<JobHandle, DriverError>;

    /// Query the backend for the state of a submission.
    async fn poll(&self, handle: &JobHandle) -> Result<DriverStatus, DriverError>;

    /// Best-effort termination.
    async fn kill(&self, handle: &JobHandle) -> Result<(), DriverError>;

    /// Forget a finished submission.
    async fn release(&self, _handle: &JobHandle) {}
}

/// Build the driver selected by the config.
pub fn build_driver(config: &QueueConfig) -> Arc<dyn Driver> {
    let cluster = match config.driver {
        DriverKind::Local => return Arc::new(LocalDriver::new()),
        DriverKind::Lsf => ClusterKind::Lsf,
        DriverKind::Slurm => ClusterKind::Slurm,
        DriverKind::Torque => ClusterKind::Torque,
    };
    let mut driver = ClusterDriver::new(cluster);
    if let Some(queue) = &config.queue_name {
        driver = driver.with_queue_name(queue.clone());
    }
    Arc::new(driver)
}
