//! Dispatch queue port.
//!
//! Carries ephemeral dispatch jobs between the orchestrator and the worker
//! pool. Delivery is at-least-once: a dequeued job stays leased until
//! acknowledged and becomes visible again once its lease runs out.

use async_trait::async_trait;

use crate::domain::{DispatchJob, JobId, JobKey, Priority, QueueError};
use crate::observability::QueueCounts;

/// Priority lane. Lanes are always polled in `Lane::ORDER`.
///
/// Medium notifications go to `Default`; the other priorities map one to
/// one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    High,
    Default,
    Low,
}

impl Lane {
    pub const ORDER: [Lane; 3] = [Lane::High, Lane::Default, Lane::Low];

    pub fn for_priority(priority: Priority) -> Self {
        match priority {
            Priority::High => Lane::High,
            Priority::Medium => Lane::Default,
            Priority::Low => Lane::Low,
        }
    }

    /// Position in `Lane::ORDER`.
    pub fn index(self) -> usize {
        match self {
            Lane::High => 0,
            Lane::Default => 1,
            Lane::Low => 2,
        }
    }

    /// Label used in queue log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Lane::High => "high",
            Lane::Default => "default",
            Lane::Low => "low",
        }
    }
}

/// Lease-based job queue.
///
/// # Flow
/// 1. `enqueue` parks the job in its lane until `not_before`
/// 2. `dequeue` leases the head of the first non-empty lane
/// 3. `ack` drops it for good; an expired lease puts it back
#[async_trait]
pub trait DispatchQueue: Send + Sync {
    /// Add a job to its priority lane. Enqueueing a job id that is already
    /// pending or leased is a no-op.
    async fn enqueue(&self, job: DispatchJob) -> Result<(), QueueError>;

    /// Lease the next visible job without waiting.
    async fn try_dequeue(&self) -> Result<Option<DispatchJob>, QueueError>;

    /// Lease the next visible job, suspending until one exists.
    async fn dequeue(&self) -> Result<DispatchJob, QueueError>;

    /// Finish a leased job. Returns `false` if the job was unknown.
    async fn ack(&self, job_id: JobId) -> Result<bool, QueueError>;

    /// Drop pending jobs for `key`. Advisory: leased jobs are left alone.
    async fn remove(&self, key: &JobKey) -> Result<usize, QueueError>;

    /// Whether any pending or leased job exists for `key`.
    async fn contains(&self, key: &JobKey) -> Result<bool, QueueError>;

    /// Ready jobs per lane plus delayed and in-flight totals.
    async fn counts(&self) -> Result<QueueCounts, QueueError>;
}
