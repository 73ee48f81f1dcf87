//! Reconciler: re-enqueue pending notifications that lost their job.
//!
//! A row can be Queued or Sending with nothing in the queue when the process
//! dies between the store commit and the enqueue, or when an enqueue fails.
//! Rows touched within the grace period are left alone so in-progress
//! submissions are not raced.

use std::time::Duration;

use async_trait::async_trait;

use crate::app::context::EngineContext;
use crate::app::scheduler::ScheduledJob;
use crate::domain::EngineError;
use crate::ports::to_chrono;

pub struct Reconciler {
    ctx: EngineContext,
    grace: Duration,
    interval: Duration,
}

impl Reconciler {
    pub fn new(ctx: EngineContext, grace: Duration, interval: Duration) -> Self {
        Self {
            ctx,
            grace,
            interval,
        }
    }

    /// Returns the number of jobs re-enqueued.
    pub async fn run_once(&self) -> Result<u64, EngineError> {
        let cutoff = self.ctx.clock.now() - to_chrono(self.grace);
        let mut repaired = 0;
        for row in self.ctx.store.list_pending(cutoff).await? {
            if self.ctx.queue.contains(&row.job_key()).await? {
                continue;
            }
            let Some(job) = row.current_job() else {
                continue;
            };
            tracing::warn!(
                notification_id = %row.id,
                channel = %row.channel,
                status = %row.status,
                job_id = %job.id,
                "pending notification had no job, re-enqueueing"
            );
            self.ctx.queue.enqueue(job).await?;
            repaired += 1;
        }
        Ok(repaired)
    }
}

#[async_trait]
impl ScheduledJob for Reconciler {
    fn name(&self) -> &'static str {
        "reconciler"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self) -> Result<u64, EngineError> {
        self.run_once().await
    }
}
