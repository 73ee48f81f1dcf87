//! Cleanup: retention enforcement.

use std::time::Duration;

use async_trait::async_trait;

use crate::app::context::EngineContext;
use crate::app::scheduler::ScheduledJob;
use crate::domain::EngineError;
use crate::ports::to_chrono;

/// Deletes notifications created before `now - retention`, whatever their
/// status. A row created exactly at the cutoff is kept.
pub struct Cleanup {
    ctx: EngineContext,
    retention: Duration,
    interval: Duration,
}

impl Cleanup {
    pub fn new(ctx: EngineContext, retention: Duration, interval: Duration) -> Self {
        Self {
            ctx,
            retention,
            interval,
        }
    }

    pub async fn run_once(&self) -> Result<u64, EngineError> {
        let cutoff = self.ctx.clock.now() - to_chrono(self.retention);
        let deleted = self.ctx.store.delete_older_than(cutoff).await?;
        tracing::info!(%cutoff, deleted, "cleaned up old notifications");
        Ok(deleted)
    }
}

#[async_trait]
impl ScheduledJob for Cleanup {
    fn name(&self) -> &'static str {
        "cleanup"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self) -> Result<u64, EngineError> {
        self.run_once().await
    }
}
