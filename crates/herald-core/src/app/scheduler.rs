//! Periodic job runner.
//!
//! Each job runs on its own interval loop. The first run happens one full
//! period after start; ticks missed while a run is still going are skipped,
//! so a slow run never triggers a burst of catch-up runs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::domain::EngineError;

#[async_trait]
pub trait ScheduledJob: Send + Sync {
    fn name(&self) -> &'static str;

    fn interval(&self) -> Duration;

    /// One run. Returns how many items it handled, for logging.
    async fn run(&self) -> Result<u64, EngineError>;
}

/// One tokio task per job, all stopped by the same watch channel.
pub struct TaskScheduler {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl TaskScheduler {
    pub fn spawn(jobs: Vec<Arc<dyn ScheduledJob>>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut joins = Vec::with_capacity(jobs.len());
        for job in jobs {
            if job.interval().is_zero() {
                tracing::warn!(job = job.name(), "zero interval, job not scheduled");
                continue;
            }
            let rx = shutdown_rx.clone();
            joins.push(tokio::spawn(run_periodically(job, rx)));
        }
        Self { shutdown_tx, joins }
    }

    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// A run already in progress finishes first.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                tracing::error!(error = %e, "scheduled job panicked");
            }
        }
    }
}

async fn run_periodically(job: Arc<dyn ScheduledJob>, mut shutdown_rx: watch::Receiver<bool>) {
    let period = job.interval();
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::info!(job = job.name(), period_secs = period.as_secs(), "scheduled job registered");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        tokio::select! {
            // Err: the scheduler handle was dropped without a shutdown.
            changed = shutdown_rx.changed() => match changed {
                Ok(()) => continue,
                Err(_) => break,
            },
            _ = interval.tick() => {
                let started = Instant::now();
                match job.run().await {
                    Ok(count) => tracing::info!(
                        job = job.name(),
                        count,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "scheduled job finished"
                    ),
                    Err(e) => tracing::error!(job = job.name(), error = %e, "scheduled job failed"),
                }
            }
        }
    }
    tracing::debug!(job = job.name(), "scheduled job stopped");
}
