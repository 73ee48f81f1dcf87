//! Worker pool: dequeue -> process -> ack.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::app::controller::RetryController;
use crate::domain::ErrorKind;
use crate::ports::DispatchQueue;

/// Pause after a failed dequeue before asking the queue again.
const QUEUE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Worker group handle.
/// - `request_shutdown` stops every worker from taking new jobs
/// - `shutdown_and_join` also waits for the job each worker is on
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    pub fn spawn(n: usize, queue: Arc<dyn DispatchQueue>, controller: Arc<RetryController>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let joins = (0..n)
            .map(|worker_id| {
                let queue = Arc::clone(&queue);
                let controller = Arc::clone(&controller);
                let mut rx = shutdown_rx.clone();
                tokio::spawn(async move {
                    worker_loop(worker_id, queue, controller, &mut rx).await;
                })
            })
            .collect();

        Self { shutdown_tx, joins }
    }

    /// In-flight attempts are not interrupted.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                tracing::error!(error = %e, "worker task panicked");
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<dyn DispatchQueue>,
    controller: Arc<RetryController>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    tracing::debug!(worker_id, "worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let job = tokio::select! {
            // Err: the group handle was dropped without a shutdown.
            changed = shutdown_rx.changed() => match changed {
                Ok(()) => continue,
                Err(_) => break,
            },
            job = queue.dequeue() => job,
        };

        let job = match job {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(worker_id, error = %e, "dequeue failed");
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(QUEUE_ERROR_BACKOFF) => {},
                }
                continue;
            }
        };

        match controller.process(&job).await {
            Ok(outcome) => {
                tracing::debug!(worker_id, job_id = %job.id, outcome = outcome.label(), "job processed");
                if let Err(e) = queue.ack(job.id).await {
                    tracing::error!(worker_id, job_id = %job.id, error = %e, "ack failed");
                }
            }
            Err(e) if e.kind() == ErrorKind::Permanent => {
                // Redelivery would fail the same way.
                tracing::error!(worker_id, job_id = %job.id, error = %e, "job failed permanently, dropping");
                if let Err(e) = queue.ack(job.id).await {
                    tracing::error!(worker_id, job_id = %job.id, error = %e, "ack failed");
                }
            }
            Err(e) => {
                tracing::warn!(
                    worker_id,
                    job_id = %job.id,
                    notification_id = %job.notification_id,
                    error = %e,
                    "outcome not recorded, leaving job for redelivery"
                );
            }
        }
    }
    tracing::debug!(worker_id, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::orchestrator::SubmitRequest;
    use crate::config::EngineConfig;
    use crate::domain::{Channel, NotificationStatus};
    use crate::impls::Step;
    use crate::ports::NotificationStore;
    use crate::test_support::{Harness, ts};

    async fn wait_for_status(h: &Harness, id: crate::domain::NotificationId, status: NotificationStatus) {
        for _ in 0..200 {
            if h.store.get(id).await.ok().flatten().map(|n| n.status) == Some(status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("notification never reached {status}");
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            poll_interval: Duration::from_millis(20),
            visibility_timeout: Duration::from_secs(30),
            ..EngineConfig::default()
        }
    }

    #[tokio::test]
    async fn workers_deliver_and_ack() {
        let h = Harness::build(fast_config(), vec![]);
        let group = WorkerGroup::spawn(2, h.queue.clone(), h.controller.clone());
        let user = h.user().await;
        let receipt = h
            .dispatcher
            .submit(SubmitRequest::new(user, [Channel::Email, Channel::InApp], "s", "b"))
            .await
            .unwrap();

        for created in &receipt.created {
            wait_for_status(&h, created.id, NotificationStatus::Delivered).await;
        }
        group.shutdown_and_join().await;
        assert_eq!(h.queue.counts().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn store_outage_leaves_job_unacked_until_lease_expires() {
        let h = Harness::build(fast_config(), vec![]);
        let user = h.user().await;
        let receipt = h
            .dispatcher
            .submit(SubmitRequest::new(user, [Channel::Email], "s", "b"))
            .await
            .unwrap();
        let id = receipt.primary().unwrap().id;

        h.store.set_available(false);
        let group = WorkerGroup::spawn(1, h.queue.clone(), h.controller.clone());
        for _ in 0..100 {
            if h.queue.counts().await.unwrap().in_flight == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.queue.counts().await.unwrap().in_flight, 1);
        assert_eq!(h.email.call_count().await, 0);

        // Store recovers and the lease runs out: the job is redelivered.
        h.store.set_available(true);
        h.clock.set(ts(31));
        wait_for_status(&h, id, NotificationStatus::Delivered).await;
        group.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn one_exhausted_notification_does_not_affect_others() {
        let config = EngineConfig {
            policies: {
                let mut p = fast_config().policies;
                p.sms.max_retries = 1;
                p
            },
            ..fast_config()
        };
        let h = Harness::build(config, vec![(Channel::Sms, vec![Step::Fail])]);
        let group = WorkerGroup::spawn(2, h.queue.clone(), h.controller.clone());
        let user = h.user().await;
        let receipt = h
            .dispatcher
            .submit(SubmitRequest::new(user, [Channel::Sms, Channel::Email], "s", "b"))
            .await
            .unwrap();

        wait_for_status(&h, receipt.created[0].id, NotificationStatus::Failed).await;
        wait_for_status(&h, receipt.created[1].id, NotificationStatus::Delivered).await;
        group.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn dropped_group_lets_workers_exit() {
        let h = Harness::build(fast_config(), vec![]);
        let group = WorkerGroup::spawn(1, h.queue.clone(), h.controller.clone());
        let WorkerGroup { shutdown_tx, joins } = group;
        drop(shutdown_tx);
        for join in joins {
            tokio::time::timeout(Duration::from_secs(1), join)
                .await
                .expect("worker kept running after its group was dropped")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn shutdown_stops_idle_workers() {
        let h = Harness::build(fast_config(), vec![]);
        let group = WorkerGroup::spawn(3, h.queue.clone(), h.controller.clone());
        tokio::time::timeout(Duration::from_secs(1), group.shutdown_and_join())
            .await
            .unwrap();
    }
}
