//! Retry controller: one delivery attempt per dispatch job.
//!
//! Every job goes through the same steps:
//! 1. load the row and skip it if it is terminal or the job is stale
//! 2. check the delivery precondition; failing it is permanent
//! 3. commit Sending
//! 4. call the sender under the send timeout
//! 5. commit the outcome (status, retry count, next task ref) in one write
//! 6. enqueue the follow-up job if the row was re-queued
//!
//! Step 5 is a compare-and-swap against the row, so a cancel that lands while
//! the sender is running wins and the attempt is discarded.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::app::context::EngineContext;
use crate::app::registry::SenderRegistry;
use crate::domain::{
    ChannelPolicies, DispatchJob, EngineError, FailureCause, JobId, Notification,
    NotificationStatus, PreconditionFailure, ProcessOutcome, RetryDecider, RetryDecision,
    SkipReason,
};
use crate::ports::{ChannelSender, OutboundMessage, modify_notification, to_chrono};

/// Runs attempts for the worker pool. Shared by every worker through an `Arc`.
pub struct RetryController {
    ctx: EngineContext,
    senders: SenderRegistry,
    policies: ChannelPolicies,
    decider: RetryDecider,
    send_timeout: Duration,
}

/// What the final write decided.
enum Committed {
    Delivered,
    Requeued {
        job_id: JobId,
        retry_count: u32,
        not_before: DateTime<Utc>,
    },
    Failed(FailureCause),
    Skipped(SkipReason),
}

/// Why a row must not be touched by this job, if any.
fn guard(row: &Notification, job: &DispatchJob) -> Option<SkipReason> {
    if row.status.is_terminal() {
        Some(SkipReason::AlreadyTerminal(row.status))
    } else if row.task_ref != Some(job.id) {
        Some(SkipReason::StaleJob)
    } else {
        None
    }
}

/// After Sending was committed, a terminal row means someone cancelled it.
fn in_flight_guard(row: &Notification, job: &DispatchJob) -> Option<SkipReason> {
    match guard(row, job) {
        Some(SkipReason::AlreadyTerminal(_)) => Some(SkipReason::CancelledInFlight),
        other => other,
    }
}

impl RetryController {
    pub fn new(
        ctx: EngineContext,
        senders: SenderRegistry,
        policies: ChannelPolicies,
        send_timeout: Duration,
    ) -> Self {
        Self {
            ctx,
            senders,
            policies,
            decider: RetryDecider,
            send_timeout,
        }
    }

    /// Process one job. `Err` means the outcome could not be recorded (store
    /// or queue trouble); the caller must leave the job unacknowledged.
    pub async fn process(&self, job: &DispatchJob) -> Result<ProcessOutcome, EngineError> {
        let store = self.ctx.store.as_ref();

        let Some(row) = store.get(job.notification_id).await? else {
            tracing::debug!(job_id = %job.id, notification_id = %job.notification_id, "notification gone, skipping");
            return Ok(ProcessOutcome::Skipped { reason: SkipReason::Missing });
        };
        if let Some(reason) = guard(&row, job) {
            tracing::debug!(job_id = %job.id, notification_id = %row.id, ?reason, "skipping job");
            return Ok(ProcessOutcome::Skipped { reason });
        }

        let (recipient, sender) = match self.resolve(&row).await? {
            Ok(found) => found,
            Err(failure) => return self.fail_precondition(job, failure).await,
        };

        // Sending. A redelivered job may find the row already Sending.
        let now = self.ctx.clock.now();
        let claimed = modify_notification(store, row.id, |n| {
            if let Some(reason) = guard(n, job) {
                return Ok(Some(reason));
            }
            if n.status == NotificationStatus::Queued {
                n.mark_sending(now)?;
            }
            Ok(None)
        })
        .await?;
        let row = match claimed {
            None => return Ok(ProcessOutcome::Skipped { reason: SkipReason::Missing }),
            Some((_, Some(reason))) => return Ok(ProcessOutcome::Skipped { reason }),
            Some((row, None)) => row,
        };
        tracing::info!(
            notification_id = %row.id,
            channel = %row.channel,
            job_id = %job.id,
            retry_count = row.retry_count,
            "sending"
        );

        let message = OutboundMessage {
            notification_id: row.id,
            user_id: row.user_id,
            channel: row.channel,
            recipient,
            subject: row.subject.clone(),
            body: row.body.clone(),
        };
        let committed = match self.attempt(sender.as_ref(), &message).await {
            Ok(()) => self.commit_success(job).await?,
            Err(e) => {
                tracing::warn!(
                    notification_id = %message.notification_id,
                    channel = %message.channel,
                    error = %e,
                    "attempt failed"
                );
                self.commit_failure(job).await?
            }
        };
        self.finish(&row, job, committed).await
    }

    /// Look up recipient and sender. The outer `Result` carries store errors,
    /// the inner one a permanent precondition failure.
    async fn resolve(
        &self,
        row: &Notification,
    ) -> Result<Result<(String, Arc<dyn ChannelSender>), PreconditionFailure>, EngineError> {
        let Some(user) = self.ctx.store.get_user(row.user_id).await? else {
            return Ok(Err(PreconditionFailure::UnknownUser(row.user_id)));
        };
        let recipient = match user.recipient_for(row.channel) {
            Ok(r) => r,
            Err(failure) => return Ok(Err(failure)),
        };
        match self.senders.get(row.channel) {
            Some(sender) => Ok(Ok((recipient, sender))),
            None => Ok(Err(PreconditionFailure::NoSender(row.channel))),
        }
    }

    async fn fail_precondition(
        &self,
        job: &DispatchJob,
        failure: PreconditionFailure,
    ) -> Result<ProcessOutcome, EngineError> {
        let now = self.ctx.clock.now();
        let written = modify_notification(self.ctx.store.as_ref(), job.notification_id, |n| {
            if let Some(reason) = guard(n, job) {
                return Ok(Some(reason));
            }
            n.mark_failed(now)?;
            Ok(None)
        })
        .await?;
        match written {
            None => Ok(ProcessOutcome::Skipped { reason: SkipReason::Missing }),
            Some((_, Some(reason))) => Ok(ProcessOutcome::Skipped { reason }),
            Some((row, None)) => {
                tracing::warn!(
                    notification_id = %row.id,
                    channel = %row.channel,
                    error = %failure,
                    "precondition failed, not retrying"
                );
                Ok(ProcessOutcome::Failed {
                    cause: FailureCause::from(failure),
                })
            }
        }
    }

    /// One sender call. A `false` from the sender, a sender error and a
    /// timeout all come back as `TransientSend` and feed the backoff path.
    async fn attempt(&self, sender: &dyn ChannelSender, message: &OutboundMessage) -> Result<(), EngineError> {
        match tokio::time::timeout(self.send_timeout, sender.send(message)).await {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(EngineError::TransientSend("sender reported failure".into())),
            Ok(Err(e)) => Err(EngineError::TransientSend(e.to_string())),
            Err(_) => Err(EngineError::TransientSend(format!(
                "timed out after {}s",
                self.send_timeout.as_secs_f64()
            ))),
        }
    }

    async fn commit_success(&self, job: &DispatchJob) -> Result<Committed, EngineError> {
        let now = self.ctx.clock.now();
        let written = modify_notification(self.ctx.store.as_ref(), job.notification_id, |n| {
            if let Some(reason) = in_flight_guard(n, job) {
                return Ok(Committed::Skipped(reason));
            }
            n.mark_delivered(now)?;
            Ok(Committed::Delivered)
        })
        .await?;
        Ok(written.map_or(Committed::Skipped(SkipReason::Missing), |(_, c)| c))
    }

    async fn commit_failure(&self, job: &DispatchJob) -> Result<Committed, EngineError> {
        let now = self.ctx.clock.now();
        let policy = self.policies.for_channel(job.channel);
        let next_job = self.ctx.ids.generate_job_id();
        let written = modify_notification(self.ctx.store.as_ref(), job.notification_id, |n| {
            if let Some(reason) = in_flight_guard(n, job) {
                return Ok(Committed::Skipped(reason));
            }
            n.record_failure(now);
            match self.decider.decide(n.retry_count, policy) {
                RetryDecision::Retry { delay } => {
                    let not_before = now + to_chrono(delay);
                    n.schedule_retry(next_job, not_before, now)?;
                    Ok(Committed::Requeued {
                        job_id: next_job,
                        retry_count: n.retry_count,
                        not_before,
                    })
                }
                RetryDecision::GiveUp => {
                    n.mark_failed(now)?;
                    Ok(Committed::Failed(FailureCause::RetriesExhausted {
                        attempts: n.retry_count,
                    }))
                }
            }
        })
        .await?;
        Ok(written.map_or(Committed::Skipped(SkipReason::Missing), |(_, c)| c))
    }

    async fn finish(
        &self,
        row: &Notification,
        job: &DispatchJob,
        committed: Committed,
    ) -> Result<ProcessOutcome, EngineError> {
        let outcome = match committed {
            Committed::Delivered => {
                tracing::info!(notification_id = %row.id, channel = %row.channel, "delivered");
                ProcessOutcome::Delivered
            }
            Committed::Requeued {
                job_id,
                retry_count,
                not_before,
            } => {
                let next = DispatchJob {
                    id: job_id,
                    notification_id: row.id,
                    channel: row.channel,
                    priority: row.priority,
                    not_before: Some(not_before),
                };
                let delay_secs = (not_before - self.ctx.clock.now()).num_seconds();
                if let Err(e) = self.ctx.queue.enqueue(next).await {
                    // Row is Queued with the new task ref; the reconciler
                    // re-enqueues it once the grace period passes.
                    tracing::error!(
                        notification_id = %row.id,
                        job_id = %job_id,
                        error = %e,
                        "retry committed but enqueue failed"
                    );
                } else {
                    tracing::info!(
                        notification_id = %row.id,
                        channel = %row.channel,
                        retry_count,
                        delay_secs,
                        job_id = %job_id,
                        "send failed, retry scheduled"
                    );
                }
                ProcessOutcome::Requeued {
                    retry_count,
                    not_before,
                }
            }
            Committed::Failed(cause) => {
                tracing::warn!(
                    notification_id = %row.id,
                    channel = %row.channel,
                    ?cause,
                    "retries exhausted, notification failed"
                );
                ProcessOutcome::Failed { cause }
            }
            Committed::Skipped(reason) => {
                tracing::info!(notification_id = %row.id, job_id = %job.id, ?reason, "attempt discarded");
                ProcessOutcome::Skipped { reason }
            }
        };
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::orchestrator::SubmitRequest;
    use crate::config::EngineConfig;
    use crate::domain::{Channel, NotificationId, UserId};
    use crate::impls::{InMemoryNotificationStore, ScriptedSender, Step};
    use crate::ports::{DispatchQueue, NotificationStore, SendError};
    use crate::test_support::{Harness, ts};
    use async_trait::async_trait;
    use rstest::rstest;

    async fn submit(h: &Harness, user: UserId, channel: Channel) -> NotificationId {
        h.dispatcher
            .submit(SubmitRequest::new(user, [channel], "Order shipped", "It is on its way"))
            .await
            .unwrap()
            .primary()
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn success_marks_delivered() {
        let h = Harness::new();
        let user = h.user().await;
        let id = submit(&h, user, Channel::Email).await;

        h.clock.set(ts(3));
        assert_eq!(h.run_next().await, Some(ProcessOutcome::Delivered));

        let row = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, NotificationStatus::Delivered);
        assert_eq!(row.delivered_at, Some(ts(3)));
        assert_eq!(row.retry_count, 0);

        let calls = h.email.calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].recipient, "someone@example.com");
        assert_eq!(calls[0].subject, "Order shipped");
    }

    #[tokio::test]
    async fn three_email_failures_end_in_failed_without_fourth_attempt() {
        let h = Harness::scripted(Channel::Email, vec![Step::Fail, Step::Fail, Step::Fail]);
        let user = h.user().await;
        let id = submit(&h, user, Channel::Email).await;

        assert_eq!(
            h.run_next().await,
            Some(ProcessOutcome::Requeued { retry_count: 1, not_before: ts(60) })
        );
        assert_eq!(h.store.get(id).await.unwrap().unwrap().status, NotificationStatus::Queued);

        // Not visible before the backoff elapses.
        h.clock.set(ts(59));
        assert_eq!(h.run_next().await, None);

        h.clock.set(ts(60));
        assert_eq!(
            h.run_next().await,
            Some(ProcessOutcome::Requeued { retry_count: 2, not_before: ts(180) })
        );

        h.clock.set(ts(180));
        assert_eq!(
            h.run_next().await,
            Some(ProcessOutcome::Failed {
                cause: FailureCause::RetriesExhausted { attempts: 3 }
            })
        );

        h.clock.set(ts(10_000));
        assert_eq!(h.run_next().await, None);
        assert_eq!(h.queue.counts().await.unwrap().total(), 0);
        assert_eq!(h.email.call_count().await, 3);

        let row = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, NotificationStatus::Failed);
        assert_eq!(row.retry_count, 3);
    }

    #[rstest]
    #[case::email(Channel::Email, 3)]
    #[case::sms(Channel::Sms, 3)]
    #[case::in_app(Channel::InApp, 2)]
    #[tokio::test]
    async fn retry_count_never_exceeds_channel_budget(#[case] channel: Channel, #[case] max: u32) {
        let h = Harness::scripted(channel, vec![Step::Fail; 10]);
        let user = h.user().await;
        let id = submit(&h, user, channel).await;

        let mut last_count = 0;
        for _ in 0..10 {
            h.clock.advance(Duration::from_secs(3_600));
            if h.run_next().await.is_none() {
                break;
            }
            let row = h.store.get(id).await.unwrap().unwrap();
            assert!(row.retry_count >= last_count);
            assert!(row.retry_count <= max);
            last_count = row.retry_count;
        }

        let row = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, NotificationStatus::Failed);
        assert_eq!(row.retry_count, max);
    }

    #[tokio::test]
    async fn duplicate_delivery_of_delivered_job_is_skipped() {
        let h = Harness::new();
        let user = h.user().await;
        let id = submit(&h, user, Channel::InApp).await;
        let job = h.queue.try_dequeue().await.unwrap().unwrap();

        assert_eq!(h.controller.process(&job).await.unwrap(), ProcessOutcome::Delivered);
        let before = h.store.get(id).await.unwrap().unwrap();

        let again = h.controller.process(&job).await.unwrap();
        assert_eq!(
            again,
            ProcessOutcome::Skipped {
                reason: SkipReason::AlreadyTerminal(NotificationStatus::Delivered)
            }
        );
        assert_eq!(h.store.get(id).await.unwrap().unwrap(), before);
        assert_eq!(h.in_app.call_count().await, 1);
    }

    #[tokio::test]
    async fn cancelled_job_is_skipped_without_send() {
        let h = Harness::new();
        let user = h.user().await;
        let id = submit(&h, user, Channel::Email).await;
        let job = h.queue.try_dequeue().await.unwrap().unwrap();

        h.dispatcher.cancel(id).await.unwrap();
        let outcome = h.controller.process(&job).await.unwrap();

        assert_eq!(
            outcome,
            ProcessOutcome::Skipped {
                reason: SkipReason::AlreadyTerminal(NotificationStatus::Failed)
            }
        );
        assert_eq!(h.email.call_count().await, 0);
        assert_eq!(h.store.get(id).await.unwrap().unwrap().status, NotificationStatus::Failed);
    }

    #[tokio::test]
    async fn missing_contact_fails_permanently() {
        let h = Harness::new();
        let user = h.user_with(|u| u.phone = None).await;
        let id = submit(&h, user, Channel::Sms).await;

        let outcome = h.run_next().await.unwrap();
        assert!(matches!(
            outcome,
            ProcessOutcome::Failed { cause: FailureCause::Precondition(_) }
        ));
        assert_eq!(h.sms.call_count().await, 0);
        let row = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, NotificationStatus::Failed);
        assert_eq!(row.retry_count, 0);
        assert_eq!(h.queue.counts().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn channel_disabled_after_submit_fails_permanently() {
        let h = Harness::new();
        let user = h.user().await;
        let id = submit(&h, user, Channel::Email).await;

        let mut record = h.store.get_user(user).await.unwrap().unwrap();
        record.email_enabled = false;
        h.store.upsert_user(record).await.unwrap();

        let outcome = h.run_next().await.unwrap();
        assert_eq!(
            outcome,
            ProcessOutcome::Failed {
                cause: FailureCause::from(PreconditionFailure::ChannelDisabled(Channel::Email))
            }
        );
        assert_eq!(h.store.get(id).await.unwrap().unwrap().status, NotificationStatus::Failed);
    }

    #[tokio::test]
    async fn stale_job_is_skipped() {
        let h = Harness::scripted(Channel::Email, vec![Step::Fail]);
        let user = h.user().await;
        submit(&h, user, Channel::Email).await;
        let first = h.queue.try_dequeue().await.unwrap().unwrap();
        h.controller.process(&first).await.unwrap();

        // The first job is redelivered after the row moved on to a retry job.
        let outcome = h.controller.process(&first).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Skipped { reason: SkipReason::StaleJob });
        assert_eq!(h.email.call_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn send_timeout_counts_as_failure() {
        let config = EngineConfig {
            send_timeout: Duration::from_secs(1),
            ..EngineConfig::default()
        };
        let h = Harness::build(config, vec![(Channel::Email, vec![Step::Hang(Duration::from_secs(60))])]);
        let user = h.user().await;
        submit(&h, user, Channel::Email).await;

        let outcome = h.run_next().await.unwrap();
        assert!(matches!(outcome, ProcessOutcome::Requeued { retry_count: 1, .. }));
    }

    #[tokio::test]
    async fn sender_error_counts_as_failure() {
        let h = Harness::scripted(Channel::InApp, vec![Step::Error("socket closed".into())]);
        let user = h.user().await;
        submit(&h, user, Channel::InApp).await;
        assert_eq!(
            h.run_next().await,
            Some(ProcessOutcome::Requeued { retry_count: 1, not_before: ts(30) })
        );
    }

    #[rstest]
    #[case::rejected(Step::Fail, "sender reported failure")]
    #[case::errored(Step::Error("socket closed".into()), "transport error: socket closed")]
    #[tokio::test(start_paused = true)]
    async fn attempt_reports_transient_send_failure(#[case] step: Step, #[case] detail: &str) {
        let config = EngineConfig {
            send_timeout: Duration::from_secs(1),
            ..EngineConfig::default()
        };
        let h = Harness::build(config, vec![]);
        let sender = ScriptedSender::new(Channel::Sms, [step, Step::Hang(Duration::from_secs(5))]);
        let message = OutboundMessage {
            notification_id: NotificationId::from_ulid(ulid::Ulid::new()),
            user_id: h.fresh_user_id(),
            channel: Channel::Sms,
            recipient: "+15550100".into(),
            subject: "s".into(),
            body: "b".into(),
        };

        match h.controller.attempt(&sender, &message).await {
            Err(EngineError::TransientSend(reason)) => assert_eq!(reason, detail),
            other => panic!("expected TransientSend, got {other:?}"),
        }
        match h.controller.attempt(&sender, &message).await {
            Err(EngineError::TransientSend(reason)) => assert!(reason.starts_with("timed out")),
            other => panic!("expected TransientSend, got {other:?}"),
        }
        assert!(h.controller.attempt(&sender, &message).await.is_ok());
    }

    #[tokio::test]
    async fn requeued_job_keeps_priority() {
        let h = Harness::scripted(Channel::Email, vec![Step::Fail]);
        let user = h.user().await;
        h.dispatcher
            .submit(
                SubmitRequest::new(user, [Channel::Email], "s", "b")
                    .with_priority(crate::domain::Priority::High),
            )
            .await
            .unwrap();
        h.run_next().await;
        h.clock.set(ts(60));
        let retry = h.queue.try_dequeue().await.unwrap().unwrap();
        assert_eq!(retry.priority, crate::domain::Priority::High);
    }

    /// Cancels the notification from inside the send call.
    struct CancellingSender {
        store: Arc<InMemoryNotificationStore>,
    }

    #[async_trait]
    impl ChannelSender for CancellingSender {
        fn channel(&self) -> Channel {
            Channel::Email
        }

        async fn send(&self, message: &OutboundMessage) -> Result<bool, SendError> {
            self.store
                .update_status(message.notification_id, NotificationStatus::Failed, ts(1))
                .await
                .map_err(|e| SendError::Transport(e.to_string()))?;
            Ok(true)
        }
    }

    #[tokio::test]
    async fn success_after_concurrent_cancel_stays_failed() {
        let h = Harness::new();
        let mut registry = SenderRegistry::new();
        registry
            .register(Arc::new(CancellingSender { store: h.store.clone() }))
            .unwrap();
        let controller = RetryController::new(
            h.ctx.clone(),
            registry,
            ChannelPolicies::default(),
            Duration::from_secs(30),
        );
        let user = h.user().await;
        let id = submit(&h, user, Channel::Email).await;
        let job = h.queue.try_dequeue().await.unwrap().unwrap();

        let outcome = controller.process(&job).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Skipped { reason: SkipReason::CancelledInFlight });
        let row = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, NotificationStatus::Failed);
        assert_eq!(row.delivered_at, None);
    }

    #[tokio::test]
    async fn store_outage_is_returned_to_caller() {
        let h = Harness::new();
        let user = h.user().await;
        submit(&h, user, Channel::Email).await;
        let job = h.queue.try_dequeue().await.unwrap().unwrap();

        h.store.set_available(false);
        let err = h.controller.process(&job).await.unwrap_err();
        assert_eq!(err.kind(), crate::domain::ErrorKind::Infrastructure);
        assert_eq!(h.email.call_count().await, 0);
    }

    #[tokio::test]
    async fn redelivered_sending_row_is_attempted_again() {
        let h = Harness::new();
        let user = h.user().await;
        let id = submit(&h, user, Channel::Email).await;
        let job = h.queue.try_dequeue().await.unwrap().unwrap();

        // A worker committed Sending and died.
        let store: &dyn NotificationStore = h.store.as_ref();
        store.update_status(id, NotificationStatus::Sending, ts(1)).await.unwrap();

        assert_eq!(h.controller.process(&job).await.unwrap(), ProcessOutcome::Delivered);
    }

    #[tokio::test]
    async fn retry_enqueue_failure_leaves_row_for_reconciler() {
        let h = Harness::scripted(Channel::Email, vec![Step::Fail]);
        let user = h.user().await;
        let id = submit(&h, user, Channel::Email).await;
        let job = h.queue.try_dequeue().await.unwrap().unwrap();

        h.queue.set_available(false);
        let outcome = h.controller.process(&job).await.unwrap();
        assert!(matches!(outcome, ProcessOutcome::Requeued { retry_count: 1, .. }));
        h.queue.set_available(true);
        h.queue.ack(job.id).await.unwrap();

        let row = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, NotificationStatus::Queued);
        assert_ne!(row.task_ref, Some(job.id));
        assert!(!h.queue.contains(&row.job_key()).await.unwrap());
    }
}
