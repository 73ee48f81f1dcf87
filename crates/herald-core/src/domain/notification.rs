//! Notification record and its status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::channel::{Channel, Priority};
use super::errors::EngineError;
use super::ids::{JobId, NotificationId, UserId};
use super::job::{DispatchJob, JobKey};

/// Notification status.
///
/// State transitions:
/// - Queued -> Sending -> Delivered -> Read
/// - Sending -> Queued (re-enqueued with backoff)
/// - Sending -> Failed (retries exhausted)
/// - Queued -> Failed (precondition failure or cancel)
/// - Sending -> Failed (cancel)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Queued,
    Sending,
    Delivered,
    Read,
    Failed,
}

impl NotificationStatus {
    /// No automatic transition leaves a terminal state. Delivered may still
    /// become Read through an explicit user action.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NotificationStatus::Delivered | NotificationStatus::Read | NotificationStatus::Failed
        )
    }

    /// Queued or Sending: a dispatch job should exist for it.
    pub fn is_pending(self) -> bool {
        matches!(self, NotificationStatus::Queued | NotificationStatus::Sending)
    }

    pub fn can_transition_to(self, next: NotificationStatus) -> bool {
        use NotificationStatus::*;
        matches!(
            (self, next),
            (Queued, Sending)
                | (Queued, Failed)
                | (Sending, Delivered)
                | (Sending, Queued)
                | (Sending, Failed)
                | (Delivered, Read)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NotificationStatus::Queued => "queued",
            NotificationStatus::Sending => "sending",
            NotificationStatus::Delivered => "delivered",
            NotificationStatus::Read => "read",
            NotificationStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row per (user, channel) delivery.
///
/// The store owns the canonical copy. Every mutation goes through one of the
/// `mark_*` / `schedule_retry` methods, then back to the store with the
/// `version` it was read at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    pub channel: Channel,
    pub subject: String,
    pub body: String,
    pub status: NotificationStatus,
    pub priority: Priority,

    /// Failed attempts so far. Never exceeds the channel's `max_retries`.
    pub retry_count: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,

    /// Id of the dispatch job currently responsible for this row.
    pub task_ref: Option<JobId>,

    /// Not-before of the current dispatch job.
    pub scheduled_for: Option<DateTime<Utc>>,

    #[serde(default)]
    pub metadata: serde_json::Value,

    /// Optimistic concurrency token, bumped by the store on every write.
    #[serde(default)]
    pub version: u64,
}

/// Fields supplied at creation time.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub id: NotificationId,
    pub user_id: UserId,
    pub channel: Channel,
    pub subject: String,
    pub body: String,
    pub priority: Priority,
    pub task_ref: JobId,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
}

impl Notification {
    pub fn new(fields: NewNotification, now: DateTime<Utc>) -> Self {
        Self {
            id: fields.id,
            user_id: fields.user_id,
            channel: fields.channel,
            subject: fields.subject,
            body: fields.body,
            status: NotificationStatus::Queued,
            priority: fields.priority,
            retry_count: 0,
            created_at: now,
            updated_at: now,
            delivered_at: None,
            read_at: None,
            task_ref: Some(fields.task_ref),
            scheduled_for: fields.scheduled_for,
            metadata: fields.metadata,
            version: 0,
        }
    }

    pub fn job_key(&self) -> JobKey {
        JobKey {
            notification_id: self.id,
            channel: self.channel,
        }
    }

    /// Rebuild the dispatch job this record points at. Used after a crash
    /// between commit and enqueue.
    pub fn current_job(&self) -> Option<DispatchJob> {
        self.task_ref.map(|id| DispatchJob {
            id,
            notification_id: self.id,
            channel: self.channel,
            priority: self.priority,
            not_before: self.scheduled_for,
        })
    }

    /// Apply a plain status transition, stamping the matching timestamp.
    ///
    /// Re-queueing carries a new job and goes through `schedule_retry`.
    pub fn transition(&mut self, next: NotificationStatus, now: DateTime<Utc>) -> Result<(), EngineError> {
        if next == NotificationStatus::Queued || !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        match next {
            NotificationStatus::Delivered => self.delivered_at = Some(now),
            NotificationStatus::Read => self.read_at = Some(now),
            _ => {}
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_sending(&mut self, now: DateTime<Utc>) -> Result<(), EngineError> {
        self.transition(NotificationStatus::Sending, now)
    }

    pub fn mark_delivered(&mut self, now: DateTime<Utc>) -> Result<(), EngineError> {
        self.transition(NotificationStatus::Delivered, now)
    }

    pub fn mark_read(&mut self, now: DateTime<Utc>) -> Result<(), EngineError> {
        self.transition(NotificationStatus::Read, now)
    }

    pub fn mark_failed(&mut self, now: DateTime<Utc>) -> Result<(), EngineError> {
        self.transition(NotificationStatus::Failed, now)
    }

    /// Count one failed attempt without changing status.
    ///
    /// Written in the same store update as the status that follows it.
    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.retry_count += 1;
        self.updated_at = now;
    }

    /// Sending -> Queued, handing the row to a new dispatch job.
    pub fn schedule_retry(
        &mut self,
        job_id: JobId,
        not_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        if !self.status.can_transition_to(NotificationStatus::Queued) {
            return Err(EngineError::InvalidTransition {
                from: self.status,
                to: NotificationStatus::Queued,
            });
        }
        self.status = NotificationStatus::Queued;
        self.task_ref = Some(job_id);
        self.scheduled_for = Some(not_before);
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use ulid::Ulid;
    use NotificationStatus::*;

    fn sample(now: DateTime<Utc>) -> Notification {
        Notification::new(
            NewNotification {
                id: NotificationId::from_ulid(Ulid::new()),
                user_id: UserId::from_ulid(Ulid::new()),
                channel: Channel::Email,
                subject: "hello".into(),
                body: "world".into(),
                priority: Priority::Medium,
                task_ref: JobId::from_ulid(Ulid::new()),
                scheduled_for: None,
                metadata: serde_json::Value::Null,
            },
            now,
        )
    }

    #[rstest]
    #[case::pick_up(Queued, Sending, true)]
    #[case::precondition(Queued, Failed, true)]
    #[case::success(Sending, Delivered, true)]
    #[case::retry(Sending, Queued, true)]
    #[case::exhausted(Sending, Failed, true)]
    #[case::viewed(Delivered, Read, true)]
    #[case::skip_sending(Queued, Delivered, false)]
    #[case::revive_failed(Failed, Queued, false)]
    #[case::redeliver(Delivered, Sending, false)]
    #[case::fail_delivered(Delivered, Failed, false)]
    #[case::unread(Read, Delivered, false)]
    fn transition_table(
        #[case] from: NotificationStatus,
        #[case] to: NotificationStatus,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn new_notification_starts_queued_with_task_ref() {
        let n = sample(Utc::now());
        assert_eq!(n.status, Queued);
        assert_eq!(n.retry_count, 0);
        assert!(n.task_ref.is_some());
        assert_eq!(n.current_job().map(|j| j.notification_id), Some(n.id));
    }

    #[test]
    fn delivered_and_read_stamp_timestamps() {
        let now = Utc::now();
        let mut n = sample(now);
        n.mark_sending(now).unwrap();
        n.mark_delivered(now).unwrap();
        assert_eq!(n.delivered_at, Some(now));
        n.mark_read(now).unwrap();
        assert_eq!(n.read_at, Some(now));
        assert_eq!(n.status, Read);
    }

    #[test]
    fn plain_transition_cannot_requeue() {
        let now = Utc::now();
        let mut n = sample(now);
        n.mark_sending(now).unwrap();
        let err = n.transition(Queued, now).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { from: Sending, to: Queued }));
    }

    #[test]
    fn schedule_retry_swaps_task_ref() {
        let now = Utc::now();
        let mut n = sample(now);
        n.mark_sending(now).unwrap();
        n.record_failure(now);
        let next = JobId::from_ulid(Ulid::new());
        n.schedule_retry(next, now, now).unwrap();
        assert_eq!(n.status, Queued);
        assert_eq!(n.task_ref, Some(next));
        assert_eq!(n.retry_count, 1);
    }

    #[test]
    fn failed_cannot_be_retried() {
        let now = Utc::now();
        let mut n = sample(now);
        n.mark_failed(now).unwrap();
        assert!(n.schedule_retry(JobId::from_ulid(Ulid::new()), now, now).is_err());
        assert!(n.mark_sending(now).is_err());
    }
}
