//! Notification store port: the durable source of truth.
//!
//! Writes are optimistic. A record carries the `version` it was read at and
//! `update` only succeeds if the stored copy still has that version. Callers
//! that mutate a notification go through [`modify_notification`], which
//! re-reads and re-applies on conflict.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::domain::{
    Channel, EngineError, Notification, NotificationId, NotificationStatus, StoreError, User,
    UserId,
};

/// How many times a read-modify-write is retried after losing a race.
pub const MAX_CONFLICT_RETRIES: usize = 8;

/// Filter for [`NotificationStore::list`].
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    pub user_id: Option<UserId>,
    pub status: Option<NotificationStatus>,
    pub channel: Option<Channel>,

    /// 1-based.
    pub page: u32,
    pub limit: u32,
}

impl ListQuery {
    /// First page of everything addressed to `user_id`.
    pub fn for_user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            user_id: None,
            status: None,
            channel: None,
            page: 1,
            limit: 20,
        }
    }
}

/// One page of a [`ListQuery`] result.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,

    /// Matching rows across all pages.
    pub total: u64,

    /// `ceil(total / limit)`; zero when nothing matched.
    pub pages: u64,
}

/// Persistence for notifications, users and digest claims.
///
/// # Design
/// - Every mutation of a notification is a compare-and-swap on `version`
/// - `create_batch` is all-or-nothing
/// - `updated_at` is stored as given; the sweeper reads it to find stuck rows
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Insert notifications, optionally together with a newly provisioned
    /// user, as one all-or-nothing write.
    async fn create_batch(
        &self,
        provisioned: Option<User>,
        notifications: Vec<Notification>,
    ) -> Result<(), StoreError>;

    async fn get(&self, id: NotificationId) -> Result<Option<Notification>, StoreError>;

    /// Compare-and-swap on `version`. Returns the stored copy (version bumped)
    /// or `StoreError::Conflict` if someone wrote in between.
    async fn update(&self, notification: &Notification) -> Result<Notification, StoreError>;

    /// Plain status write for collaborators outside the engine.
    async fn update_status(
        &self,
        id: NotificationId,
        status: NotificationStatus,
        at: DateTime<Utc>,
    ) -> Result<Notification, EngineError> {
        let updated = modify_notification(self, id, |n| n.transition(status, at)).await?;
        updated.map(|(n, ())| n).ok_or(EngineError::NotFound(id))
    }

    /// Newest first.
    async fn list(&self, query: &ListQuery) -> Result<Page<Notification>, StoreError>;

    /// Delete every row created strictly before `cutoff`, regardless of
    /// status. Returns the number of rows removed.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Rows created at or after `since` whose status is not Read.
    async fn list_unread_since(&self, since: DateTime<Utc>)
    -> Result<Vec<Notification>, StoreError>;

    /// Queued or Sending rows last touched strictly before `updated_before`.
    async fn list_pending(
        &self,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<Notification>, StoreError>;

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    async fn upsert_user(&self, user: User) -> Result<(), StoreError>;

    /// Record that the digest for (`user_id`, `day`) has been issued.
    /// Returns `false` if it already was.
    async fn claim_digest(&self, user_id: UserId, day: NaiveDate) -> Result<bool, StoreError>;

    /// Undo a claim whose digest could not be submitted, so a later run
    /// on the same day can try again.
    async fn release_digest(&self, user_id: UserId, day: NaiveDate) -> Result<(), StoreError>;
}

/// Atomic read-modify-write of one notification.
///
/// `f` is applied to a fresh copy and may run more than once if the write
/// loses a race. If `f` leaves the record unchanged nothing is written.
/// Returns `None` when the notification does not exist.
pub async fn modify_notification<S, F, T>(
    store: &S,
    id: NotificationId,
    mut f: F,
) -> Result<Option<(Notification, T)>, EngineError>
where
    S: NotificationStore + ?Sized,
    F: FnMut(&mut Notification) -> Result<T, EngineError> + Send,
    T: Send,
{
    let mut conflicts = 0;
    loop {
        let Some(current) = store.get(id).await? else {
            return Ok(None);
        };
        let mut next = current.clone();
        let value = f(&mut next)?;
        if next == current {
            return Ok(Some((current, value)));
        }
        match store.update(&next).await {
            Ok(stored) => return Ok(Some((stored, value))),
            Err(StoreError::Conflict(_)) if conflicts < MAX_CONFLICT_RETRIES => {
                conflicts += 1;
                tracing::debug!(notification_id = %id, conflicts, "write conflict, re-reading");
            }
            Err(e) => return Err(e.into()),
        }
    }
}
