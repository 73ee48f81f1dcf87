//! In-memory notification store.
//!
//! One tokio mutex guards every table, so each trait call is atomic. The
//! availability switch lets tests simulate an unreachable database.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;

use crate::domain::{Notification, NotificationId, StoreError, User, UserId};
use crate::ports::{ListQuery, NotificationStore, Page};

#[derive(Default)]
struct StoreState {
    notifications: HashMap<NotificationId, Notification>,
    users: HashMap<UserId, User>,
    digests: HashSet<(UserId, NaiveDate)>,
}

#[derive(Default)]
pub struct InMemoryNotificationStore {
    state: Mutex<StoreState>,
    unavailable: AtomicBool,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle simulated outage. While unavailable every call fails with
    /// `StoreError::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.notifications.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("in-memory store switched off".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn create_batch(
        &self,
        provisioned: Option<User>,
        notifications: Vec<Notification>,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;

        // Validate everything before touching any table.
        let mut seen = HashSet::new();
        for n in &notifications {
            if state.notifications.contains_key(&n.id) || !seen.insert(n.id) {
                return Err(StoreError::Duplicate(n.id.to_string()));
            }
        }

        if let Some(user) = provisioned {
            state.users.entry(user.id).or_insert(user);
        }
        for n in notifications {
            state.notifications.insert(n.id, n);
        }
        Ok(())
    }

    async fn get(&self, id: NotificationId) -> Result<Option<Notification>, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state.notifications.get(&id).cloned())
    }

    async fn update(&self, notification: &Notification) -> Result<Notification, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        // A vanished row is reported as a conflict; the caller's re-read
        // then observes that it is gone.
        let Some(stored) = state.notifications.get_mut(&notification.id) else {
            return Err(StoreError::Conflict(notification.id));
        };
        if stored.version != notification.version {
            return Err(StoreError::Conflict(notification.id));
        }
        let mut next = notification.clone();
        next.version += 1;
        *stored = next.clone();
        Ok(next)
    }

    async fn list(&self, query: &ListQuery) -> Result<Page<Notification>, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;

        let mut matching: Vec<&Notification> = state
            .notifications
            .values()
            .filter(|n| query.user_id.is_none_or(|u| n.user_id == u))
            .filter(|n| query.status.is_none_or(|s| n.status == s))
            .filter(|n| query.channel.is_none_or(|c| n.channel == c))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let limit = u64::from(query.limit.max(1));
        let total = matching.len() as u64;
        let pages = total.div_ceil(limit);
        let skip = u64::from(query.page.max(1) - 1) * limit;
        let items = matching
            .into_iter()
            .skip(skip as usize)
            .take(limit as usize)
            .cloned()
            .collect();

        Ok(Page {
            items,
            total,
            pages,
        })
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let before = state.notifications.len();
        state.notifications.retain(|_, n| n.created_at >= cutoff);
        Ok((before - state.notifications.len()) as u64)
    }

    async fn list_unread_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Notification>, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        let mut rows: Vec<Notification> = state
            .notifications
            .values()
            .filter(|n| n.created_at >= since && n.status != crate::domain::NotificationStatus::Read)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn list_pending(
        &self,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<Notification>, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        let mut rows: Vec<Notification> = state
            .notifications
            .values()
            .filter(|n| n.status.is_pending() && n.updated_at < updated_before)
            .cloned()
            .collect();
        rows.sort_by_key(|n| n.id);
        Ok(rows)
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state.users.get(&id).cloned())
    }

    async fn upsert_user(&self, user: User) -> Result<(), StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        state.users.insert(user.id, user);
        Ok(())
    }

    async fn claim_digest(&self, user_id: UserId, day: NaiveDate) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        Ok(state.digests.insert((user_id, day)))
    }

    async fn release_digest(&self, user_id: UserId, day: NaiveDate) -> Result<(), StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        state.digests.remove(&(user_id, day));
        Ok(())
    }
}
