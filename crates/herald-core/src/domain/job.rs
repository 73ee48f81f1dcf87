//! Dispatch job: the ephemeral unit of work carried by the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::channel::{Channel, Priority};
use super::ids::{JobId, NotificationId};

/// Identity of "the delivery of this notification on this channel".
///
/// Several jobs may share a key over time (one per link of a retry chain),
/// but at most one of them is current: the one named by the notification's
/// `task_ref`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub notification_id: NotificationId,
    pub channel: Channel,
}

/// A queued request to attempt one delivery.
///
/// Not persisted on its own; `Notification::current_job` rebuilds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchJob {
    pub id: JobId,
    pub notification_id: NotificationId,
    pub channel: Channel,
    pub priority: Priority,

    /// Invisible to dequeue before this instant. `None` means immediately.
    pub not_before: Option<DateTime<Utc>>,
}

impl DispatchJob {
    pub fn key(&self) -> JobKey {
        JobKey {
            notification_id: self.notification_id,
            channel: self.channel,
        }
    }
}
