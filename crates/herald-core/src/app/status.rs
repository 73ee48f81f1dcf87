//! Status - point-in-time view for operators
//!
//! Queue depths come from the dispatch queue and per-status totals from the
//! store. The two reads are not atomic, so a job acked between them can show
//! up as Delivered while the queue still counts it as leased.

use serde::{Deserialize, Serialize};

use crate::app::context::EngineContext;
use crate::domain::{EngineError, NotificationStatus};
use crate::observability::QueueCounts;
use crate::ports::ListQuery;

/// Stored notifications per lifecycle status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationCounts {
    pub queued: u64,
    pub sending: u64,
    pub delivered: u64,
    pub read: u64,
    pub failed: u64,
}

/// What `Engine::status` returns and the CLI prints as JSON.
///
/// # Example
/// ```ignore
/// let status = engine.status().await?;
/// println!("{}", serde_json::to_string_pretty(&status)?);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub queue: QueueCounts,
    pub notifications: NotificationCounts,
}

/// Collect an [`EngineStatus`].
///
/// One `limit: 1` list per status; only `Page::total` is used.
pub async fn snapshot(ctx: &EngineContext) -> Result<EngineStatus, EngineError> {
    let queue = ctx.queue.counts().await?;
    let mut notifications = NotificationCounts::default();
    for status in [
        NotificationStatus::Queued,
        NotificationStatus::Sending,
        NotificationStatus::Delivered,
        NotificationStatus::Read,
        NotificationStatus::Failed,
    ] {
        let total = ctx
            .store
            .list(&ListQuery {
                status: Some(status),
                limit: 1,
                ..ListQuery::default()
            })
            .await?
            .total;
        let slot = match status {
            NotificationStatus::Queued => &mut notifications.queued,
            NotificationStatus::Sending => &mut notifications.sending,
            NotificationStatus::Delivered => &mut notifications.delivered,
            NotificationStatus::Read => &mut notifications.read,
            NotificationStatus::Failed => &mut notifications.failed,
        };
        *slot = total;
    }
    Ok(EngineStatus {
        queue,
        notifications,
    })
}
