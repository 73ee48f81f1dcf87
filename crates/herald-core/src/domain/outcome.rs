//! Outcome of processing one dispatch job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::PreconditionFailure;
use super::notification::NotificationStatus;

/// Returned by the retry controller for every job it processes. Callers
/// branch on the variant; a processed job is always acknowledged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessOutcome {
    Delivered,

    /// Re-queued with backoff.
    Requeued {
        retry_count: u32,
        not_before: DateTime<Utc>,
    },

    Failed { cause: FailureCause },

    /// Nothing was sent and nothing changed.
    Skipped { reason: SkipReason },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureCause {
    Precondition(String),
    RetriesExhausted { attempts: u32 },
}

impl From<PreconditionFailure> for FailureCause {
    fn from(p: PreconditionFailure) -> Self {
        FailureCause::Precondition(p.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    /// Duplicate delivery of an already finished notification.
    AlreadyTerminal(NotificationStatus),

    /// The job is an older link of the retry chain.
    StaleJob,

    /// The notification no longer exists (e.g. removed by retention).
    Missing,

    /// The notification was cancelled while the attempt was in flight.
    CancelledInFlight,
}

impl ProcessOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ProcessOutcome::Delivered => "delivered",
            ProcessOutcome::Requeued { .. } => "requeued",
            ProcessOutcome::Failed { .. } => "failed",
            ProcessOutcome::Skipped { .. } => "skipped",
        }
    }
}
