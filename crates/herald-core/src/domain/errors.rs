//! Error types and their operational classification.

use thiserror::Error;

use super::channel::Channel;
use super::ids::{NotificationId, UserId};
use super::notification::NotificationStatus;

/// Operational classification of an error.
///
/// - `Transient`: may succeed later; retried through backoff or redelivery.
/// - `Permanent`: retrying cannot help.
/// - `Infrastructure`: a collaborator (store, queue) is unhealthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// A delivery precondition that cannot resolve with time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreconditionFailure {
    #[error("user {0} does not exist")]
    UnknownUser(UserId),

    #[error("channel {0} is disabled for the user")]
    ChannelDisabled(Channel),

    #[error("user has no contact address for channel {0}")]
    MissingContact(Channel),

    #[error("no sender registered for channel {0}")]
    NoSender(Channel),
}

/// Errors raised by a notification store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Optimistic concurrency check failed; reload and retry.
    #[error("concurrent modification of notification {0}")]
    Conflict(NotificationId),

    #[error("duplicate record: {0}")]
    Duplicate(String),
}

/// Errors raised by a dispatch queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("precondition failed: {0}")]
    Precondition(#[from] PreconditionFailure),

    #[error("transient send failure: {0}")]
    TransientSend(String),

    #[error("notification {0} not found")]
    NotFound(NotificationId),

    #[error("notification {id} is {status}; operation not allowed")]
    InvalidState {
        id: NotificationId,
        status: NotificationStatus,
    },

    #[error("illegal status transition {from} -> {to}")]
    InvalidTransition {
        from: NotificationStatus,
        to: NotificationStatus,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("duplicate sender for channel {0}")]
    DuplicateSender(Channel),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::TransientSend(_) => ErrorKind::Transient,
            EngineError::Store(StoreError::Conflict(_)) => ErrorKind::Transient,
            EngineError::Store(_) | EngineError::Queue(_) => ErrorKind::Infrastructure,
            EngineError::Precondition(_)
            | EngineError::NotFound(_)
            | EngineError::InvalidState { .. }
            | EngineError::InvalidTransition { .. }
            | EngineError::DuplicateSender(_) => ErrorKind::Permanent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn store_outage_is_infrastructure() {
        let err: EngineError = StoreError::Unavailable("db down".into()).into();
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
        assert_eq!(err.to_string(), "store unavailable: db down");
    }

    #[test]
    fn conflict_is_transient() {
        let err: EngineError = StoreError::Conflict(NotificationId::from_ulid(Ulid::new())).into();
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[test]
    fn failed_send_is_transient() {
        let err = EngineError::TransientSend("timed out after 30s".into());
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert_eq!(err.to_string(), "transient send failure: timed out after 30s");
    }

    #[test]
    fn precondition_is_permanent() {
        let err: EngineError = PreconditionFailure::MissingContact(Channel::Sms).into();
        assert_eq!(err.kind(), ErrorKind::Permanent);
        assert!(err.to_string().contains("sms"));
    }
}
