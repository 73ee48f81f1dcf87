//! Domain model: identifiers, records, policies, outcomes.
//!
//! Pure types only. Nothing here touches the clock, the store or the queue.

pub mod channel;
pub mod decision;
pub mod errors;
pub mod ids;
pub mod job;
pub mod notification;
pub mod outcome;
pub mod policy;
pub mod user;

pub use channel::{Channel, Priority};
pub use decision::{RetryDecider, RetryDecision};
pub use errors::{EngineError, ErrorKind, PreconditionFailure, QueueError, StoreError};
pub use ids::{JobId, NotificationId, UserId};
pub use job::{DispatchJob, JobKey};
pub use notification::{NewNotification, Notification, NotificationStatus};
pub use outcome::{FailureCause, ProcessOutcome, SkipReason};
pub use policy::{BackoffPolicy, ChannelPolicies};
pub use user::{ContactInfo, User};
