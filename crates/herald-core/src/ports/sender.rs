//! Channel sender port.
//!
//! One implementation per channel. A sender attempts exactly one delivery;
//! retries, backoff and status bookkeeping belong to the retry controller.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Channel, NotificationId, UserId};

/// Everything a transport needs for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub notification_id: NotificationId,
    pub user_id: UserId,
    pub channel: Channel,

    /// E-mail address, phone number or user id, depending on the channel.
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// An unexpected defect inside a sender. Expected delivery failures are
/// reported as `Ok(false)` instead.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait ChannelSender: Send + Sync {
    fn channel(&self) -> Channel;

    /// `Ok(true)` on delivery, `Ok(false)` on an expected failure.
    async fn send(&self, message: &OutboundMessage) -> Result<bool, SendError>;
}
