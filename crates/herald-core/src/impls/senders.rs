//! Sender implementations that need no real transport.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::Channel;
use crate::ports::{ChannelSender, OutboundMessage, SendError};

/// Logs the message and reports success.
pub struct LoggingSender {
    channel: Channel,
}

impl LoggingSender {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl ChannelSender for LoggingSender {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, message: &OutboundMessage) -> Result<bool, SendError> {
        tracing::info!(
            channel = %self.channel,
            notification_id = %message.notification_id,
            recipient = %message.recipient,
            subject = %message.subject,
            "delivered"
        );
        Ok(true)
    }
}

/// One scripted reaction to a send call.
#[derive(Debug, Clone)]
pub enum Step {
    Succeed,
    Fail,
    Error(String),
    /// Sleep before succeeding; used to trip the send timeout.
    Hang(Duration),
}

/// Plays back a script of results and records every message it receives.
/// Once the script runs out every call succeeds.
pub struct ScriptedSender {
    channel: Channel,
    script: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<OutboundMessage>>,
}

impl ScriptedSender {
    pub fn new(channel: Channel, script: impl IntoIterator<Item = Step>) -> Self {
        Self {
            channel,
            script: Mutex::new(script.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub async fn calls(&self) -> Vec<OutboundMessage> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait]
impl ChannelSender for ScriptedSender {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, message: &OutboundMessage) -> Result<bool, SendError> {
        self.calls.lock().await.push(message.clone());
        let step = self
            .script
            .lock()
            .await
            .pop_front()
            .unwrap_or(Step::Succeed);
        match step {
            Step::Succeed => Ok(true),
            Step::Fail => Ok(false),
            Step::Error(msg) => Err(SendError::Transport(msg)),
            Step::Hang(d) => {
                tokio::time::sleep(d).await;
                Ok(true)
            }
        }
    }
}
