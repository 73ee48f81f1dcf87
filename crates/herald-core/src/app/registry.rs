//! Sender registry: one sender per channel.

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::{Channel, EngineError};
use crate::ports::ChannelSender;

#[derive(Default, Clone)]
pub struct SenderRegistry {
    senders: HashMap<Channel, Arc<dyn ChannelSender>>,
}

impl SenderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the sender's own channel. A second sender for the
    /// same channel is rejected.
    pub fn register(&mut self, sender: Arc<dyn ChannelSender>) -> Result<(), EngineError> {
        let channel = sender.channel();
        if self.senders.contains_key(&channel) {
            return Err(EngineError::DuplicateSender(channel));
        }
        self.senders.insert(channel, sender);
        Ok(())
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn ChannelSender>> {
        self.senders.get(&channel).cloned()
    }

    pub fn missing_channels(&self) -> Vec<Channel> {
        Channel::ALL
            .into_iter()
            .filter(|c| !self.senders.contains_key(c))
            .collect()
    }
}
