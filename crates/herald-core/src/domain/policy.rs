//! Backoff policy: per-channel retry budget and delay curve.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::channel::Channel;

/// Default ceiling applied to every channel.
pub const DEFAULT_BACKOFF_CEILING: Duration = Duration::from_secs(600);

/// Retry policy for one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Growth factor between consecutive retries.
    pub multiplier: f64,

    /// Failed attempts a notification may accumulate before it is Failed.
    pub max_retries: u32,

    /// Upper bound on any single delay.
    pub ceiling: Duration,
}

impl BackoffPolicy {
    /// Email and SMS: 60s base, 3 attempts.
    pub fn email_default() -> Self {
        Self {
            base_delay: Duration::from_secs(60),
            multiplier: 2.0,
            max_retries: 3,
            ceiling: DEFAULT_BACKOFF_CEILING,
        }
    }

    pub fn sms_default() -> Self {
        Self::email_default()
    }

    /// In-app: 30s base, 2 attempts, same ceiling as the other channels.
    pub fn in_app_default() -> Self {
        Self {
            base_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_retries: 2,
            ceiling: DEFAULT_BACKOFF_CEILING,
        }
    }

    /// Delay before retry number `retry` (1-indexed).
    ///
    /// delay = min(base_delay * multiplier^(retry - 1), ceiling)
    ///
    /// With base=60s, multiplier=2.0, ceiling=600s:
    /// - retry 1: 60s
    /// - retry 2: 120s
    /// - retry 3: 240s
    /// - retry 5: 600s (capped)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let ceiling = self.ceiling.as_secs_f64();
        if !secs.is_finite() || secs >= ceiling {
            return self.ceiling;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// One policy per channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelPolicies {
    pub email: BackoffPolicy,
    pub sms: BackoffPolicy,
    pub in_app: BackoffPolicy,
}

impl ChannelPolicies {
    pub fn for_channel(&self, channel: Channel) -> &BackoffPolicy {
        match channel {
            Channel::Email => &self.email,
            Channel::Sms => &self.sms,
            Channel::InApp => &self.in_app,
        }
    }

    pub fn for_channel_mut(&mut self, channel: Channel) -> &mut BackoffPolicy {
        match channel {
            Channel::Email => &mut self.email,
            Channel::Sms => &mut self.sms,
            Channel::InApp => &mut self.in_app,
        }
    }
}

impl Default for ChannelPolicies {
    fn default() -> Self {
        Self {
            email: BackoffPolicy::email_default(),
            sms: BackoffPolicy::sms_default(),
            in_app: BackoffPolicy::in_app_default(),
        }
    }
}
