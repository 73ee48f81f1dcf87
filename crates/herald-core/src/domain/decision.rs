//! Retry decision: what to do after a failed attempt.

use std::time::Duration;

use super::policy::BackoffPolicy;

#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Re-queue after `delay`.
    Retry { delay: Duration },

    /// Budget exhausted; the notification becomes Failed.
    GiveUp,
}

/// Pure function from (failed attempts so far, policy) to the next action.
///
/// `failures` already includes the attempt that just failed. A notification
/// is re-queued while `failures < max_retries`, so it never records more than
/// `max_retries` failures and never gets an attempt beyond that.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryDecider;

impl RetryDecider {
    pub fn decide(&self, failures: u32, policy: &BackoffPolicy) -> RetryDecision {
        if failures >= policy.max_retries {
            RetryDecision::GiveUp
        } else {
            RetryDecision::Retry {
                delay: policy.delay_for(failures),
            }
        }
    }
}
