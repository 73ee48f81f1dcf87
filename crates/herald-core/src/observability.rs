//! Point-in-time views for operators and tests.

use serde::{Deserialize, Serialize};

/// Queue depth snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    /// Visible now, per lane.
    pub ready_high: usize,
    pub ready_default: usize,
    pub ready_low: usize,

    /// Pending with a future not-before.
    pub delayed: usize,

    /// Leased and not yet acknowledged.
    pub in_flight: usize,
}

impl QueueCounts {
    pub fn ready(&self) -> usize {
        self.ready_high + self.ready_default + self.ready_low
    }

    pub fn total(&self) -> usize {
        self.ready() + self.delayed + self.in_flight
    }
}
