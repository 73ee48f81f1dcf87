//! IdGenerator port.
//!
//! ULIDs take their timestamp from the injected clock, so ids issued under a
//! `FixedClock` still sort by (simulated) creation time.

use std::sync::Arc;

use ulid::Ulid;

use crate::domain::ids::{JobId, NotificationId, UserId};
use crate::ports::Clock;

/// Source of fresh identifiers for the engine.
///
/// Tests swap this out to force id reuse or fixed values.
pub trait IdGenerator: Send + Sync {
    fn generate_notification_id(&self) -> NotificationId;

    fn generate_job_id(&self) -> JobId;

    fn generate_user_id(&self) -> UserId;
}

/// ULID-backed generator. Time part from the clock, rest random.
pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl IdGenerator for UlidGenerator {
    fn generate_notification_id(&self) -> NotificationId {
        NotificationId::from(self.next_ulid())
    }

    fn generate_job_id(&self) -> JobId {
        JobId::from(self.next_ulid())
    }

    fn generate_user_id(&self) -> UserId {
        UserId::from(self.next_ulid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn generated_ids_are_unique() {
        let id_gen = UlidGenerator::new(Arc::new(SystemClock));
        let a = id_gen.generate_job_id();
        let b = id_gen.generate_job_id();
        assert_ne!(a, b);
    }

    #[test]
    fn timestamp_part_follows_the_clock() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(Arc::new(FixedClock::new(fixed_time)));

        let id1 = id_gen.generate_notification_id();
        let id2 = id_gen.generate_notification_id();
        assert_ne!(id1, id2);
        assert_eq!(id1.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
        assert_eq!(id2.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
    }
}
