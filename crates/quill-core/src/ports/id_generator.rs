//! IdGenerator port.

use ulid::Ulid;

use crate::domain::TaskId;
use crate::ports::Clock;

/// Hands out task ids.
pub trait IdGenerator: Send + Sync {
    fn generate_task_id(&self) -> TaskId;
}

/// ULID generator: timestamp from the injected clock, random tail from `rand`.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_task_id(&self) -> TaskId {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        TaskId::from(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn generates_unique_ids() {
        let ids = UlidGenerator::new(SystemClock);
        let a = ids.generate_task_id();
        let b = ids.generate_task_id();
        assert_ne!(a, b);
    }

    #[test]
    fn timestamp_part_comes_from_clock() {
        let fixed = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let ids = UlidGenerator::new(FixedClock::new(fixed));

        let a = ids.generate_task_id();
        let b = ids.generate_task_id();

        assert_ne!(a, b);
        assert_eq!(a.as_ulid().timestamp_ms(), fixed.timestamp_millis() as u64);
        assert_eq!(b.as_ulid().timestamp_ms(), fixed.timestamp_millis() as u64);
    }
}
