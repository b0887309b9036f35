//! Injectable clock (spec.md §9 "Clock boundary"). Every timestamp comparison in the engine —
//! `is_past_deadline`, registration timestamps, the scheduler's minute tick — goes through a
//! `Clock` rather than calling `Utc::now()` directly, so tests can advance time deterministically.
//! Mirrors the `TimeSource` trait the reference architecture uses in its own alert scheduler
//! (`event/alert.rs`), generalized here to the whole engine rather than just the scheduler.

use chrono::{DateTime, Utc};
use std::sync::Arc;

pub trait Clock: Send + Sync + std::fmt::Debug + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl Clock for RealClock {
    #[inline]
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub type SharedClock = Arc<dyn Clock>;

pub fn real_clock() -> SharedClock {
    Arc::new(RealClock)
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use parking_lot::Mutex;

    /// A clock that only advances when told to, for deterministic scheduler/deadline tests.
    #[derive(Debug)]
    pub struct TestClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl TestClock {
        pub fn new(start: DateTime<Utc>) -> Arc<Self> {
            Arc::new(TestClock {
                now: Mutex::new(start),
            })
        }

        pub fn advance(&self, delta: chrono::Duration) {
            *self.now.lock() += delta;
        }

        pub fn set(&self, now: DateTime<Utc>) {
            *self.now.lock() = now;
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock()
        }
    }
}
