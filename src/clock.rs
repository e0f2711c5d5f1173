//! Monotonic + wall-clock time source, injected everywhere a timer is read.
//!
//! Every window prune, soak check, and cooldown comparison goes through this
//! trait instead of `Instant::now()` / `Utc::now()` directly, so multi-hour
//! scenarios can be driven deterministically in tests.

use std::cell::Cell;
use std::rc::Rc;

use chrono::Utc;

pub trait Clock {
    /// Monotonic wall time, milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Test clock: starts at a fixed instant and only moves when told to.
#[derive(Clone)]
pub struct FakeClock {
    now_ms: Rc<Cell<i64>>,
}

impl FakeClock {
    pub fn new(start_ms: i64) -> Self {
        Self { now_ms: Rc::new(Cell::new(start_ms)) }
    }

    pub fn advance_ms(&self, delta_ms: i64) {
        self.now_ms.set(self.now_ms.get() + delta_ms);
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance_ms(secs * 1_000);
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.get()
    }
}

pub const MS_PER_SEC: i64 = 1_000;
pub const MS_PER_MIN: i64 = 60 * MS_PER_SEC;
