//! Wall-clock abstraction so window and expiry logic can be driven by tests.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current wall-clock time
    fn now(&self) -> DateTime<Utc>;
}

/// Real system clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests.
///
/// Time only moves when [`ManualClock::advance`] or [`ManualClock::set`] is
/// called, unless a per-read `tick` is configured.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    tick: TimeDelta,
}

impl ManualClock {
    /// Clock frozen at `start`
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(start),
            tick: TimeDelta::zero(),
        })
    }

    /// Clock that advances by `tick` after every read, so successive
    /// readings are strictly ordered.
    #[must_use]
    pub fn ticking(start: DateTime<Utc>, tick: TimeDelta) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(start),
            tick,
        })
    }

    /// Move the clock forward
    pub fn advance(&self, by: TimeDelta) {
        *self.now.lock() += by;
    }

    /// Jump to an absolute time
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let mut now = self.now.lock();
        let current = *now;
        *now += self.tick;
        current
    }
}
