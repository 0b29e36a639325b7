// Time source for open-loop pacing
//
// Every actuation primitive blocks for a computed duration. Routing those waits through
// a Clock lets tests advance virtual time instead of sleeping.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

pub trait Clock {
    /// Block for `duration`
    fn sleep(&self, duration: Duration);
}

/// Wall-clock time via `std::thread::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Virtual time that only advances when slept on. Clones share the same counter.
#[derive(Debug, Clone, Default)]
pub struct VirtualClock {
    elapsed: Rc<Cell<Duration>>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total time slept so far
    pub fn elapsed(&self) -> Duration {
        self.elapsed.get()
    }
}

impl Clock for VirtualClock {
    fn sleep(&self, duration: Duration) {
        self.elapsed.set(self.elapsed.get().saturating_add(duration));
    }
}

/// Convert modeled seconds to a Duration.
/// NaN and negative values map to zero, values too large for a Duration saturate.
pub fn secs(seconds: f64) -> Duration {
    if seconds.is_nan() || seconds <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
}
