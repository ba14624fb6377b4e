//! Clock abstraction for testable time handling.

use super::Timestamp;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::Arc;

/// A clock that provides the current UTC time.
pub trait Clock: Debug + Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Timestamp;
}

/// Clock handle shared between phases.
pub type SharedClock = Arc<dyn Clock>;

/// Real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Returns the system clock as a shared handle.
    #[must_use]
    pub fn shared() -> SharedClock {
        Arc::new(Self)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// Fake clock for testing with controllable time.
///
/// Clones share the same underlying instant.
#[derive(Debug, Clone)]
pub struct FakeClock {
    current: Arc<Mutex<Timestamp>>,
}

impl FakeClock {
    /// Creates a fake clock stopped at `start`.
    #[must_use]
    pub fn new(start: Timestamp) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Advance the clock by the given duration.
    pub fn advance(&self, duration: Duration) {
        *self.current.lock() += duration;
    }

    /// Set the clock to a specific instant.
    pub fn set(&self, instant: Timestamp) {
        *self.current.lock() = instant;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Timestamp {
        *self.current.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_fake_clock_advance_is_shared() {
        let start = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        let clock = FakeClock::new(start);
        let handle: SharedClock = Arc::new(clock.clone());

        clock.advance(Duration::minutes(301));

        assert_eq!(handle.now() - start, Duration::minutes(301));
    }

    #[test]
    fn test_fake_clock_set() {
        let clock = FakeClock::default();
        let target = Utc.with_ymd_and_hms(2030, 5, 5, 5, 5, 5).unwrap();
        clock.set(target);
        assert_eq!(clock.now(), target);
    }

    #[test]
    fn test_system_clock_moves_forward() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
