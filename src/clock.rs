//! Time source for minute-granularity page statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

const MILLIS_PER_MINUTE: u64 = 60 * 1000;

/// Injectable "current time" capability.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;

    /// Whole minutes since the Unix epoch.
    fn now_minutes(&self) -> u32 {
        millis_to_minutes(self.now_millis())
    }
}

pub fn millis_to_minutes(millis: u64) -> u32 {
    (millis / MILLIS_PER_MINUTE) as u32
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn at_minute(minute: u32) -> Self {
        Self {
            millis: AtomicU64::new(minute as u64 * MILLIS_PER_MINUTE),
        }
    }

    pub fn set_minute(&self, minute: u32) {
        self.millis
            .store(minute as u64 * MILLIS_PER_MINUTE, Ordering::SeqCst);
    }

    pub fn advance_minutes(&self, minutes: u32) {
        self.millis
            .fetch_add(minutes as u64 * MILLIS_PER_MINUTE, Ordering::SeqCst);
    }

    /// Epoch millis for a given minute, handy for building payload timestamps.
    pub fn millis_at_minute(minute: u32) -> u64 {
        minute as u64 * MILLIS_PER_MINUTE
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::at_minute(10);
        assert_eq!(clock.now_minutes(), 10);
        clock.advance_minutes(2);
        assert_eq!(clock.now_minutes(), 12);
        assert_eq!(clock.now_millis(), 12 * 60 * 1000);
    }

    #[test]
    fn test_partial_minutes_floor() {
        assert_eq!(millis_to_minutes(59_999), 0);
        assert_eq!(millis_to_minutes(60_000), 1);
    }
}
