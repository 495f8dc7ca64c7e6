//! Wall-clock access for the stages that schedule work in real time.
//!
//! The energy integrator takes a `TimeSource` so checkpoint and reset
//! schedules can be driven by a manual clock in tests.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of UTC wall-clock time.
pub trait TimeSource: Send {
    fn now(&self) -> SystemTime;
}

/// The operating system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<SystemTime>>,
}

impl ManualClock {
    pub fn at_epoch_seconds(seconds: i64) -> Self {
        Self {
            now: Arc::new(Mutex::new(from_epoch_seconds(seconds))),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
    }

    pub fn set(&self, to: SystemTime) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now = to;
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Whole seconds since the Unix epoch; negative before 1970.
pub fn epoch_seconds(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs() as i64,
        Err(before) => -(before.duration().as_secs() as i64),
    }
}

pub fn from_epoch_seconds(seconds: i64) -> SystemTime {
    if seconds >= 0 {
        UNIX_EPOCH + Duration::from_secs(seconds as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(seconds.unsigned_abs())
    }
}

/// Nanoseconds since the Unix epoch, saturating at the `i64` range.
pub fn epoch_nanos(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX),
        Err(before) => i64::try_from(before.duration().as_nanos())
            .map(|nanos| -nanos)
            .unwrap_or(i64::MIN),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_seconds_round_trip() {
        for seconds in [0, 1_700_000_000, -86_400] {
            assert_eq!(epoch_seconds(from_epoch_seconds(seconds)), seconds);
        }
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::at_epoch_seconds(100);
        let observer = clock.clone();
        clock.advance(Duration::from_secs(50));
        assert_eq!(epoch_seconds(observer.now()), 150);
        assert_eq!(epoch_nanos(observer.now()), 150_000_000_000);
    }
}
