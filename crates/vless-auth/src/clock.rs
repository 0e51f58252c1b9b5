//! Injectable wall clock.

use std::sync::Arc;

use parking_lot::Mutex;
use time::{Duration, OffsetDateTime};

/// Source of "now" for expiry and TTL decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;

    #[inline]
    fn unix_now(&self) -> i64 {
        self.now().unix_timestamp()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Clock that only moves when told to. Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<OffsetDateTime>>,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: std::time::Duration) {
        let mut now = self.now.lock();
        *now += Duration::try_from(by).unwrap_or(Duration::MAX);
    }

    pub fn set(&self, to: OffsetDateTime) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn manual_clock_advances_all_clones() {
        let clock = ManualClock::new(datetime!(2024-01-01 0:00 UTC));
        let other = clock.clone();
        clock.advance(std::time::Duration::from_secs(90));
        assert_eq!(other.now(), datetime!(2024-01-01 0:01:30 UTC));
        assert_eq!(other.unix_now(), 1_704_067_290);
    }
}
