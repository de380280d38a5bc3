use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};

/// Time source injected into the engine.
///
/// `now` drives all animation scheduling (monotonic); `civil_now` is
/// only consulted by the schedule-driven producers (nightlight, clock).
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
    fn civil_now(&self) -> DateTime<Local>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn civil_now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// A clock that only moves when told to, for tests.
pub struct ManualClock {
    base: Instant,
    civil_base: DateTime<Local>,
    elapsed: Mutex<Duration>,
}

impl ManualClock {
    pub fn new(civil_base: DateTime<Local>) -> Self {
        Self {
            base: Instant::now(),
            civil_base,
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut elapsed = self
            .elapsed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *elapsed += by;
    }

    fn offset(&self) -> Duration {
        *self
            .elapsed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.offset()
    }

    fn civil_now(&self) -> DateTime<Local> {
        self.civil_base
            + chrono::Duration::from_std(self.offset()).unwrap_or(chrono::Duration::zero())
    }
}

#[cfg(test)]
mod tests {
    use super::{Clock, ManualClock};
    use chrono::{Local, TimeZone};
    use std::time::Duration;

    #[test]
    fn manual_clock_advances_both_time_scales() {
        let base = Local
            .with_ymd_and_hms(2024, 6, 1, 12, 0, 0)
            .single()
            .expect("valid civil base");
        let clock = ManualClock::new(base);
        let start = clock.now();

        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now() - start, Duration::from_secs(90));
        assert_eq!(clock.civil_now() - base, chrono::Duration::seconds(90));
    }
}
