//! Wall-clock source for subsystem ticks.
//!
//! Profile lookups are anchored to local midnight of the day a subsystem was
//! started, so every tick reads the time through a [`Clock`] that tests can
//! replace with a [`ManualClock`].

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Local, NaiveTime, TimeDelta};

/// Source of the current local time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

/// The system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// A clock that only moves when told to.
///
/// # Examples
///
/// ```
/// use chrono::{Local, TimeDelta};
/// use prosumer_sim::sim::clock::{Clock, ManualClock};
///
/// let start = Local::now();
/// let clock = ManualClock::new(start);
/// clock.advance(TimeDelta::minutes(30));
/// assert_eq!(clock.now() - start, TimeDelta::minutes(30));
/// ```
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Local>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Local>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Local>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Seconds from local midnight of `anchor`'s day to `now`.
///
/// Computed on naive local time so DST shifts do not move the anchor.
/// Never negative.
pub fn secs_since_midnight_of(anchor: DateTime<Local>, now: DateTime<Local>) -> f64 {
    let midnight = anchor.date_naive().and_time(NaiveTime::MIN);
    let elapsed = now.naive_local() - midnight;
    (elapsed.num_milliseconds() as f64 / 1000.0).max(0.0)
}
