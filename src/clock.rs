use std::sync::Mutex;

use chrono::{DateTime, Duration, TimeDelta, Utc};

/// Source of "now" for every time-driven transition.
///
/// Services never call `Utc::now()` directly so tests can pin the clock to a
/// point relative to a workshop's start.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A settable clock for tests and for replaying scheduler runs.
pub struct FixedClock {
    time: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(time: DateTime<Utc>) -> Self {
        Self { time: Mutex::new(time) }
    }

    pub fn set(&self, time: DateTime<Utc>) {
        if let Ok(mut guard) = self.time.lock() {
            *guard = time;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.time.lock() {
            *guard += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.time.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// `n` days, clamped to the range chrono can represent.
pub fn days(n: i64) -> TimeDelta {
    TimeDelta::try_days(n).unwrap_or(if n < 0 { TimeDelta::MIN } else { TimeDelta::MAX })
}

/// `n` hours, clamped to the range chrono can represent.
pub fn hours(n: i64) -> TimeDelta {
    TimeDelta::try_hours(n).unwrap_or(if n < 0 { TimeDelta::MIN } else { TimeDelta::MAX })
}

/// `at + delta`, pinned to the earliest or latest representable instant on overflow.
pub fn saturating_add(at: DateTime<Utc>, delta: TimeDelta) -> DateTime<Utc> {
    at.checked_add_signed(delta).unwrap_or(if delta < TimeDelta::zero() {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}

pub fn saturating_sub(at: DateTime<Utc>, delta: TimeDelta) -> DateTime<Utc> {
    at.checked_sub_signed(delta).unwrap_or(if delta < TimeDelta::zero() {
        DateTime::<Utc>::MAX_UTC
    } else {
        DateTime::<Utc>::MIN_UTC
    })
}
