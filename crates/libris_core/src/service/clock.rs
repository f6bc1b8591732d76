//! Time source abstraction for lifecycle operations.
//!
//! # Responsibility
//! - Supply "now"/"today" to the engine so date stamping and due-date
//!   validation never read the wall clock directly.
//!
//! # Invariants
//! - Dates derived from a clock are UTC; day granularity everywhere.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};

/// Time source consulted by the lifecycle engine.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;

    /// Current calendar day, UTC.
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Wall-clock time source used in production.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Pinned time source for deterministic tests and replays.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    instant: DateTime<Utc>,
}

impl FixedClock {
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self { instant }
    }

    /// Pins the clock to midnight UTC on the given day.
    pub fn on_day(day: NaiveDate) -> Self {
        Self {
            instant: Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN)),
        }
    }

    /// Moves the pinned instant.
    pub fn set(&mut self, instant: DateTime<Utc>) {
        self.instant = instant;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.instant
    }
}
