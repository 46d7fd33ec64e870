//! Wall-clock abstraction.
//!
//! Quota rollover works on the *local calendar date*, so the clock exposes the
//! date and the next local midnight rather than raw elapsed time.

use chrono::{DateTime, Duration, FixedOffset, Local, NaiveDate, TimeZone, Utc};
use std::{
    fmt::Debug,
    sync::{Mutex, PoisonError},
};

pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;

    /// Current calendar date in the local time zone.
    fn today(&self) -> NaiveDate;

    /// The instant at which the local calendar date next changes.
    fn next_midnight(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }

    fn next_midnight(&self) -> DateTime<Utc> {
        let now = Local::now();
        let midnight = now
            .date_naive()
            .succ_opt()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .and_then(|naive| Local.from_local_datetime(&naive).earliest());

        // A DST gap can swallow midnight itself; fall back to a plain day.
        midnight
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| now.with_timezone(&Utc) + Duration::days(1))
    }
}

/// A clock that only moves when told to. Dates are computed in its fixed offset.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<FixedOffset>>,
}

impl ManualClock {
    pub fn new(now: DateTime<FixedOffset>) -> Self {
        Self { now: Mutex::new(now) }
    }

    /// Parses an RFC 3339 timestamp such as `2024-03-10T23:59:00+01:00`.
    pub fn at(rfc3339: &str) -> Result<Self, chrono::ParseError> {
        DateTime::parse_from_rfc3339(rfc3339).map(Self::new)
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now = *now + by;
    }

    pub fn set(&self, to: DateTime<FixedOffset>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }

    fn local_now(&self) -> DateTime<FixedOffset> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.local_now().with_timezone(&Utc)
    }

    fn today(&self) -> NaiveDate {
        self.local_now().date_naive()
    }

    fn next_midnight(&self) -> DateTime<Utc> {
        let now = self.local_now();
        now.date_naive()
            .succ_opt()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .and_then(|naive| now.offset().from_local_datetime(&naive).single())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| now.with_timezone(&Utc) + Duration::days(1))
    }
}
