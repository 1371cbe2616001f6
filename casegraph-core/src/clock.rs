//! Clock port.
//!
//! Every "now", "today" and "yesterday" computed by the engines and the
//! periodic jobs goes through a [`Clock`], so tests can pin time.

use chrono::{Duration, Local, NaiveDate, NaiveDateTime};
use parking_lot::Mutex;

/// Format of timestamp attributes, `YYYY-MM-DDTHH:MM:SS`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Format of date attributes, `YYYY-MM-DD`.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Provides the current local time.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }

    fn yesterday(&self) -> NaiveDate {
        self.today() - Duration::days(1)
    }

    /// Current time rendered as a timestamp attribute value.
    fn timestamp(&self) -> String {
        self.now().format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Wall clock in the local time zone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Clock pinned to an explicit instant. Can be moved with [`FixedClock::set`].
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Pins the clock at midnight of the given date.
    pub fn at_date(date: NaiveDate) -> Self {
        Self::new(date.and_time(chrono::NaiveTime::MIN))
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock() = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock()
    }
}

/// Parses a date attribute. Accepts plain dates and timestamps.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
                .ok()
                .map(|dt| dt.date())
        })
        .or_else(|| {
            // dd.mm.yyyy is common in imported records
            NaiveDate::parse_from_str(value, "%d.%m.%Y").ok()
        })
}
