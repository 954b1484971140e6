//! Calendar clock
//!
//! Daily buckets are keyed by the device's local date. The aggregator asks
//! a [`Clock`] for today's date so rollover can be driven from tests.

use chrono::{DateTime, Days, Local, NaiveDate, Utc};
use std::sync::Mutex;

/// Source of the current calendar date.
pub trait Clock: Send + Sync {
    /// Today's date in the device's local time zone.
    fn today(&self) -> NaiveDate;

    /// Current wall-clock instant.
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// The real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Hand-driven clock for tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    date: Mutex<NaiveDate>,
}

impl ManualClock {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date: Mutex::new(date),
        }
    }

    pub fn set_date(&self, date: NaiveDate) {
        if let Ok(mut d) = self.date.lock() {
            *d = date;
        }
    }

    /// Move the date forward by `days`.
    pub fn advance_days(&self, days: u64) {
        if let Ok(mut d) = self.date.lock() {
            if let Some(next) = d.checked_add_days(Days::new(days)) {
                *d = next;
            }
        }
    }
}

impl Clock for ManualClock {
    fn today(&self) -> NaiveDate {
        match self.date.lock() {
            Ok(d) => *d,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances_across_month_end() {
        let clock = ManualClock::new(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());
        clock.advance_days(1);
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
    }

    #[test]
    fn test_manual_clock_set() {
        let clock = ManualClock::new(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        let d = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();
        clock.set_date(d);
        assert_eq!(clock.today(), d);
    }
}
