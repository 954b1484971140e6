//! History Query
//!
//! Returns a gap-filled series of daily totals over a trailing window that
//! ends today (inclusive). The series always has exactly one entry per day
//! in ascending date order. Days with no record, or whose read failed,
//! report 0.

use crate::config::defaults::{MONTH_WINDOW_DAYS, WEEK_WINDOW_DAYS};
use crate::storage::StepStore;
use crate::types::DailyTotal;
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Trailing window length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryWindow {
    Week,
    Month,
    Days(u32),
}

impl HistoryWindow {
    pub const fn days(self) -> u32 {
        match self {
            Self::Week => WEEK_WINDOW_DAYS,
            Self::Month => MONTH_WINDOW_DAYS,
            Self::Days(n) => n,
        }
    }
}

impl fmt::Display for HistoryWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Week => write!(f, "week"),
            Self::Month => write!(f, "month"),
            Self::Days(n) => write!(f, "{n} days"),
        }
    }
}

/// History query errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    #[error("invalid history window: {requested} days (allowed 1..={max})")]
    InvalidWindow { requested: u32, max: u32 },
    #[error("step session is closed")]
    SessionClosed,
}

/// Reads daily totals from a [`StepStore`].
#[derive(Clone)]
pub struct HistoryQuery {
    store: Arc<dyn StepStore>,
    max_window_days: u32,
}

impl HistoryQuery {
    pub fn new(store: Arc<dyn StepStore>, max_window_days: u32) -> Self {
        Self {
            store,
            max_window_days,
        }
    }

    /// Check a window length before touching the store.
    pub fn validate(&self, window: HistoryWindow) -> Result<u32, HistoryError> {
        let n = window.days();
        if n == 0 || n > self.max_window_days {
            return Err(HistoryError::InvalidWindow {
                requested: n,
                max: self.max_window_days,
            });
        }
        Ok(n)
    }

    /// `n` daily totals for `user_id`, oldest first, ending at `today`.
    pub async fn query(
        &self,
        user_id: &str,
        window: HistoryWindow,
        today: NaiveDate,
    ) -> Result<Vec<DailyTotal>, HistoryError> {
        let n = self.validate(window)?;
        // A window reaching before the first representable date is rejected
        // rather than shortened.
        let start = today
            .checked_sub_days(Days::new(u64::from(n - 1)))
            .ok_or(HistoryError::InvalidWindow {
                requested: n,
                max: self.max_window_days,
            })?;
        let mut series = Vec::with_capacity(n as usize);

        for date in start.iter_days().take(n as usize) {
            let count = match self.store.read(user_id, date).await {
                Ok(Some(record)) => record.steps,
                Ok(None) => 0,
                Err(e) => {
                    warn!(user = %user_id, date = %date, error = %e, "[History] Read failed, reporting 0");
                    0
                }
            };
            series.push(DailyTotal { date, count });
        }

        Ok(series)
    }
}

impl fmt::Debug for HistoryQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryQuery")
            .field("backend", &self.store.backend_name())
            .field("max_window_days", &self.max_window_days)
            .finish()
    }
}
