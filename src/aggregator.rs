//! Daily Step Aggregator
//!
//! Accumulates step events into an in-memory counter for the current local
//! date and persists it to a [`StepStore`] on a throttled schedule.
//!
//! ## Persistence rules
//!
//! - Increments are in-memory and never fail.
//! - A write replaces the whole record for (user, date), so flushing twice
//!   in a row stores the same value.
//! - `maybe_flush` writes at most once per `flush_interval`. A failed write
//!   lifts the throttle so the next increment or tick retries it.
//! - `reset` writes 0 immediately.
//! - When the date changes, yesterday's unflushed total is kept as a pending
//!   final write and today's counter starts at 0.
//! - A day's count is never written before the stored total for that day is
//!   known. Steps counted while the store was unreadable are added to the
//!   stored total on the first successful read.
//!
//! Store failures are logged here and never reach the user.

use crate::clock::Clock;
use crate::config::AggregatorConfig;
use crate::storage::{StepStore, StoreError};
use crate::types::{DailyTotal, StepEvent};
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Counters for the session summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatorStats {
    pub events: u64,
    pub flushes: u64,
    pub failed_flushes: u64,
    pub rollovers: u64,
}

/// Final total of an earlier date waiting to be stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingDay {
    date: NaiveDate,
    steps: u64,
    /// `steps` already includes the stored total for `date`.
    merged: bool,
}

/// Per-day step counter with throttled persistence.
pub struct DailyStepAggregator {
    user_id: String,
    store: Arc<dyn StepStore>,
    clock: Arc<dyn Clock>,

    date: NaiveDate,
    count: u64,
    /// `count` includes today's stored total.
    hydrated: bool,
    /// In-memory count differs from the last stored value.
    dirty: bool,
    /// Final totals of earlier dates that have not been stored yet.
    pending_days: Vec<PendingDay>,
    /// Last write failed; the next `maybe_flush` ignores the throttle.
    retry_pending: bool,

    flush_interval: Duration,
    last_flush_at: Option<Instant>,

    stats: AggregatorStats,
}

impl DailyStepAggregator {
    pub fn new(
        user_id: impl Into<String>,
        store: Arc<dyn StepStore>,
        clock: Arc<dyn Clock>,
        config: &AggregatorConfig,
    ) -> Self {
        let date = clock.today();
        Self {
            user_id: user_id.into(),
            store,
            clock,
            date,
            count: 0,
            hydrated: false,
            dirty: false,
            pending_days: Vec::new(),
            retry_pending: false,
            flush_interval: config.flush_interval(),
            last_flush_at: None,
            stats: AggregatorStats::default(),
        }
    }

    /// Continue today's persisted total instead of starting from 0.
    ///
    /// Steps already counted in memory are added to the stored total. A
    /// failed read leaves the counter as is; the merge is then retried
    /// before the first write.
    pub async fn hydrate(&mut self) {
        self.roll_over_if_needed();
        if self.hydrated {
            return;
        }
        match self.merge_today().await {
            Ok(stored) if stored > 0 => {
                info!(
                    user = %self.user_id,
                    date = %self.date,
                    stored,
                    steps = self.count,
                    "[Aggregator] Resuming today's stored total"
                );
            }
            Ok(_) => {}
            Err(e) => {
                warn!(user = %self.user_id, error = %e, "[Aggregator] Could not read today's total, will merge before the first write");
            }
        }
    }

    /// Count one detected step.
    pub fn on_step_event(&mut self, _event: StepEvent) {
        self.on_steps(1);
    }

    /// Count `n` steps at once (synthetic source ticks).
    pub fn on_steps(&mut self, n: u64) {
        self.roll_over_if_needed();
        if n == 0 {
            return;
        }
        self.count = self.count.saturating_add(n);
        self.dirty = true;
        self.stats.events += n;
    }

    /// Write pending earlier days, then today's counter.
    ///
    /// Returns the stored value for today. On failure the state stays dirty
    /// and the next `maybe_flush` retries. A day whose stored total could not
    /// be read is not written.
    pub async fn flush(&mut self) -> Result<u64, StoreError> {
        self.roll_over_if_needed();

        while let Some(mut pending) = self.pending_days.first().copied() {
            if !pending.merged {
                match self.read_stored(pending.date).await {
                    Ok(stored) => {
                        pending.steps = pending.steps.saturating_add(stored);
                        pending.merged = true;
                        self.pending_days[0] = pending;
                    }
                    Err(e) => return Err(self.flush_failed(pending.date, e)),
                }
            }
            if let Err(e) = self.store.write(&self.user_id, pending.date, pending.steps).await {
                return Err(self.flush_failed(pending.date, e));
            }
            debug!(user = %self.user_id, date = %pending.date, steps = pending.steps, "[Aggregator] Stored final total for previous day");
            self.pending_days.remove(0);
        }

        if !self.hydrated {
            if let Err(e) = self.merge_today().await {
                return Err(self.flush_failed(self.date, e));
            }
        }

        let (date, steps) = (self.date, self.count);
        match self.store.write(&self.user_id, date, steps).await {
            Ok(record) => {
                self.dirty = false;
                self.retry_pending = false;
                self.last_flush_at = Some(Instant::now());
                self.stats.flushes += 1;
                debug!(user = %self.user_id, date = %date, steps = record.steps, "[Aggregator] Flushed");
                Ok(record.steps)
            }
            Err(e) => Err(self.flush_failed(date, e)),
        }
    }

    /// Flush when there is something to write and the throttle allows it.
    ///
    /// Returns true when a write succeeded.
    pub async fn maybe_flush(&mut self) -> bool {
        self.roll_over_if_needed();

        if !self.dirty && self.pending_days.is_empty() {
            return false;
        }

        let due = self.retry_pending
            || !self.pending_days.is_empty()
            || self
                .last_flush_at
                .map_or(true, |at| at.elapsed() >= self.flush_interval);
        if !due {
            return false;
        }

        self.flush().await.is_ok()
    }

    /// Set today's count to 0 and store it immediately.
    pub async fn reset(&mut self) -> Result<u64, StoreError> {
        self.roll_over_if_needed();
        info!(user = %self.user_id, date = %self.date, previous = self.count, "[Aggregator] Resetting today's steps");
        self.count = 0;
        // An explicit reset replaces whatever is stored.
        self.hydrated = true;
        self.dirty = true;
        self.flush().await
    }

    /// Today's in-memory total.
    pub fn snapshot(&mut self) -> DailyTotal {
        self.roll_over_if_needed();
        DailyTotal {
            date: self.date,
            count: self.count,
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// True once today's stored total is included in the count.
    pub fn is_hydrated(&self) -> bool {
        self.hydrated
    }

    /// True when some count has not been stored yet.
    pub fn has_unflushed(&self) -> bool {
        self.dirty || !self.pending_days.is_empty()
    }

    pub fn stats(&self) -> AggregatorStats {
        self.stats
    }

    pub fn store(&self) -> &Arc<dyn StepStore> {
        &self.store
    }

    fn roll_over_if_needed(&mut self) {
        let today = self.clock.today();
        if today == self.date {
            return;
        }

        info!(
            user = %self.user_id,
            from = %self.date,
            to = %today,
            steps = self.count,
            "[Aggregator] Day rollover"
        );
        if self.dirty {
            self.pending_days.push(PendingDay {
                date: self.date,
                steps: self.count,
                merged: self.hydrated,
            });
        }
        self.date = today;
        self.count = 0;
        self.hydrated = false;
        self.dirty = false;
        self.stats.rollovers += 1;
    }

    async fn read_stored(&self, date: NaiveDate) -> Result<u64, StoreError> {
        Ok(self
            .store
            .read(&self.user_id, date)
            .await?
            .map_or(0, |record| record.steps))
    }

    /// Add today's stored total to the in-memory count. Returns the stored value.
    async fn merge_today(&mut self) -> Result<u64, StoreError> {
        let stored = self.read_stored(self.date).await?;
        self.count = self.count.saturating_add(stored);
        self.hydrated = true;
        Ok(stored)
    }

    fn flush_failed(&mut self, date: NaiveDate, err: StoreError) -> StoreError {
        self.retry_pending = true;
        self.stats.failed_flushes += 1;
        warn!(
            user = %self.user_id,
            date = %date,
            backend = self.store.backend_name(),
            error = %err,
            "[Aggregator] Flush failed, will retry"
        );
        err
    }
}

impl std::fmt::Debug for DailyStepAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DailyStepAggregator")
            .field("user_id", &self.user_id)
            .field("backend", &self.store.backend_name())
            .field("date", &self.date)
            .field("count", &self.count)
            .field("hydrated", &self.hydrated)
            .field("dirty", &self.dirty)
            .field("pending_days", &self.pending_days)
            .field("retry_pending", &self.retry_pending)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::InMemoryStepStore;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn setup(interval_secs: u64) -> (Arc<InMemoryStepStore>, Arc<ManualClock>, DailyStepAggregator) {
        let store = Arc::new(InMemoryStepStore::new());
        let clock = Arc::new(ManualClock::new(day(10)));
        let config = AggregatorConfig {
            flush_interval_secs: interval_secs,
        };
        let agg = DailyStepAggregator::new("u1", store.clone(), clock.clone(), &config);
        (store, clock, agg)
    }

    fn step() -> StepEvent {
        StepEvent { timestamp_ms: 0 }
    }

    async fn stored(store: &InMemoryStepStore, date: NaiveDate) -> Option<u64> {
        store.read("u1", date).await.unwrap().map(|r| r.steps)
    }

    #[tokio::test]
    async fn test_events_are_in_memory_until_flush() {
        let (store, _clock, mut agg) = setup(10);
        agg.on_step_event(step());
        agg.on_step_event(step());

        assert_eq!(agg.count(), 2);
        assert_eq!(stored(&store, day(10)).await, None);

        agg.flush().await.unwrap();
        assert_eq!(stored(&store, day(10)).await, Some(2));
    }

    #[tokio::test]
    async fn test_double_flush_is_idempotent() {
        let (store, _clock, mut agg) = setup(10);
        agg.on_steps(5);

        assert_eq!(agg.flush().await.unwrap(), 5);
        assert_eq!(agg.flush().await.unwrap(), 5);
        assert_eq!(stored(&store, day(10)).await, Some(5));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_reset_stores_zero_immediately() {
        let (store, _clock, mut agg) = setup(3600);
        agg.on_steps(40);
        assert!(agg.maybe_flush().await);
        agg.on_steps(2);

        agg.reset().await.unwrap();
        assert_eq!(agg.count(), 0);
        assert_eq!(stored(&store, day(10)).await, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_maybe_flush_is_throttled() {
        let (store, _clock, mut agg) = setup(10);

        agg.on_steps(1);
        assert!(agg.maybe_flush().await, "first flush is not throttled");

        agg.on_steps(1);
        assert!(!agg.maybe_flush().await);
        assert_eq!(stored(&store, day(10)).await, Some(1));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(agg.maybe_flush().await);
        assert_eq!(stored(&store, day(10)).await, Some(2));
    }

    #[tokio::test]
    async fn test_maybe_flush_skips_when_clean() {
        let (store, _clock, mut agg) = setup(0);
        assert!(!agg.maybe_flush().await);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_flush_retries_without_throttle() {
        let (store, _clock, mut agg) = setup(3600);
        agg.on_steps(1);
        assert!(agg.maybe_flush().await);

        store.set_available(false);
        agg.on_steps(1);
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(!agg.maybe_flush().await);
        assert!(agg.has_unflushed());
        assert_eq!(agg.stats().failed_flushes, 1);

        store.set_available(true);
        agg.on_steps(1);
        // Well inside the throttle window, but the pending retry bypasses it.
        assert!(agg.maybe_flush().await);
        assert_eq!(stored(&store, day(10)).await, Some(3));
        assert!(!agg.has_unflushed());
    }

    #[tokio::test]
    async fn test_rollover_keeps_both_days() {
        let (store, clock, mut agg) = setup(3600);
        agg.on_steps(120);

        clock.advance_days(1);
        agg.on_steps(3);
        assert_eq!(agg.date(), day(11));
        assert_eq!(agg.count(), 3);

        agg.flush().await.unwrap();
        assert_eq!(stored(&store, day(10)).await, Some(120));
        assert_eq!(stored(&store, day(11)).await, Some(3));
        assert_eq!(agg.stats().rollovers, 1);
    }

    #[tokio::test]
    async fn test_rollover_without_new_steps_still_stores_previous_day() {
        let (store, clock, mut agg) = setup(3600);
        agg.on_steps(7);
        assert!(agg.maybe_flush().await);
        agg.on_steps(1);

        clock.advance_days(1);
        assert!(agg.maybe_flush().await);
        assert_eq!(stored(&store, day(10)).await, Some(8));
    }

    #[tokio::test]
    async fn test_rollover_failure_keeps_pending_day() {
        let (store, clock, mut agg) = setup(3600);
        agg.on_steps(9);
        clock.advance_days(1);

        store.set_available(false);
        assert!(agg.flush().await.is_err());
        store.set_available(true);

        agg.flush().await.unwrap();
        assert_eq!(stored(&store, day(10)).await, Some(9));
        assert_eq!(stored(&store, day(11)).await, Some(0));
    }

    #[tokio::test]
    async fn test_hydrate_resumes_stored_total() {
        let (store, _clock, mut agg) = setup(10);
        store.write("u1", day(10), 250).await.unwrap();

        agg.hydrate().await;
        agg.on_steps(1);
        assert_eq!(agg.count(), 251);
    }

    #[tokio::test]
    async fn test_hydrate_tolerates_store_failure() {
        let (store, _clock, mut agg) = setup(10);
        store.set_available(false);
        agg.hydrate().await;
        assert_eq!(agg.count(), 0);
    }

    #[tokio::test]
    async fn test_failed_hydrate_never_overwrites_stored_total() {
        let (store, _clock, mut agg) = setup(10);
        store.write("u1", day(10), 2_500).await.unwrap();

        store.set_available(false);
        agg.hydrate().await;
        assert!(!agg.is_hydrated());
        agg.on_steps(3);
        assert!(agg.flush().await.is_err());

        store.set_available(true);
        assert_eq!(stored(&store, day(10)).await, Some(2_500));

        assert_eq!(agg.flush().await.unwrap(), 2_503);
        assert!(agg.is_hydrated());
        assert_eq!(agg.count(), 2_503);
        assert_eq!(stored(&store, day(10)).await, Some(2_503));
    }

    #[tokio::test]
    async fn test_unread_day_is_not_written_while_store_unreadable() {
        let (store, _clock, mut agg) = setup(10);
        store.write("u1", day(10), 800).await.unwrap();
        let writes = store.write_count();

        store.set_available(false);
        agg.hydrate().await;
        assert!(!agg.maybe_flush().await, "nothing counted yet");
        assert!(agg.flush().await.is_err());
        assert_eq!(store.write_count(), writes);
        assert_eq!(agg.stats().failed_flushes, 1);
    }

    #[tokio::test]
    async fn test_rollover_merges_unread_previous_day() {
        let (store, clock, mut agg) = setup(3600);
        store.write("u1", day(10), 1_000).await.unwrap();

        store.set_available(false);
        agg.hydrate().await;
        agg.on_steps(20);
        clock.advance_days(1);
        agg.on_steps(2);
        store.set_available(true);

        agg.flush().await.unwrap();
        assert_eq!(stored(&store, day(10)).await, Some(1_020));
        assert_eq!(stored(&store, day(11)).await, Some(2));
    }

    #[tokio::test]
    async fn test_reset_overrides_unread_stored_total() {
        let (store, _clock, mut agg) = setup(10);
        store.write("u1", day(10), 600).await.unwrap();

        store.set_available(false);
        agg.hydrate().await;
        store.set_available(true);

        assert_eq!(agg.reset().await.unwrap(), 0);
        assert_eq!(stored(&store, day(10)).await, Some(0));
    }
}
