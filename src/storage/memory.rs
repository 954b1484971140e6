//! In-memory step store
//!
//! Thread-safe via `RwLock`. Not durable; data is lost on restart.
//! `set_available(false)` makes every call fail with
//! [`StoreError::Unavailable`], which is how persistence failures are
//! exercised in tests.

use super::{ChangeFeed, RecordWatch, StepStore, StoreError};
use crate::types::{record_key, DailyStepRecord};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

#[derive(Debug)]
pub struct InMemoryStepStore {
    records: RwLock<HashMap<String, DailyStepRecord>>,
    available: AtomicBool,
    writes: AtomicU64,
    feed: ChangeFeed,
}

impl InMemoryStepStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            writes: AtomicU64::new(0),
            feed: ChangeFeed::default(),
        }
    }

    /// Simulate the store going offline or coming back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of successful writes since creation.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of distinct keys stored.
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store offline".to_string()))
        }
    }
}

impl Default for InMemoryStepStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepStore for InMemoryStepStore {
    async fn write(
        &self,
        user_id: &str,
        date: NaiveDate,
        steps: u64,
    ) -> Result<DailyStepRecord, StoreError> {
        self.check_available()?;

        let key = record_key(user_id, date);
        let record = DailyStepRecord {
            date,
            steps,
            timestamp: Utc::now(),
        };

        {
            let mut store = self
                .records
                .write()
                .map_err(|e| StoreError::Database(e.to_string()))?;
            store.insert(key.clone(), record.clone());
        }

        self.writes.fetch_add(1, Ordering::SeqCst);
        self.feed.publish(key, record.clone());
        Ok(record)
    }

    async fn read(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Option<DailyStepRecord>, StoreError> {
        self.check_available()?;

        let store = self
            .records
            .read()
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(store.get(&record_key(user_id, date)).cloned())
    }

    fn watch(&self, user_id: &str, date: NaiveDate) -> RecordWatch {
        self.feed.watch(user_id, date)
    }

    fn backend_name(&self) -> &'static str {
        "InMemory"
    }
}
