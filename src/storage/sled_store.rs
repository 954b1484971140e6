//! Sled-backed step store
//!
//! Key: `steps/{user}/{YYYYMMDD}` as UTF-8 bytes (sorts chronologically
//! within a user).
//! Value: JSON `{ "date": "YYYY-MM-DD", "steps": n, "timestamp": ... }`.
//!
//! sled calls run on the blocking pool so a slow disk never stalls the
//! session task.

use super::{ChangeFeed, RecordWatch, StepStore, StoreError};
use crate::types::{record_key, DailyStepRecord, STEPS_KEY_PREFIX};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::path::Path;

/// Durable step store.
#[derive(Clone)]
pub struct SledStepStore {
    db: sled::Db,
    feed: ChangeFeed,
}

impl SledStepStore {
    /// Open or create the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let db = sled::open(path)?;
        tracing::info!("Step store opened at {:?}", path);
        Ok(Self {
            db,
            feed: ChangeFeed::default(),
        })
    }

    /// All records stored for `user_id`, oldest first.
    pub fn records_for_user(&self, user_id: &str) -> Vec<DailyStepRecord> {
        let prefix = format!("{STEPS_KEY_PREFIX}/{user_id}/");
        self.db
            .scan_prefix(prefix.as_bytes())
            .filter_map(|item| match item {
                Ok((_key, value)) => match serde_json::from_slice::<DailyStepRecord>(&value) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        tracing::warn!("Failed to deserialize stored step record: {}", e);
                        None
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read step record: {}", e);
                    None
                }
            })
            .collect()
    }

    /// Total number of stored records across users.
    pub fn count(&self) -> usize {
        self.db.len()
    }

    /// Database size in bytes
    pub fn size_bytes(&self) -> u64 {
        self.db.size_on_disk().unwrap_or(0)
    }
}

async fn blocking<T, F>(f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Database(format!("storage task failed: {e}")))?
}

#[async_trait]
impl StepStore for SledStepStore {
    async fn write(
        &self,
        user_id: &str,
        date: NaiveDate,
        steps: u64,
    ) -> Result<DailyStepRecord, StoreError> {
        let key = record_key(user_id, date);
        let record = DailyStepRecord {
            date,
            steps,
            timestamp: Utc::now(),
        };
        let value = serde_json::to_vec(&record)?;

        let db = self.db.clone();
        let db_key = key.clone();
        blocking(move || {
            db.insert(db_key.as_bytes(), value)?;
            Ok(())
        })
        .await?;

        tracing::debug!(key = %key, steps, "Stored step record");
        self.feed.publish(key, record.clone());
        Ok(record)
    }

    async fn read(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Option<DailyStepRecord>, StoreError> {
        let key = record_key(user_id, date);
        let db = self.db.clone();
        let raw = blocking(move || Ok(db.get(key.as_bytes())?)).await?;

        match raw {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn watch(&self, user_id: &str, date: NaiveDate) -> RecordWatch {
        self.feed.watch(user_id, date)
    }

    async fn sync(&self) -> Result<(), StoreError> {
        self.db.flush_async().await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, d).unwrap()
    }

    #[tokio::test]
    async fn test_open_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStepStore::open(dir.path().join("steps.db")).unwrap();
        assert_eq!(store.count(), 0);
        assert!(store.read("u", day(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStepStore::open(dir.path().join("steps.db")).unwrap();

        let written = store.write("u", day(1), 321).await.unwrap();
        let read = store.read("u", day(1)).await.unwrap().unwrap();
        assert_eq!(read, written);
    }

    #[tokio::test]
    async fn test_overwrite_keeps_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStepStore::open(dir.path().join("steps.db")).unwrap();

        store.write("u", day(1), 1).await.unwrap();
        store.write("u", day(1), 2).await.unwrap();
        assert_eq!(store.count(), 1);
        assert_eq!(store.read("u", day(1)).await.unwrap().unwrap().steps, 2);

        store.sync().await.unwrap();
        assert!(store.size_bytes() > 0);
    }

    #[tokio::test]
    async fn test_value_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStepStore::open(dir.path().join("steps.db")).unwrap();
        store.write("u", day(9), 5).await.unwrap();

        let raw = store.db.get(b"steps/u/20240209").unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(json["date"], "2024-02-09");
        assert_eq!(json["steps"], 5);
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_records_for_user_sorted_and_scoped() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStepStore::open(dir.path().join("steps.db")).unwrap();

        store.write("u", day(3), 30).await.unwrap();
        store.write("u", day(1), 10).await.unwrap();
        store.write("u2", day(2), 20).await.unwrap();

        let records = store.records_for_user("u");
        let days: Vec<_> = records.iter().map(|r| r.date).collect();
        assert_eq!(days, vec![day(1), day(3)]);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steps.db");
        {
            let store = SledStepStore::open(&path).unwrap();
            store.write("u", day(5), 55).await.unwrap();
            store.sync().await.unwrap();
        }
        let store = SledStepStore::open(&path).unwrap();
        assert_eq!(store.read("u", day(5)).await.unwrap().unwrap().steps, 55);
    }
}
