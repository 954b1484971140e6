//! Daily step record storage
//!
//! The keyed store is an external collaborator. [`StepStore`] is the
//! capability the aggregator and history query consume:
//!
//! - `write` upserts the record for (user, date); the store assigns the timestamp
//! - `read` returns the record or `None`
//! - `watch` follows live changes to one key
//!
//! Backends:
//! - [`SledStepStore`]: durable, keyed `steps/{user}/{YYYYMMDD}`
//! - [`InMemoryStepStore`]: tests and minimal deployments, with fault injection

pub mod lockfile;
pub mod memory;
pub mod sled_store;

pub use lockfile::DataDirLock;
pub use memory::InMemoryStepStore;
pub use sled_store::SledStepStore;

use crate::types::{record_key, DailyStepRecord};
use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::broadcast;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Keyed store for daily step records.
///
/// Implementations must be thread-safe (Send + Sync) for shared access
/// across async tasks. Writes to one key overwrite; the last successful
/// write is authoritative.
#[async_trait]
pub trait StepStore: Send + Sync {
    /// Upsert the step total for (user, date).
    async fn write(
        &self,
        user_id: &str,
        date: NaiveDate,
        steps: u64,
    ) -> Result<DailyStepRecord, StoreError>;

    /// Read the record for (user, date).
    async fn read(&self, user_id: &str, date: NaiveDate)
        -> Result<Option<DailyStepRecord>, StoreError>;

    /// Follow changes to the (user, date) key.
    fn watch(&self, user_id: &str, date: NaiveDate) -> RecordWatch;

    /// Make accepted writes durable. No-op for volatile backends.
    async fn sync(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

// ============================================================================
// Change Feed
// ============================================================================

/// One accepted write.
#[derive(Debug, Clone)]
pub struct RecordChange {
    pub key: String,
    pub record: DailyStepRecord,
}

/// Broadcast of accepted writes, shared by the backends.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<RecordChange>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Announce a write. Having no watchers is not an error.
    pub fn publish(&self, key: String, record: DailyStepRecord) {
        let _ = self.tx.send(RecordChange { key, record });
    }

    pub fn watch(&self, user_id: &str, date: NaiveDate) -> RecordWatch {
        RecordWatch {
            key: record_key(user_id, date),
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(crate::config::defaults::WATCH_CHANNEL_CAPACITY)
    }
}

/// Live view of one record key.
#[derive(Debug)]
pub struct RecordWatch {
    key: String,
    rx: broadcast::Receiver<RecordChange>,
}

impl RecordWatch {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for the next write to this key. `None` once the store is gone.
    ///
    /// If the watcher fell behind, intermediate writes are skipped; only
    /// the latest value of a key is meaningful.
    pub async fn changed(&mut self) -> Option<DailyStepRecord> {
        loop {
            match self.rx.recv().await {
                Ok(change) if change.key == self.key => return Some(change.record),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(key = %self.key, skipped, "Record watch lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
