use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::StorageError;
use crate::model::ScanResult;
use crate::outcome::{BatchReport, OutcomeKey};

/// Engine state that outlives a single run.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn backfill_completed(&self) -> Result<bool, StorageError>;
    async fn mark_backfill_completed(&self) -> Result<(), StorageError>;
    /// Replaces the previously saved scan.
    async fn save_scan(&self, scan: &ScanResult) -> Result<(), StorageError>;
    async fn load_scan(&self) -> Result<Option<ScanResult>, StorageError>;
}

/// Short-lived outcome records. Expiry is the store's business.
#[async_trait]
pub trait OutcomeStore: Send + Sync {
    async fn put(&self, key: OutcomeKey, report: &BatchReport) -> Result<(), StorageError>;
    /// Returns the record and removes it. Expired records are treated as absent.
    async fn take(&self, key: OutcomeKey) -> Result<Option<BatchReport>, StorageError>;
}

#[derive(Default)]
struct MemoryState {
    backfilled: bool,
    scan: Option<ScanResult>,
    outcomes: HashMap<OutcomeKey, (Instant, BatchReport)>,
}

/// Process-local store for tests and one-shot runs.
pub struct MemoryStore {
    ttl: Duration,
    inner: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, inner: Mutex::new(MemoryState::default()) }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn backfill_completed(&self) -> Result<bool, StorageError> {
        Ok(self.inner.lock().backfilled)
    }

    async fn mark_backfill_completed(&self) -> Result<(), StorageError> {
        self.inner.lock().backfilled = true;
        Ok(())
    }

    async fn save_scan(&self, scan: &ScanResult) -> Result<(), StorageError> {
        self.inner.lock().scan = Some(scan.clone());
        Ok(())
    }

    async fn load_scan(&self) -> Result<Option<ScanResult>, StorageError> {
        Ok(self.inner.lock().scan.clone())
    }
}

#[async_trait]
impl OutcomeStore for MemoryStore {
    async fn put(&self, key: OutcomeKey, report: &BatchReport) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.outcomes.retain(|_, (expires, _)| *expires > now);
        inner.outcomes.insert(key, (now + self.ttl, report.clone()));
        Ok(())
    }

    async fn take(&self, key: OutcomeKey) -> Result<Option<BatchReport>, StorageError> {
        let entry = self.inner.lock().outcomes.remove(&key);
        Ok(entry.filter(|(expires, _)| *expires > Instant::now()).map(|(_, r)| r))
    }
}
