//! In-process result store for testing.
//!
//! Evaluates [`CountQuery::matches`] over a plain vector and lets tests
//! inject count or insert failures.

use super::ResultStore;
use crate::error::StoreError;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use sweep_core::CountQuery;
use sweep_types::ResultRecord;

/// In-memory result store.
///
/// Clones share the same records, so a test can keep a handle after
/// moving one into the controller.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    records: Vec<ResultRecord>,
    count_calls: usize,
    fail_next_count: Option<String>,
    fail_next_insert: Option<String>,
    fail_all_counts: Option<String>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `records`.
    pub fn with_records(records: Vec<ResultRecord>) -> Self {
        let store = Self::new();
        store.lock().records = records;
        store
    }

    fn lock(&self) -> MutexGuard<'_, MemoryStoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of every stored record.
    pub fn records(&self) -> Vec<ResultRecord> {
        self.lock().records.clone()
    }

    /// Number of count queries answered (or failed) so far.
    pub fn count_calls(&self) -> usize {
        self.lock().count_calls
    }

    /// Cause the next count to fail with the given error.
    pub fn fail_next_count(&self, error: &str) {
        self.lock().fail_next_count = Some(error.to_string());
    }

    /// Cause every count to fail until [`MemoryStore::recover`] is called.
    pub fn fail_all_counts(&self, error: &str) {
        self.lock().fail_all_counts = Some(error.to_string());
    }

    /// Cause the next insert to fail with the given error.
    pub fn fail_next_insert(&self, error: &str) {
        self.lock().fail_next_insert = Some(error.to_string());
    }

    /// Clear all injected failures.
    pub fn recover(&self) {
        let mut inner = self.lock();
        inner.fail_next_count = None;
        inner.fail_next_insert = None;
        inner.fail_all_counts = None;
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn try_count(&self, query: &CountQuery) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        inner.count_calls += 1;

        if let Some(error) = inner.fail_next_count.take() {
            return Err(StoreError::Unavailable(error));
        }
        if let Some(error) = &inner.fail_all_counts {
            return Err(StoreError::Unavailable(error.clone()));
        }

        Ok(inner.records.iter().filter(|r| query.matches(r)).count() as u64)
    }

    async fn insert(&self, record: &ResultRecord) -> Result<(), StoreError> {
        let mut inner = self.lock();

        if let Some(error) = inner.fail_next_insert.take() {
            return Err(StoreError::Unavailable(error));
        }

        inner.records.push(record.clone());
        Ok(())
    }
}
