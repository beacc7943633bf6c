//! Result storage.
//!
//! Records are appended without any uniqueness check; dedup is done by
//! the controller counting matching records before it executes a trial.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::StoreError;
use async_trait::async_trait;
use sweep_core::CountQuery;
use sweep_types::ResultRecord;
use tracing::warn;

/// Trait for result store backends.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Count stored records matching `query`.
    ///
    /// A field that has never been stored yields a count of 0, not an error.
    async fn try_count(&self, query: &CountQuery) -> Result<u64, StoreError>;

    /// Append a record, growing the schema for unseen fields.
    async fn insert(&self, record: &ResultRecord) -> Result<(), StoreError>;

    /// Count with a conservative fallback: store errors are logged and
    /// reported as zero matching records.
    async fn count(&self, query: &CountQuery) -> u64 {
        match self.try_count(query).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "count query failed, assuming no prior trials");
                0
            }
        }
    }
}

/// Current unix time in seconds.
pub(crate) fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
