use std::time::Duration;

use async_trait::async_trait;

use crate::sync::models::SyncState;
use hubsync_common::error::HubsyncResult;

#[async_trait]
pub trait SyncStateRepository: Send + Sync {
    /// Get or create the ledger row for a source.
    async fn get_or_create(&self, source: &str) -> HubsyncResult<SyncState>;

    /// Atomically set status to 'running' unless another run holds it.
    /// A 'running' row untouched for longer than `stale_after` is taken over.
    /// Returns `None` if the lock was not acquired.
    async fn acquire_lock(
        &self,
        source: &str,
        stale_after: Duration,
    ) -> HubsyncResult<Option<SyncState>>;

    /// Mark a run as completed with the number of rows it wrote.
    async fn mark_completed(&self, source: &str, records_written: i64)
        -> HubsyncResult<SyncState>;

    /// Mark a run as failed with an error message.
    async fn mark_failed(&self, source: &str, error_message: &str) -> HubsyncResult<SyncState>;
}
