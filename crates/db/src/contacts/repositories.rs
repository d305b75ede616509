use async_trait::async_trait;

use crate::contacts::models::{ContactRow, WriteSummary};
use hubsync_common::error::HubsyncResult;
use hubsync_common::types::WriteMode;

#[async_trait]
pub trait ContactRepository: Send + Sync {
    /// Highest all-digit `hubspot_id` currently stored, `None` for an empty table.
    async fn max_numeric_id(&self) -> HubsyncResult<Option<i64>>;

    /// Write a batch under `mode` as a single transaction: either every row
    /// is applied or none is.
    async fn write_batch(&self, rows: &[ContactRow], mode: WriteMode)
        -> HubsyncResult<WriteSummary>;
}
