use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Run ledger entry for one sync source. Records run status only; no
/// cursor or watermark is carried between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncState {
    pub source: String,
    pub status: String,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub records_written: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
