use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::sync::models::SyncState;
use crate::sync::repositories::SyncStateRepository;
use hubsync_common::error::{HubsyncError, HubsyncResult};

const RETURNING: &str =
    "returning source, status, last_synced_at, records_written, error_message, created_at, updated_at";

#[derive(Clone)]
pub struct PgSyncStateRepository {
    pool: PgPool,
}

impl PgSyncStateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: sqlx::postgres::PgRow) -> SyncState {
        SyncState {
            source: row.get("source"),
            status: row.get("status"),
            last_synced_at: row.get("last_synced_at"),
            records_written: row.get("records_written"),
            error_message: row.get("error_message"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl SyncStateRepository for PgSyncStateRepository {
    async fn get_or_create(&self, source: &str) -> HubsyncResult<SyncState> {
        let row = sqlx::query(&format!(
            "insert into sync_state (source)
             values ($1)
             on conflict (source) do update set source = excluded.source
             {RETURNING}"
        ))
        .bind(source)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| HubsyncError::Database(e.to_string()))?;

        Ok(Self::map_row(row))
    }

    async fn acquire_lock(
        &self,
        source: &str,
        stale_after: Duration,
    ) -> HubsyncResult<Option<SyncState>> {
        let row = sqlx::query(&format!(
            "update sync_state
             set status = 'running', error_message = null, updated_at = now()
             where source = $1
               and (status != 'running' or updated_at < now() - make_interval(secs => $2))
             {RETURNING}"
        ))
        .bind(source)
        .bind(stale_after.as_secs_f64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| HubsyncError::Database(e.to_string()))?;

        Ok(row.map(Self::map_row))
    }

    async fn mark_completed(
        &self,
        source: &str,
        records_written: i64,
    ) -> HubsyncResult<SyncState> {
        let row = sqlx::query(&format!(
            "update sync_state
             set status = 'idle', last_synced_at = now(), records_written = $1,
                 error_message = null, updated_at = now()
             where source = $2
             {RETURNING}"
        ))
        .bind(records_written)
        .bind(source)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| HubsyncError::Database(e.to_string()))?;

        Ok(Self::map_row(row))
    }

    async fn mark_failed(&self, source: &str, error_message: &str) -> HubsyncResult<SyncState> {
        let row = sqlx::query(&format!(
            "update sync_state
             set status = 'failed', error_message = $1, updated_at = now()
             where source = $2
             {RETURNING}"
        ))
        .bind(error_message)
        .bind(source)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| HubsyncError::Database(e.to_string()))?;

        Ok(Self::map_row(row))
    }
}
