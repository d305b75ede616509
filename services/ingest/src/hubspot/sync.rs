use std::time::{Duration, Instant};

use async_trait::async_trait;

use hubsync_common::error::HubsyncError;
use hubsync_common::types::WriteMode;
use hubsync_db::contacts::repositories::ContactRepository;
use hubsync_db::sync::repositories::SyncStateRepository;

use super::client::{FetchOptions, HubspotClient, HubspotClientError};
use super::normalize::{normalize_all, NormalizeError};
use crate::connector::{Connector, SyncResult};

const SOURCE_NAME: &str = "hubspot_contacts";

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] HubspotClientError),

    #[error("malformed source data: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("store failed: {0}")]
    Store(#[from] HubsyncError),

    #[error("another {source_name} sync is already running")]
    AlreadyRunning { source_name: String },

    #[error("deadline exceeded before writing {rows} rows")]
    DeadlineExceeded { rows: usize },
}

/// Fetch, normalize and write HubSpot contacts in one pass.
///
/// The whole batch is normalized before anything is written, and the write
/// is a single transaction, so a failed run leaves the table as it was.
pub struct HubspotContactSyncer<C, S> {
    client: HubspotClient,
    contact_repo: C,
    state_repo: S,
    mode: WriteMode,
    deadline: Option<Duration>,
    lock_stale_after: Duration,
}

impl<C, S> HubspotContactSyncer<C, S>
where
    C: ContactRepository,
    S: SyncStateRepository,
{
    pub fn new(client: HubspotClient, contact_repo: C, state_repo: S, mode: WriteMode) -> Self {
        Self {
            client,
            contact_repo,
            state_repo,
            mode,
            deadline: None,
            lock_stale_after: Duration::from_secs(3600),
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_lock_stale_after(mut self, stale_after: Duration) -> Self {
        self.lock_stale_after = stale_after;
        self
    }

    pub async fn run(&self) -> Result<SyncResult, SyncError> {
        tracing::info!(source = SOURCE_NAME, mode = %self.mode, "sync started");

        self.state_repo.get_or_create(SOURCE_NAME).await?;
        if self
            .state_repo
            .acquire_lock(SOURCE_NAME, self.lock_stale_after)
            .await?
            .is_none()
        {
            return Err(SyncError::AlreadyRunning {
                source_name: SOURCE_NAME.to_string(),
            });
        }

        match self.run_locked().await {
            Ok(result) => {
                // Contacts are committed; a ledger error only releases the lock.
                let written = i64::try_from(result.written).unwrap_or(i64::MAX);
                if let Err(e) = self.state_repo.mark_completed(SOURCE_NAME, written).await {
                    tracing::error!(error = %e, "failed to record sync completion");
                    let message = format!("contacts written but completion not recorded: {e}");
                    if let Err(e) = self.state_repo.mark_failed(SOURCE_NAME, &message).await {
                        tracing::warn!(error = %e, "failed to release sync lock");
                    }
                }
                tracing::info!(?result, "sync completed");
                Ok(result)
            }
            Err(e) => {
                if let Err(mark_err) = self.state_repo.mark_failed(SOURCE_NAME, &e.to_string()).await
                {
                    tracing::warn!(error = %mark_err, "failed to record sync failure");
                }
                Err(e)
            }
        }
    }

    async fn run_locked(&self) -> Result<SyncResult, SyncError> {
        let deadline = self.deadline.map(|d| Instant::now() + d);
        let mut options = FetchOptions {
            deadline,
            ..Default::default()
        };

        if self.mode == WriteMode::InsertIfNew {
            let watermark = self.contact_repo.max_numeric_id().await?;
            tracing::warn!(
                watermark = ?watermark,
                "insert-if-new assumes increasing numeric ids; changes to existing contacts are not synced"
            );
            options.id_above = watermark;
        }

        let fetch = self.client.fetch_all_contacts(&options).await?;
        let contacts = fetch.contacts;
        tracing::info!(
            count = contacts.len(),
            filtered = fetch.filtered,
            "fetched contacts"
        );

        let rows = normalize_all(&contacts)?;

        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(SyncError::DeadlineExceeded { rows: rows.len() });
        }

        tracing::info!(mode = %self.mode, rows = rows.len(), "writing contacts");
        let summary = self.contact_repo.write_batch(&rows, self.mode).await?;
        tracing::info!(
            affected = summary.affected,
            unchanged = summary.unchanged,
            skipped = summary.skipped_by_watermark,
            "contacts written"
        );

        Ok(SyncResult {
            source: SOURCE_NAME.to_string(),
            fetched: contacts.len(),
            written: summary.affected,
            unchanged: summary.unchanged,
            skipped: fetch.filtered + summary.skipped_by_watermark,
        })
    }
}

#[async_trait]
impl<C, S> Connector for HubspotContactSyncer<C, S>
where
    C: ContactRepository,
    S: SyncStateRepository,
{
    fn source_name(&self) -> &str {
        SOURCE_NAME
    }

    async fn sync(&self) -> Result<SyncResult, Box<dyn std::error::Error + Send + Sync>> {
        self.run().await.map_err(Into::into)
    }
}
