mod connector;
mod hubspot;

use std::process::ExitCode;
use std::time::Duration;

use hubsync_config::{init_tracing, AppConfig};
use hubsync_db::contacts::pg_repository::PgContactRepository;
use hubsync_db::sync::pg_repository::PgSyncStateRepository;

use connector::{Connector, SyncResult};
use hubspot::client::{HubspotClient, HubspotClientConfig};
use hubspot::sync::HubspotContactSyncer;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Config is read first so LOG_LEVEL from `.env` reaches the subscriber.
    let config = AppConfig::from_env();
    init_tracing(config.as_ref().map_or("info", |c| c.log_level.as_str()));
    tracing::info!(service = "hubsync-ingest", "starting");

    let outcome = match config {
        Ok(config) => run(config).await,
        Err(e) => Err(e.into()),
    };

    match outcome {
        Ok(result) => {
            tracing::info!(
                source = %result.source,
                fetched = result.fetched,
                written = result.written,
                unchanged = result.unchanged,
                skipped = result.skipped,
                "sync finished"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "sync failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: AppConfig) -> Result<SyncResult, BoxError> {
    // Credentials are checked before any connection is opened.
    let client = HubspotClient::new(HubspotClientConfig::from_env()?)?;
    tracing::debug!(config = ?client.config(), "hubspot client ready");

    let options = hubsync_db::connect_options(&config.database)?;
    if config.create_database && hubsync_db::ensure_database(&options).await? {
        tracing::info!("created database");
    }
    let pool = hubsync_db::create_pool(options).await?;
    hubsync_db::schema::ensure_schema(&pool).await?;

    let syncer = HubspotContactSyncer::new(
        client,
        PgContactRepository::new(pool.clone()),
        PgSyncStateRepository::new(pool.clone()),
        config.write_mode,
    )
    .with_deadline(config.deadline_secs.map(Duration::from_secs))
    .with_lock_stale_after(Duration::from_secs(config.lock_stale_secs));

    tracing::info!(source = syncer.source_name(), mode = %config.write_mode, "running connector");
    let result = syncer.sync().await;
    pool.close().await;
    result
}
