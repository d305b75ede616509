use hubsync_common::error::{HubsyncError, HubsyncResult};
use sqlx::PgPool;

pub const CONTACTS_TABLE: &str = "hubspot_contacts";

/// Reject anything that is not a plain lowercase SQL identifier, since
/// table names are spliced into statements.
pub fn validate_table_name(table: &str) -> HubsyncResult<()> {
    let valid = !table.is_empty()
        && table.len() <= 63
        && table
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && table
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(HubsyncError::Validation(format!(
            "invalid table name '{table}'"
        )))
    }
}

/// Create the contacts table and the sync ledger if missing. Idempotent.
pub async fn ensure_schema(pool: &PgPool) -> HubsyncResult<()> {
    tracing::info!(table = CONTACTS_TABLE, "ensuring schema");
    ensure_contacts_table(pool, CONTACTS_TABLE).await?;
    ensure_sync_state_table(pool).await?;
    tracing::info!("schema ready");
    Ok(())
}

pub async fn ensure_contacts_table(pool: &PgPool, table: &str) -> HubsyncResult<()> {
    validate_table_name(table)?;
    let ddl = format!(
        "create table if not exists {table} (
           hubspot_id text primary key,
           first_name text,
           last_name text,
           email text,
           business_name text,
           vat_number text,
           country text,
           number_of_users integer not null default 0,
           vendor text,
           lead_status text,
           created_date timestamptz,
           last_activity_date timestamptz,
           updated_at timestamptz not null default now()
         )"
    );
    sqlx::query(&ddl)
        .execute(pool)
        .await
        .map_err(|e| HubsyncError::Database(e.to_string()))?;
    Ok(())
}

pub async fn ensure_sync_state_table(pool: &PgPool) -> HubsyncResult<()> {
    sqlx::query(
        "create table if not exists sync_state (
           source text primary key,
           status text not null default 'idle',
           last_synced_at timestamptz,
           records_written bigint,
           error_message text,
           created_at timestamptz not null default now(),
           updated_at timestamptz not null default now()
         )",
    )
    .execute(pool)
    .await
    .map_err(|e| HubsyncError::Database(e.to_string()))?;
    Ok(())
}
