pub mod contacts;
pub mod schema;
pub mod sync;

use std::str::FromStr;

use hubsync_common::error::{HubsyncError, HubsyncResult};
use hubsync_config::DatabaseConfig;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Connection, PgConnection, PgPool};

/// Build connection options from either a URL or discrete parameters.
pub fn connect_options(config: &DatabaseConfig) -> HubsyncResult<PgConnectOptions> {
    match config {
        DatabaseConfig::Url(url) => PgConnectOptions::from_str(url)
            .map_err(|e| HubsyncError::Config(format!("invalid DATABASE_URL: {e}"))),
        DatabaseConfig::Params {
            host,
            port,
            database,
            user,
            password,
        } => {
            let options = PgConnectOptions::new()
                .host(host)
                .port(*port)
                .database(database)
                .username(user);
            Ok(match password {
                Some(pw) => options.password(pw),
                None => options,
            })
        }
    }
}

/// Create a Postgres connection pool.
pub async fn create_pool(options: PgConnectOptions) -> HubsyncResult<PgPool> {
    tracing::info!("connecting to database");
    PgPoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(|e| HubsyncError::Database(e.to_string()))
}

/// Create the target database through the `postgres` maintenance database
/// when it does not exist yet. Returns `true` if it was created.
pub async fn ensure_database(options: &PgConnectOptions) -> HubsyncResult<bool> {
    let Some(name) = options.get_database().map(str::to_owned) else {
        return Ok(false);
    };

    let admin = options.clone().database("postgres");
    let mut conn = PgConnection::connect_with(&admin)
        .await
        .map_err(|e| HubsyncError::Database(e.to_string()))?;

    let exists: bool =
        sqlx::query_scalar("select exists (select 1 from pg_database where datname = $1)")
            .bind(&name)
            .fetch_one(&mut conn)
            .await
            .map_err(|e| HubsyncError::Database(e.to_string()))?;

    if !exists {
        tracing::info!(database = %name, "database missing, creating it");
        let ddl = format!("create database {}", quote_ident(&name));
        sqlx::query(&ddl)
            .execute(&mut conn)
            .await
            .map_err(|e| HubsyncError::Database(e.to_string()))?;
    }

    conn.close()
        .await
        .map_err(|e| HubsyncError::Database(e.to_string()))?;
    Ok(!exists)
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
