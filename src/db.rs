use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::config::StoreConfig;
use crate::error::{Error, Result};

fn options(config: &StoreConfig) -> Result<SqliteConnectOptions> {
    let options = SqliteConnectOptions::from_str(&config.url)
        .map_err(|e| Error::Config(format!("invalid store.url '{}': {}", config.url, e)))?
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);
    Ok(options)
}

/// Open a pool without touching the database yet.
///
/// The database file is never created here; a missing file surfaces as a
/// connectivity error on first use, which the collection manager reports
/// as degraded health.
pub fn connect_lazy(config: &StoreConfig) -> Result<SqlitePool> {
    let options = options(config)?.create_if_missing(false);
    Ok(SqlitePoolOptions::new()
        .max_connections(5)
        .connect_lazy_with(options))
}

/// Open (and create if needed) the database for schema provisioning.
pub async fn connect_for_provisioning(config: &StoreConfig) -> Result<SqlitePool> {
    let options = options(config)?.create_if_missing(true);

    // Ensure parent directory exists
    if let Some(parent) = options.get_filename().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(|e| Error::Connectivity(e.to_string()))?;

    Ok(pool)
}
