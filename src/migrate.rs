//! Schema provisioning for the content store.
//!
//! The core never calls this; it only checks that the tables exist. `rag init`
//! and the test suites provision the schema explicitly.

use sqlx::SqlitePool;

use crate::config::StoreConfig;
use crate::db;
use crate::error::Result;

/// Tables the content store requires.
pub const REQUIRED_TABLES: [&str; 2] = ["collections", "entries"];

pub async fn run_migrations(config: &StoreConfig) -> Result<()> {
    let pool = db::connect_for_provisioning(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collections (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entries (
            id TEXT PRIMARY KEY,
            collection_id TEXT NOT NULL,
            content TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            embedding BLOB NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (collection_id) REFERENCES collections(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_collection ON entries(collection_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_entries_doc_id ON entries(collection_id, json_extract(metadata_json, '$.doc_id'))",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_entries_source ON entries(collection_id, json_extract(metadata_json, '$.source'))",
    )
    .execute(pool)
    .await?;

    Ok(())
}
