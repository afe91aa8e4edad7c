//! SQLite-backed [`Store`] implementation.
//!
//! Vectors are stored as little-endian f32 BLOBs and ranked in Rust with
//! brute-force cosine distance over the collection's entries.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{rank_by_distance, Store};
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::Result;
use crate::migrate::REQUIRED_TABLES;
use crate::models::{
    Collection, CollectionStats, Metadata, NewEntry, ScoredEntry, StoredEntry,
};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn collection_from_row(row: &SqliteRow) -> Result<Collection> {
    let metadata_json: String = row.get("metadata_json");
    Ok(Collection {
        id: row.get("id"),
        name: row.get("name"),
        metadata: serde_json::from_str(&metadata_json)?,
    })
}

fn entry_from_row(row: &SqliteRow) -> Result<StoredEntry> {
    let metadata_json: String = row.get("metadata_json");
    let blob: Vec<u8> = row.get("embedding");
    Ok(StoredEntry {
        id: row.get("id"),
        collection_id: row.get("collection_id"),
        content: row.get("content"),
        metadata: serde_json::from_str::<Metadata>(&metadata_json)?,
        embedding: blob_to_vec(&blob),
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn missing_tables(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table'")
            .fetch_all(&self.pool)
            .await?;
        let present: Vec<String> = rows.iter().map(|r| r.get("name")).collect();

        Ok(REQUIRED_TABLES
            .iter()
            .filter(|t| !present.iter().any(|p| p == *t))
            .map(|t| t.to_string())
            .collect())
    }

    async fn find_collection(&self, name: &str) -> Result<Option<Collection>> {
        let row = sqlx::query("SELECT id, name, metadata_json FROM collections WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(collection_from_row).transpose()
    }

    async fn create_collection(&self, name: &str) -> Result<(Collection, bool)> {
        let now = chrono::Utc::now().timestamp();
        let inserted = sqlx::query(
            r#"
            INSERT INTO collections (id, name, metadata_json, created_at)
            VALUES (?, ?, '{}', ?)
            ON CONFLICT(name) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(name)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        let row = sqlx::query("SELECT id, name, metadata_json FROM collections WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok((collection_from_row(&row)?, inserted > 0))
    }

    async fn delete_collection(&self, collection_id: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM entries WHERE collection_id = ?")
            .bind(collection_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query("DELETE FROM collections WHERE id = ?")
            .bind(collection_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(deleted)
    }

    async fn delete_entries_by_doc_id(&self, collection_id: &str, doc_id: &str) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM entries WHERE collection_id = ? AND json_extract(metadata_json, '$.doc_id') = ?",
        )
        .bind(collection_id)
        .bind(doc_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_stale_revisions(
        &self,
        collection_id: &str,
        source: &str,
        keep_doc_id: &str,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM entries
            WHERE collection_id = ?
              AND json_extract(metadata_json, '$.source') = ?
              AND json_extract(metadata_json, '$.doc_id') IS NOT ?
            "#,
        )
        .bind(collection_id)
        .bind(source)
        .bind(keep_doc_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn insert_entries(
        &self,
        collection_id: &str,
        entries: &[NewEntry],
    ) -> Result<Vec<String>> {
        let now = chrono::Utc::now().timestamp();
        let mut ids = Vec::with_capacity(entries.len());
        let mut tx = self.pool.begin().await?;

        for entry in entries {
            let id = Uuid::new_v4().to_string();
            sqlx::query(
                r#"
                INSERT INTO entries (id, collection_id, content, metadata_json, embedding, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(collection_id)
            .bind(&entry.content)
            .bind(serde_json::to_string(&entry.metadata)?)
            .bind(vec_to_blob(&entry.embedding))
            .bind(now)
            .execute(&mut *tx)
            .await?;
            ids.push(id);
        }

        tx.commit().await?;
        Ok(ids)
    }

    async fn nearest(
        &self,
        collection_id: &str,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, collection_id, content, metadata_json, embedding
            FROM entries
            WHERE collection_id = ?
            "#,
        )
        .bind(collection_id)
        .fetch_all(&self.pool)
        .await?;

        let entries = rows
            .iter()
            .map(entry_from_row)
            .collect::<Result<Vec<_>>>()?;
        Ok(rank_by_distance(entries, query, limit))
    }

    async fn stats(&self, collection_id: &str) -> Result<CollectionStats> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS entries,
                   COUNT(DISTINCT json_extract(metadata_json, '$.doc_id')) AS documents
            FROM entries
            WHERE collection_id = ?
            "#,
        )
        .bind(collection_id)
        .fetch_one(&self.pool)
        .await?;

        let entries: i64 = row.get("entries");
        let documents: i64 = row.get("documents");
        Ok(CollectionStats {
            entries: entries as u64,
            documents: documents as u64,
        })
    }

    async fn list_entries(&self, collection_id: &str, limit: usize) -> Result<Vec<StoredEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, collection_id, content, metadata_json, embedding
            FROM entries
            WHERE collection_id = ?
            ORDER BY rowid
            LIMIT ?
            "#,
        )
        .bind(collection_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }
}
