//! Storage abstraction for collections and their entries.
//!
//! The [`Store`] trait is the only path by which entries are read or
//! mutated. Two backends implement it:
//!
//! - [`SqliteStore`](sqlite::SqliteStore): the persistent sqlx backend.
//! - [`InMemoryStore`](memory::InMemoryStore): for tests and dry runs.
//!
//! Implementations never create schema; provisioning lives in
//! [`migrate`](crate::migrate).

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use std::cmp::Ordering;

use crate::embedding::cosine_distance;
use crate::error::Result;
use crate::models::{Collection, CollectionStats, NewEntry, ScoredEntry, StoredEntry};

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`ping`](Store::ping) | Check the backend is reachable |
/// | [`missing_tables`](Store::missing_tables) | Report required tables that are absent |
/// | [`find_collection`](Store::find_collection) | Look up a collection by name |
/// | [`create_collection`](Store::create_collection) | Create a collection if absent |
/// | [`delete_collection`](Store::delete_collection) | Remove a collection and its entries |
/// | [`delete_entries_by_doc_id`](Store::delete_entries_by_doc_id) | Targeted delete by `doc_id` |
/// | [`delete_stale_revisions`](Store::delete_stale_revisions) | Delete older revisions of a source file |
/// | [`insert_entries`](Store::insert_entries) | Insert entries atomically |
/// | [`nearest`](Store::nearest) | Entries ordered by cosine distance |
#[async_trait]
pub trait Store: Send + Sync {
    async fn ping(&self) -> Result<()>;

    /// Required tables that do not exist, in declaration order.
    async fn missing_tables(&self) -> Result<Vec<String>>;

    async fn find_collection(&self, name: &str) -> Result<Option<Collection>>;

    /// Create the collection named `name` unless it exists.
    ///
    /// Returns the collection and whether this call created it. Two callers
    /// racing on the same name end up with the same row.
    async fn create_collection(&self, name: &str) -> Result<(Collection, bool)>;

    /// Delete every entry of the collection, then the collection row, in one
    /// transaction. Returns the number of entries removed.
    async fn delete_collection(&self, collection_id: &str) -> Result<u64>;

    async fn delete_entries_by_doc_id(&self, collection_id: &str, doc_id: &str) -> Result<u64>;

    /// Delete entries whose `source` is `source` but whose `doc_id` differs
    /// from `keep_doc_id`.
    async fn delete_stale_revisions(
        &self,
        collection_id: &str,
        source: &str,
        keep_doc_id: &str,
    ) -> Result<u64>;

    /// Insert all entries or none. Returns the new entry ids.
    async fn insert_entries(&self, collection_id: &str, entries: &[NewEntry])
        -> Result<Vec<String>>;

    /// The `limit` entries closest to `query`, by ascending cosine distance.
    async fn nearest(
        &self,
        collection_id: &str,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredEntry>>;

    async fn stats(&self, collection_id: &str) -> Result<CollectionStats>;

    /// Entries in insertion order, at most `limit` of them.
    async fn list_entries(&self, collection_id: &str, limit: usize) -> Result<Vec<StoredEntry>>;
}

/// Score, sort and truncate candidate entries; ties break on entry id.
pub(crate) fn rank_by_distance(
    entries: impl IntoIterator<Item = StoredEntry>,
    query: &[f32],
    limit: usize,
) -> Vec<ScoredEntry> {
    let mut scored: Vec<ScoredEntry> = entries
        .into_iter()
        .map(|entry| {
            let distance = cosine_distance(query, &entry.embedding);
            ScoredEntry { entry, distance }
        })
        .collect();

    scored.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.entry.id.cmp(&b.entry.id))
    });
    scored.truncate(limit);
    scored
}
