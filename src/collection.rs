//! Collection lifecycle: existence checks, creation, and destructive operations.
//!
//! Every read or write of a collection's entries goes through
//! [`CollectionManager`], so an entry's `collection_id` always resolves to a
//! live collection.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::models::{Collection, CollectionStats, NewEntry, ScoredEntry, StoredEntry};
use crate::store::Store;

/// Outcome of [`CollectionManager::ensure_collection`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CollectionStatus {
    pub name: String,
    /// The collection row exists after the call.
    pub exists: bool,
    /// This call created the row.
    pub created: bool,
    /// The store is reachable and its schema is provisioned.
    pub health_ok: bool,
    pub collection_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct CollectionManager {
    store: Arc<dyn Store>,
}

impl CollectionManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Make sure the collection `name` exists, creating it if the schema is
    /// present but the row is not.
    ///
    /// Never fails: an unreachable store or missing tables are reported as
    /// `health_ok = false` with a description in `error`. Missing tables are
    /// never created here.
    pub async fn ensure_collection(&self, name: &str) -> CollectionStatus {
        let mut status = CollectionStatus {
            name: name.to_string(),
            ..CollectionStatus::default()
        };

        if let Err(e) = self.store.ping().await {
            warn!(collection = name, error = %e, "content store unreachable");
            status.error = Some(e.to_string());
            return status;
        }

        match self.store.missing_tables().await {
            Ok(missing) if missing.is_empty() => {}
            Ok(missing) => {
                warn!(collection = name, ?missing, "content store schema not provisioned");
                status.error = Some(format!(
                    "missing tables: {} (run `rag init`)",
                    missing.join(", ")
                ));
                return status;
            }
            Err(e) => {
                status.error = Some(e.to_string());
                return status;
            }
        }

        match self.store.create_collection(name).await {
            Ok((collection, created)) => {
                if created {
                    info!(collection = name, id = %collection.id, "created collection");
                } else {
                    debug!(collection = name, id = %collection.id, "collection exists");
                }
                status.exists = true;
                status.created = created;
                status.health_ok = true;
                status.collection_id = Some(collection.id);
            }
            Err(e) => {
                warn!(collection = name, error = %e, "could not ensure collection");
                status.error = Some(e.to_string());
            }
        }
        status
    }

    pub async fn find(&self, name: &str) -> Result<Option<Collection>> {
        self.store.find_collection(name).await
    }

    /// Remove the collection and all its entries. Returns 0 if it does not exist.
    pub async fn delete_collection(&self, name: &str) -> Result<u64> {
        let Some(collection) = self.store.find_collection(name).await? else {
            return Ok(0);
        };
        let deleted = self.store.delete_collection(&collection.id).await?;
        info!(collection = name, deleted, "deleted collection");
        Ok(deleted)
    }

    /// Remove entries whose metadata `doc_id` matches. Returns 0 if the
    /// collection does not exist.
    pub async fn delete_entries_by_doc_id(&self, name: &str, doc_id: &str) -> Result<u64> {
        let Some(collection) = self.store.find_collection(name).await? else {
            return Ok(0);
        };
        self.store
            .delete_entries_by_doc_id(&collection.id, doc_id)
            .await
    }

    /// Remove entries for `source` that belong to any revision other than
    /// `keep_doc_id`.
    pub async fn delete_stale_revisions(
        &self,
        name: &str,
        source: &str,
        keep_doc_id: &str,
    ) -> Result<u64> {
        let Some(collection) = self.store.find_collection(name).await? else {
            return Ok(0);
        };
        self.store
            .delete_stale_revisions(&collection.id, source, keep_doc_id)
            .await
    }

    pub async fn insert_entries(&self, collection: &Collection, entries: &[NewEntry]) -> Result<u64> {
        if entries.is_empty() {
            return Ok(0);
        }
        let ids = self.store.insert_entries(&collection.id, entries).await?;
        Ok(ids.len() as u64)
    }

    /// Nearest entries to `query`. A missing collection has no entries.
    pub async fn nearest(&self, name: &str, query: &[f32], limit: usize) -> Result<Vec<ScoredEntry>> {
        let Some(collection) = self.store.find_collection(name).await? else {
            return Ok(Vec::new());
        };
        self.store.nearest(&collection.id, query, limit).await
    }

    pub async fn stats(&self, name: &str) -> Result<CollectionStats> {
        match self.store.find_collection(name).await? {
            Some(collection) => self.store.stats(&collection.id).await,
            None => Ok(CollectionStats::default()),
        }
    }

    pub async fn list_entries(&self, name: &str, limit: usize) -> Result<Vec<StoredEntry>> {
        match self.store.find_collection(name).await? {
            Some(collection) => self.store.list_entries(&collection.id, limit).await,
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Metadata, META_DOC_ID};
    use crate::store::memory::InMemoryStore;
    use serde_json::Value;

    fn manager(store: InMemoryStore) -> CollectionManager {
        CollectionManager::new(Arc::new(store))
    }

    fn entry(doc_id: &str) -> NewEntry {
        let mut metadata = Metadata::new();
        metadata.insert(META_DOC_ID.into(), Value::from(doc_id));
        NewEntry {
            content: format!("chunk of {}", doc_id),
            metadata,
            embedding: vec![0.5, 0.5],
        }
    }

    #[tokio::test]
    async fn test_ensure_creates_then_finds() {
        let m = manager(InMemoryStore::new());

        let first = m.ensure_collection("docs").await;
        assert!(first.health_ok && first.exists && first.created);

        let second = m.ensure_collection("docs").await;
        assert!(second.health_ok && second.exists && !second.created);
        assert_eq!(first.collection_id, second.collection_id);
    }

    #[tokio::test]
    async fn test_ensure_reports_missing_schema_without_error() {
        let m = manager(InMemoryStore::unprovisioned());
        let status = m.ensure_collection("docs").await;
        assert!(!status.health_ok);
        assert!(!status.exists);
        assert!(!status.created);
        assert!(status.error.unwrap().contains("collections"));
    }

    #[tokio::test]
    async fn test_ensure_reports_unreachable_store() {
        let m = manager(InMemoryStore::unreachable());
        let status = m.ensure_collection("docs").await;
        assert!(!status.health_ok);
        assert!(status.error.is_some());
    }

    #[tokio::test]
    async fn test_deletes_on_missing_collection_are_noops() {
        let m = manager(InMemoryStore::new());
        assert_eq!(m.delete_collection("nope").await.unwrap(), 0);
        assert_eq!(m.delete_entries_by_doc_id("nope", "h").await.unwrap(), 0);
        assert!(m.nearest("nope", &[1.0], 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_entries_by_doc_id() {
        let m = manager(InMemoryStore::new());
        m.ensure_collection("docs").await;
        let collection = m.find("docs").await.unwrap().unwrap();
        m.insert_entries(&collection, &[entry("h1"), entry("h1"), entry("h2")])
            .await
            .unwrap();

        assert_eq!(m.delete_entries_by_doc_id("docs", "h1").await.unwrap(), 2);
        let stats = m.stats("docs").await.unwrap();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.documents, 1);
    }

    #[tokio::test]
    async fn test_delete_collection_removes_everything() {
        let m = manager(InMemoryStore::new());
        m.ensure_collection("docs").await;
        let collection = m.find("docs").await.unwrap().unwrap();
        m.insert_entries(&collection, &[entry("h1"), entry("h2")])
            .await
            .unwrap();

        assert_eq!(m.delete_collection("docs").await.unwrap(), 2);
        assert!(m.find("docs").await.unwrap().is_none());
        assert_eq!(m.stats("docs").await.unwrap(), CollectionStats::default());
    }
}
