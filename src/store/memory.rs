//! In-memory [`Store`] implementation for tests and dry runs.
//!
//! Collections and entries live in `Vec`s behind a `tokio::sync::RwLock`.
//! Vector search is brute-force cosine distance, like the SQLite backend.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{rank_by_distance, Store};
use crate::error::{Error, Result};
use crate::migrate::REQUIRED_TABLES;
use crate::models::{
    Collection, CollectionStats, NewEntry, ScoredEntry, StoredEntry, META_DOC_ID, META_SOURCE,
};

#[derive(Default)]
struct State {
    collections: Vec<Collection>,
    entries: Vec<StoredEntry>,
}

pub struct InMemoryStore {
    state: RwLock<State>,
    provisioned: bool,
    reachable: bool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            provisioned: true,
            reachable: true,
        }
    }

    /// A reachable store whose schema was never provisioned.
    pub fn unprovisioned() -> Self {
        Self {
            provisioned: false,
            ..Self::new()
        }
    }

    /// A store that fails every call with a connectivity error.
    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::new()
        }
    }

    fn check(&self) -> Result<()> {
        if !self.reachable {
            return Err(Error::Connectivity("in-memory store marked unreachable".into()));
        }
        if !self.provisioned {
            return Err(Error::Store("no such table: collections".into()));
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn meta_str<'a>(entry: &'a StoredEntry, key: &str) -> Option<&'a str> {
    entry.metadata.get(key).and_then(Value::as_str)
}

#[async_trait]
impl Store for InMemoryStore {
    async fn ping(&self) -> Result<()> {
        if !self.reachable {
            return Err(Error::Connectivity("in-memory store marked unreachable".into()));
        }
        Ok(())
    }

    async fn missing_tables(&self) -> Result<Vec<String>> {
        self.ping().await?;
        if self.provisioned {
            Ok(Vec::new())
        } else {
            Ok(REQUIRED_TABLES.iter().map(|t| t.to_string()).collect())
        }
    }

    async fn find_collection(&self, name: &str) -> Result<Option<Collection>> {
        self.check()?;
        let state = self.state.read().await;
        Ok(state.collections.iter().find(|c| c.name == name).cloned())
    }

    async fn create_collection(&self, name: &str) -> Result<(Collection, bool)> {
        self.check()?;
        let mut state = self.state.write().await;
        if let Some(existing) = state.collections.iter().find(|c| c.name == name) {
            return Ok((existing.clone(), false));
        }
        let collection = Collection {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            metadata: serde_json::json!({}),
        };
        state.collections.push(collection.clone());
        Ok((collection, true))
    }

    async fn delete_collection(&self, collection_id: &str) -> Result<u64> {
        self.check()?;
        let mut state = self.state.write().await;
        let before = state.entries.len();
        state.entries.retain(|e| e.collection_id != collection_id);
        let deleted = (before - state.entries.len()) as u64;
        state.collections.retain(|c| c.id != collection_id);
        Ok(deleted)
    }

    async fn delete_entries_by_doc_id(&self, collection_id: &str, doc_id: &str) -> Result<u64> {
        self.check()?;
        let mut state = self.state.write().await;
        let before = state.entries.len();
        state
            .entries
            .retain(|e| !(e.collection_id == collection_id && meta_str(e, META_DOC_ID) == Some(doc_id)));
        Ok((before - state.entries.len()) as u64)
    }

    async fn delete_stale_revisions(
        &self,
        collection_id: &str,
        source: &str,
        keep_doc_id: &str,
    ) -> Result<u64> {
        self.check()?;
        let mut state = self.state.write().await;
        let before = state.entries.len();
        state.entries.retain(|e| {
            !(e.collection_id == collection_id
                && meta_str(e, META_SOURCE) == Some(source)
                && meta_str(e, META_DOC_ID) != Some(keep_doc_id))
        });
        Ok((before - state.entries.len()) as u64)
    }

    async fn insert_entries(
        &self,
        collection_id: &str,
        entries: &[NewEntry],
    ) -> Result<Vec<String>> {
        self.check()?;
        let mut state = self.state.write().await;
        if !state.collections.iter().any(|c| c.id == collection_id) {
            return Err(Error::Store(format!(
                "FOREIGN KEY constraint failed: no collection {}",
                collection_id
            )));
        }

        let mut ids = Vec::with_capacity(entries.len());
        for entry in entries {
            let id = Uuid::new_v4().to_string();
            state.entries.push(StoredEntry {
                id: id.clone(),
                collection_id: collection_id.to_string(),
                content: entry.content.clone(),
                metadata: entry.metadata.clone(),
                embedding: entry.embedding.clone(),
            });
            ids.push(id);
        }
        Ok(ids)
    }

    async fn nearest(
        &self,
        collection_id: &str,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredEntry>> {
        self.check()?;
        let state = self.state.read().await;
        let entries = state
            .entries
            .iter()
            .filter(|e| e.collection_id == collection_id)
            .cloned();
        Ok(rank_by_distance(entries, query, limit))
    }

    async fn stats(&self, collection_id: &str) -> Result<CollectionStats> {
        self.check()?;
        let state = self.state.read().await;
        let mut doc_ids: Vec<&str> = state
            .entries
            .iter()
            .filter(|e| e.collection_id == collection_id)
            .filter_map(|e| meta_str(e, META_DOC_ID))
            .collect();
        let entries = state
            .entries
            .iter()
            .filter(|e| e.collection_id == collection_id)
            .count() as u64;
        doc_ids.sort_unstable();
        doc_ids.dedup();
        Ok(CollectionStats {
            entries,
            documents: doc_ids.len() as u64,
        })
    }

    async fn list_entries(&self, collection_id: &str, limit: usize) -> Result<Vec<StoredEntry>> {
        self.check()?;
        let state = self.state.read().await;
        Ok(state
            .entries
            .iter()
            .filter(|e| e.collection_id == collection_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;

    fn new_entry(doc_id: &str) -> NewEntry {
        let mut metadata = Metadata::new();
        metadata.insert(META_DOC_ID.into(), Value::from(doc_id));
        NewEntry {
            content: doc_id.to_string(),
            metadata,
            embedding: vec![1.0, 0.0],
        }
    }

    #[tokio::test]
    async fn test_insert_requires_live_collection() {
        let store = InMemoryStore::new();
        let err = store.insert_entries("ghost", &[new_entry("h")]).await;
        assert!(matches!(err, Err(Error::Store(_))));
    }

    #[tokio::test]
    async fn test_unprovisioned_reports_tables() {
        let store = InMemoryStore::unprovisioned();
        store.ping().await.unwrap();
        assert_eq!(store.missing_tables().await.unwrap().len(), 2);
        assert!(store.find_collection("x").await.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_fails_ping() {
        let store = InMemoryStore::unreachable();
        assert!(store.ping().await.unwrap_err().is_connectivity());
    }

    #[tokio::test]
    async fn test_delete_collection_counts_entries() {
        let store = InMemoryStore::new();
        let (c, created) = store.create_collection("c").await.unwrap();
        assert!(created);
        store
            .insert_entries(&c.id, &[new_entry("a"), new_entry("b")])
            .await
            .unwrap();
        assert_eq!(store.delete_collection(&c.id).await.unwrap(), 2);
        assert!(store.find_collection("c").await.unwrap().is_none());
    }
}
