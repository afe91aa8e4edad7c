//! Ingestion pipeline orchestration.
//!
//! Brings a collection into agreement with a source directory:
//! discover → hash → load → enrich → chunk → embed → (delete) → insert.
//!
//! # Modes
//!
//! | Mode | Behaviour |
//! |------|-----------|
//! | `full` | Delete the collection (when there are files), then insert everything |
//! | `update` | Per file, delete entries of the current `doc_id` and stale revisions of the same source, then insert |
//! | `append` | Insert without deleting |
//!
//! Failures are scoped to a single file: they are recorded in
//! [`IngestSummary::errors`] and the run moves on. An unhealthy store aborts
//! the run before anything is mutated.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chunk::{create_chunker, Chunker};
use crate::collection::CollectionManager;
use crate::config::{Config, LoaderConfig};
use crate::digest::file_digest;
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::loader::LoaderChain;
use crate::models::{absolute_source, Collection, NewEntry};
use crate::progress::{IngestEvent, IngestObserver, NoProgress};
use crate::scan::discover_files;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestMode {
    Full,
    Update,
    Append,
}

impl FromStr for IngestMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full" => Ok(IngestMode::Full),
            "update" => Ok(IngestMode::Update),
            "append" => Ok(IngestMode::Append),
            other => Err(Error::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for IngestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IngestMode::Full => "full",
            IngestMode::Update => "update",
            IngestMode::Append => "append",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileError {
    pub file: String,
    pub error: String,
}

/// Result of one ingestion run. Always returned, even on partial failure.
#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub mode: IngestMode,
    pub files_seen: u64,
    pub deleted: u64,
    pub added_chunks: u64,
    pub processed: u64,
    pub errors: Vec<FileError>,
    /// Set when the run stopped before touching the store.
    pub aborted: Option<String>,
    /// Set when cancellation skipped one or more files.
    pub cancelled: bool,
}

impl IngestSummary {
    fn new(mode: IngestMode) -> Self {
        Self {
            mode,
            files_seen: 0,
            deleted: 0,
            added_chunks: 0,
            processed: 0,
            errors: Vec::new(),
            aborted: None,
            cancelled: false,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.aborted.is_none() && !self.cancelled
    }
}

struct FileOutcome {
    deleted: u64,
    added: u64,
}

pub struct Ingestor {
    collections: CollectionManager,
    collection_name: String,
    loaders: LoaderChain,
    chunker: Arc<dyn Chunker>,
    embedder: Arc<dyn Embedder>,
    loader_config: LoaderConfig,
    batch_size: usize,
    workers: usize,
    observer: Arc<dyn IngestObserver>,
}

impl Ingestor {
    /// Build an ingestor with the loaders and chunker named in `config`.
    pub fn new(
        collections: CollectionManager,
        embedder: Arc<dyn Embedder>,
        config: &Config,
    ) -> Result<Self> {
        let loaders = LoaderChain::from_config(&config.loader)?;
        let chunker = create_chunker(
            &config.chunking,
            embedder.clone(),
            config.embedding.batch_size,
        )?;
        Ok(Self {
            collections,
            collection_name: config.store.collection.clone(),
            loaders,
            chunker,
            embedder,
            loader_config: config.loader.clone(),
            batch_size: config.embedding.batch_size.max(1),
            workers: config.ingest.workers.max(1),
            observer: Arc::new(NoProgress),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn IngestObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_loaders(mut self, loaders: LoaderChain) -> Self {
        self.loaders = loaders;
        self
    }

    pub fn with_chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = chunker;
        self
    }

    /// Run ingestion over `source_dir`.
    ///
    /// Returns `Err` only for problems that prevent the run from starting
    /// (an unreadable source directory); everything else is in the summary.
    pub async fn ingest(
        &self,
        mode: IngestMode,
        source_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<IngestSummary> {
        let mut summary = IngestSummary::new(mode);

        self.observer.report(IngestEvent::Discovering {
            source_dir: source_dir.to_path_buf(),
        });
        let files = discover_files(source_dir, &self.loader_config)?;
        summary.files_seen = files.len() as u64;
        info!(%mode, files = files.len(), source_dir = %source_dir.display(), "ingest started");

        let status = self.collections.ensure_collection(&self.collection_name).await;
        if !status.health_ok {
            let reason = status
                .error
                .unwrap_or_else(|| "content store unhealthy".to_string());
            warn!(collection = %self.collection_name, %reason, "ingest aborted");
            summary.aborted = Some(reason);
            return Ok(summary);
        }

        if mode == IngestMode::Full && !files.is_empty() {
            match self.collections.delete_collection(&self.collection_name).await {
                Ok(deleted) => {
                    summary.deleted += deleted;
                    self.observer
                        .report(IngestEvent::CollectionCleared { deleted });
                }
                Err(e) => {
                    summary.aborted = Some(format!("could not clear collection: {}", e));
                    return Ok(summary);
                }
            }
            let status = self.collections.ensure_collection(&self.collection_name).await;
            if !status.health_ok {
                summary.aborted = status.error;
                return Ok(summary);
            }
        }

        let collection = match self.collections.find(&self.collection_name).await {
            Ok(Some(c)) => c,
            Ok(None) => {
                summary.aborted = Some(format!(
                    "collection '{}' disappeared during ingest",
                    self.collection_name
                ));
                return Ok(summary);
            }
            Err(e) => {
                summary.aborted = Some(e.to_string());
                return Ok(summary);
            }
        };

        let total = files.len() as u64;
        let done = AtomicU64::new(0);
        let shared = Mutex::new(summary);

        // Byte-identical files share a doc_id. They are grouped and run back
        // to back in one task, so the doc_id is deleted before the first copy
        // is inserted and never again in this run.
        let digests: Vec<(&PathBuf, Result<String>)> = stream::iter(files.iter())
            .map(|path| async move { (path, file_digest(path).await) })
            .buffered(self.workers)
            .collect()
            .await;

        let mut groups: Vec<(String, Vec<&PathBuf>)> = Vec::new();
        let mut by_doc_id: HashMap<String, usize> = HashMap::new();
        for (path, digest) in digests {
            match digest {
                Ok(doc_id) => {
                    debug!(file = %path.display(), %doc_id, "hashed");
                    match by_doc_id.get(&doc_id) {
                        Some(&i) => groups[i].1.push(path),
                        None => {
                            by_doc_id.insert(doc_id.clone(), groups.len());
                            groups.push((doc_id, vec![path]));
                        }
                    }
                }
                Err(e) => self.record(&shared, &done, total, path, Err(e)).await,
            }
        }

        stream::iter(groups.iter().map(|(doc_id, paths)| {
            let collection = &collection;
            let shared = &shared;
            let done = &done;
            async move {
                let mut delete_doc = mode == IngestMode::Update;
                for path in paths {
                    if cancel.is_cancelled() {
                        shared.lock().await.cancelled = true;
                        return;
                    }
                    let result = self
                        .process_file(mode, collection, path, doc_id, delete_doc)
                        .await;
                    if result.is_ok() {
                        delete_doc = false;
                    }
                    self.record(shared, done, total, path, result).await;
                }
            }
        }))
        .buffer_unordered(self.workers)
        .collect::<Vec<()>>()
        .await;

        let mut summary = shared.into_inner();
        summary.errors.sort_by(|a, b| a.file.cmp(&b.file));
        info!(
            %mode,
            processed = summary.processed,
            added_chunks = summary.added_chunks,
            deleted = summary.deleted,
            errors = summary.errors.len(),
            cancelled = summary.cancelled,
            "ingest finished"
        );
        Ok(summary)
    }

    async fn record(
        &self,
        shared: &Mutex<IngestSummary>,
        done: &AtomicU64,
        total: u64,
        path: &Path,
        result: Result<FileOutcome>,
    ) {
        let n = done.fetch_add(1, Ordering::SeqCst) + 1;
        let mut summary = shared.lock().await;
        match result {
            Ok(outcome) => {
                summary.processed += 1;
                summary.deleted += outcome.deleted;
                summary.added_chunks += outcome.added;
                self.observer.report(IngestEvent::FileIngested {
                    file: path.to_path_buf(),
                    chunks: outcome.added,
                    n,
                    total,
                });
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "file skipped");
                summary.errors.push(FileError {
                    file: path.display().to_string(),
                    error: e.to_string(),
                });
                self.observer.report(IngestEvent::FileFailed {
                    file: path.to_path_buf(),
                    error: e.to_string(),
                    n,
                    total,
                });
            }
        }
    }

    /// `delete_doc` is false for later copies of a doc_id already indexed
    /// in this run; stale revisions of `path` itself are always removed.
    async fn process_file(
        &self,
        mode: IngestMode,
        collection: &Collection,
        path: &Path,
        doc_id: &str,
        delete_doc: bool,
    ) -> Result<FileOutcome> {
        let mut docs = self.loaders.load(path, doc_id).await?;
        for doc in &mut docs {
            doc.enrich();
        }

        let chunks = self.chunker.split_documents(&docs).await?;

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.embedder.embed_batch(batch).await?);
        }
        if vectors.len() != chunks.len() {
            return Err(Error::Embedding(format!(
                "expected {} vectors, got {}",
                chunks.len(),
                vectors.len()
            )));
        }

        let entries: Vec<NewEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| NewEntry {
                content: chunk.content,
                metadata: chunk.metadata,
                embedding,
            })
            .collect();

        // Delete-before-insert: a crash between the two leaves the document
        // unindexed until the next run.
        let mut deleted = 0;
        if mode == IngestMode::Update {
            if delete_doc {
                deleted += self
                    .collections
                    .delete_entries_by_doc_id(&collection.name, doc_id)
                    .await?;
            }
            deleted += self
                .collections
                .delete_stale_revisions(&collection.name, &absolute_source(path), doc_id)
                .await?;
        }

        let added = self.collections.insert_entries(collection, &entries).await?;
        debug!(file = %path.display(), deleted, added, "file ingested");
        Ok(FileOutcome { deleted, added })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::embedding::HashingProvider;
    use crate::loader::TextLoader;
    use crate::store::memory::InMemoryStore;
    use tempfile::TempDir;

    fn config(dir: &Path) -> Config {
        let mut config: Config = toml::from_str("[store]\nurl = \"sqlite::memory:\"\n").unwrap();
        config.store = StoreConfig {
            url: "sqlite::memory:".into(),
            collection: "test".into(),
        };
        config.loader.primary = "text".into();
        config.loader.fallback = String::new();
        config.loader.include_globs = vec!["**/*.txt".into()];
        config.ingest.source_dir = dir.to_path_buf();
        config
    }

    fn ingestor(store: InMemoryStore, dir: &Path) -> (Ingestor, CollectionManager) {
        let manager = CollectionManager::new(Arc::new(store));
        let ingestor = Ingestor::new(
            manager.clone(),
            Arc::new(HashingProvider::default()),
            &config(dir),
        )
        .unwrap()
        .with_loaders(LoaderChain::new(Arc::new(TextLoader), None));
        (ingestor, manager)
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("full".parse::<IngestMode>().unwrap(), IngestMode::Full);
        assert_eq!("update".parse::<IngestMode>().unwrap(), IngestMode::Update);
        assert_eq!("append".parse::<IngestMode>().unwrap(), IngestMode::Append);
        assert!(matches!(
            "rebuild".parse::<IngestMode>(),
            Err(Error::InvalidMode(_))
        ));
    }

    #[tokio::test]
    async fn test_append_then_update_replaces() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "Alpha beta. Gamma delta.").unwrap();
        let (ingestor, manager) = ingestor(InMemoryStore::new(), dir.path());
        let cancel = CancellationToken::new();

        let first = ingestor
            .ingest(IngestMode::Append, dir.path(), &cancel)
            .await
            .unwrap();
        assert_eq!(first.files_seen, 1);
        assert_eq!(first.processed, 1);
        assert!(first.added_chunks >= 1);
        assert_eq!(first.deleted, 0);

        let second = ingestor
            .ingest(IngestMode::Update, dir.path(), &cancel)
            .await
            .unwrap();
        assert_eq!(second.deleted, first.added_chunks);
        assert_eq!(second.added_chunks, first.added_chunks);
        assert_eq!(
            manager.stats("test").await.unwrap().entries,
            first.added_chunks
        );
    }

    #[tokio::test]
    async fn test_changed_file_replaces_old_revision() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "First version of the file.").unwrap();
        let (ingestor, manager) = ingestor(InMemoryStore::new(), dir.path());
        let cancel = CancellationToken::new();

        ingestor
            .ingest(IngestMode::Update, dir.path(), &cancel)
            .await
            .unwrap();
        std::fs::write(&file, "Second version, rewritten entirely.").unwrap();
        let summary = ingestor
            .ingest(IngestMode::Update, dir.path(), &cancel)
            .await
            .unwrap();

        assert_eq!(summary.deleted, 1);
        let entries = manager.list_entries("test", 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].content.starts_with("Second version"));
    }

    #[tokio::test]
    async fn test_bad_file_does_not_abort_run() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "Readable text.").unwrap();
        std::fs::write(dir.path().join("b.txt"), [0xff, 0xfe, 0xfd]).unwrap();
        std::fs::write(dir.path().join("c.txt"), "More readable text.").unwrap();
        let (ingestor, _) = ingestor(InMemoryStore::new(), dir.path());

        let summary = ingestor
            .ingest(IngestMode::Append, dir.path(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.files_seen, 3);
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].file.ends_with("b.txt"));
    }

    #[tokio::test]
    async fn test_unhealthy_store_aborts_without_mutation() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "Some text.").unwrap();
        let (ingestor, _) = ingestor(InMemoryStore::unprovisioned(), dir.path());

        let summary = ingestor
            .ingest(IngestMode::Full, dir.path(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(summary.aborted.is_some());
        assert_eq!(summary.files_seen, 1);
        assert_eq!(summary.processed, 0);
        assert_eq!(summary.deleted, 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_processes_nothing() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "Some text.").unwrap();
        let (ingestor, manager) = ingestor(InMemoryStore::new(), dir.path());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = ingestor
            .ingest(IngestMode::Append, dir.path(), &cancel)
            .await
            .unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.processed, 0);
        assert_eq!(manager.stats("test").await.unwrap().entries, 0);
    }

    #[tokio::test]
    async fn test_full_with_no_files_keeps_collection() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "Some text.").unwrap();
        let (ingestor, manager) = ingestor(InMemoryStore::new(), dir.path());
        let cancel = CancellationToken::new();
        ingestor
            .ingest(IngestMode::Append, dir.path(), &cancel)
            .await
            .unwrap();

        let empty = TempDir::new().unwrap();
        let summary = ingestor
            .ingest(IngestMode::Full, empty.path(), &cancel)
            .await
            .unwrap();
        assert_eq!(summary.files_seen, 0);
        assert_eq!(summary.deleted, 0);
        assert_eq!(manager.stats("test").await.unwrap().entries, 1);
    }

    #[tokio::test]
    async fn test_identical_files_all_stay_indexed_in_update() {
        let dir = TempDir::new().unwrap();
        for name in ["a.txt", "b.txt", "c.txt"] {
            std::fs::write(dir.path().join(name), "Shared handbook text.").unwrap();
        }
        std::fs::write(dir.path().join("d.txt"), "Something else entirely.").unwrap();

        let mut config = config(dir.path());
        config.ingest.workers = 3;
        let manager = CollectionManager::new(Arc::new(InMemoryStore::new()));
        let ingestor = Ingestor::new(
            manager.clone(),
            Arc::new(HashingProvider::default()),
            &config,
        )
        .unwrap()
        .with_loaders(LoaderChain::new(Arc::new(TextLoader), None));
        let cancel = CancellationToken::new();

        let stored_files = |entries: Vec<crate::models::StoredEntry>| {
            let mut names: Vec<String> = entries
                .iter()
                .filter_map(|e| e.metadata.get("source_filename"))
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
            names.sort();
            names
        };

        let first = ingestor
            .ingest(IngestMode::Update, dir.path(), &cancel)
            .await
            .unwrap();
        assert_eq!(first.processed, 4);
        assert_eq!(first.added_chunks, 4);
        assert_eq!(first.deleted, 0);
        let entries = manager.list_entries("test", 10).await.unwrap();
        assert_eq!(stored_files(entries), vec!["a.txt", "b.txt", "c.txt", "d.txt"]);

        let second = ingestor
            .ingest(IngestMode::Update, dir.path(), &cancel)
            .await
            .unwrap();
        assert_eq!(second.deleted, 4);
        assert_eq!(second.added_chunks, 4);
        let entries = manager.list_entries("test", 10).await.unwrap();
        assert_eq!(stored_files(entries), vec!["a.txt", "b.txt", "c.txt", "d.txt"]);
    }
}
