//! End-to-end pipeline tests against a provisioned SQLite store.

use async_trait::async_trait;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use rag_index::config::Config;
use rag_index::db;
use rag_index::embedding::{Embedder, HashingProvider};
use rag_index::error::{Error, Result};
use rag_index::migrate;
use rag_index::progress::{IngestEvent, IngestObserver, NoProgress};
use rag_index::retrieve::{RetrieveOptions, SearchType};
use rag_index::service::RagService;
use rag_index::store::sqlite::SqliteStore;

struct CountingEmbedder {
    inner: HashingProvider,
    calls: AtomicUsize,
}

#[async_trait]
impl Embedder for CountingEmbedder {
    fn model_name(&self) -> &str {
        "counting"
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed(text).await
    }
}

struct OfflineEmbedder;

#[async_trait]
impl Embedder for OfflineEmbedder {
    fn model_name(&self) -> &str {
        "offline"
    }

    fn dims(&self) -> usize {
        8
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(Error::Embedding("provider offline".into()))
    }
}

/// Cancels the run as soon as the first file is ingested.
struct CancelAfterFirstFile {
    cancel: CancellationToken,
}

impl IngestObserver for CancelAfterFirstFile {
    fn report(&self, event: IngestEvent) {
        if let IngestEvent::FileIngested { .. } = event {
            self.cancel.cancel();
        }
    }
}

const TOPICS: [(&str, &str); 6] = [
    (
        "rust.txt",
        "Rust programs are compiled by cargo. The borrow checker enforces ownership rules.",
    ),
    (
        "python.txt",
        "Python notebooks train machine learning models. PyTorch runs tensors on the GPU.",
    ),
    (
        "deploy.txt",
        "Kubernetes schedules containers across nodes. Docker builds container images.",
    ),
    (
        "cooking.txt",
        "Bread dough rises overnight. Bake the loaf at a high oven temperature.",
    ),
    (
        "garden.txt",
        "Tomatoes need full sun and steady watering. Prune the vines in summer.",
    ),
    (
        "rust_async.txt",
        "Async Rust uses futures and the tokio runtime. Cargo pulls crates from the registry.",
    ),
];

fn write_corpus(dir: &Path) {
    for (name, text) in TOPICS {
        fs::write(dir.join(name), text).unwrap();
    }
}

fn config(root: &Path, db_file: &str) -> Config {
    let toml = format!(
        r#"[store]
url = "sqlite:{root}/{db_file}"
collection = "pipeline"

[embedding]
provider = "hashing"
dims = 128
batch_size = 4

[loader]
primary = "text"
fallback = ""
include_globs = ["**/*.txt"]

[ingest]
source_dir = "{root}/docs"
workers = 3

[retrieval]
search_type = "similarity"
k = 3
fetch_k = 10
score_threshold = 0.2
"#,
        root = root.display(),
        db_file = db_file,
    );
    toml::from_str(&toml).unwrap()
}

struct Env {
    _tmp: TempDir,
    config: Config,
}

impl Env {
    async fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let docs = tmp.path().join("docs");
        fs::create_dir_all(&docs).unwrap();
        write_corpus(&docs);

        let config = config(tmp.path(), "data/rag.sqlite");
        migrate::run_migrations(&config.store).await.unwrap();
        Self { _tmp: tmp, config }
    }

    fn docs(&self) -> &Path {
        &self.config.ingest.source_dir
    }

    fn service_with(&self, embedder: Arc<dyn Embedder>) -> RagService {
        let pool = db::connect_lazy(&self.config.store).unwrap();
        RagService::new(self.config.clone(), Arc::new(SqliteStore::new(pool)), embedder).unwrap()
    }

    fn service(&self) -> RagService {
        self.service_with(Arc::new(HashingProvider::new(128)))
    }
}

async fn ingest(svc: &RagService, mode: &str) -> rag_index::ingest::IngestSummary {
    svc.ingest(mode, None, Arc::new(NoProgress), &CancellationToken::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_update_twice_keeps_entry_count() {
    let env = Env::new().await;
    let svc = env.service();

    let first = ingest(&svc, "update").await;
    assert!(first.is_clean(), "{:?}", first.errors);
    assert_eq!(first.files_seen, 6);
    assert_eq!(first.processed, 6);
    assert_eq!(first.deleted, 0);
    let after_first = svc.stats().await.unwrap();
    assert_eq!(after_first.entries, first.added_chunks);
    assert_eq!(after_first.documents, 6);

    let second = ingest(&svc, "update").await;
    assert_eq!(second.deleted, first.added_chunks);
    assert_eq!(svc.stats().await.unwrap(), after_first);
}

#[tokio::test]
async fn test_append_duplicates_and_full_rebuilds() {
    let env = Env::new().await;
    let svc = env.service();

    let once = ingest(&svc, "append").await.added_chunks;
    ingest(&svc, "append").await;
    ingest(&svc, "append").await;
    assert_eq!(svc.stats().await.unwrap().entries, once * 3);
    assert_eq!(svc.stats().await.unwrap().documents, 6);

    let full = ingest(&svc, "full").await;
    assert_eq!(full.deleted, once * 3);
    assert_eq!(full.added_chunks, once);
    assert_eq!(svc.stats().await.unwrap().entries, once);
}

#[tokio::test]
async fn test_changed_file_replaces_previous_revision() {
    let env = Env::new().await;
    let svc = env.service();
    ingest(&svc, "update").await;

    fs::write(
        env.docs().join("garden.txt"),
        "Roses bloom in late spring. Mulch keeps the soil moist.",
    )
    .unwrap();
    ingest(&svc, "update").await;

    assert_eq!(svc.stats().await.unwrap().documents, 6);
    let results = svc
        .retrieve("tomatoes vines watering", &RetrieveOptions { k: Some(20), ..Default::default() })
        .await
        .unwrap();
    assert!(results.iter().all(|r| !r.entry.content.contains("Tomatoes")));
}

#[tokio::test]
async fn test_similarity_ranks_matching_topic_first() {
    let env = Env::new().await;
    let svc = env.service();
    ingest(&svc, "update").await;

    let results = svc
        .retrieve("Kubernetes containers Docker images", &RetrieveOptions::default())
        .await
        .unwrap();
    assert_eq!(results.len(), 3);
    assert!(results[0].entry.content.contains("Kubernetes") || results[0].entry.content.contains("Docker"));
    for pair in results.windows(2) {
        assert!(pair[0].distance <= pair[1].distance);
    }
    for r in &results {
        assert!((r.score - (1.0 - r.distance)).abs() < 1e-6);
    }
}

#[tokio::test]
async fn test_mmr_picks_distinct_entries_from_candidates() {
    let env = Env::new().await;
    let svc = env.service();
    ingest(&svc, "update").await;

    let query = "Rust cargo crates";
    let top10: HashSet<String> = svc
        .retrieve(query, &RetrieveOptions { k: Some(10), ..Default::default() })
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.entry.id)
        .collect();

    let mmr = svc
        .retrieve_as(
            SearchType::Mmr,
            query,
            &RetrieveOptions {
                k: Some(3),
                fetch_k: Some(10),
                threshold: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(mmr.len(), 3);
    let ids: HashSet<&str> = mmr.iter().map(|r| r.entry.id.as_str()).collect();
    assert_eq!(ids.len(), 3);
    assert!(ids.iter().all(|id| top10.contains(*id)));
}

#[tokio::test]
async fn test_threshold_never_returns_lower_scores() {
    let env = Env::new().await;
    let svc = env.service();
    ingest(&svc, "update").await;

    for threshold in [0.0f32, 0.2, 0.5, 0.9] {
        let results = svc
            .retrieve_as(
                SearchType::SimilarityScoreThreshold,
                "Bake bread dough in the oven",
                &RetrieveOptions {
                    k: Some(10),
                    threshold: Some(threshold),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(results.iter().all(|r| r.score >= threshold));
    }
}

#[tokio::test]
async fn test_delete_collection_removes_entries() {
    let env = Env::new().await;
    let svc = env.service();
    ingest(&svc, "update").await;

    let entries = svc.stats().await.unwrap().entries;
    assert_eq!(svc.delete_collection().await.unwrap(), entries);
    assert_eq!(svc.stats().await.unwrap().entries, 0);
    assert!(svc
        .retrieve("cargo", &RetrieveOptions::default())
        .await
        .unwrap()
        .is_empty());

    // The next ingest recreates it.
    let again = ingest(&svc, "append").await;
    assert_eq!(svc.stats().await.unwrap().entries, again.added_chunks);
}

#[tokio::test]
async fn test_delete_document_by_doc_id() {
    let env = Env::new().await;
    let svc = env.service();
    ingest(&svc, "update").await;

    let doc_id = rag_index::digest::file_digest(&env.docs().join("cooking.txt"))
        .await
        .unwrap();
    let deleted = svc.delete_document(&doc_id).await.unwrap();
    assert!(deleted >= 1);
    assert_eq!(svc.stats().await.unwrap().documents, 5);
}

#[tokio::test]
async fn test_query_is_embedded_once() {
    let env = Env::new().await;
    let counter = Arc::new(CountingEmbedder {
        inner: HashingProvider::new(128),
        calls: AtomicUsize::new(0),
    });
    let svc = env.service_with(counter.clone());

    // Empty collection.
    assert!(svc
        .retrieve("anything", &RetrieveOptions::default())
        .await
        .unwrap()
        .is_empty());
    assert_eq!(counter.calls.load(Ordering::SeqCst), 1);

    ingest(&svc, "update").await;

    for search_type in [SearchType::Similarity, SearchType::SimilarityScoreThreshold, SearchType::Mmr] {
        let before = counter.calls.load(Ordering::SeqCst);
        svc.retrieve_as(search_type, "cargo", &RetrieveOptions::default())
            .await
            .unwrap();
        assert_eq!(counter.calls.load(Ordering::SeqCst), before + 1);
    }

    let before = counter.calls.load(Ordering::SeqCst);
    let none = svc
        .retrieve("cargo", &RetrieveOptions { k: Some(0), ..Default::default() })
        .await
        .unwrap();
    assert!(none.is_empty());
    assert_eq!(counter.calls.load(Ordering::SeqCst), before + 1);
}

#[tokio::test]
async fn test_embedding_failure_is_per_file() {
    let env = Env::new().await;
    let svc = env.service_with(Arc::new(OfflineEmbedder));

    let summary = ingest(&svc, "update").await;
    assert!(summary.aborted.is_none());
    assert_eq!(summary.processed, 0);
    assert_eq!(summary.errors.len(), 6);
    assert_eq!(svc.stats().await.unwrap().entries, 0);
}

#[tokio::test]
async fn test_embedding_failure_keeps_existing_entries() {
    let env = Env::new().await;
    let indexed = ingest(&env.service(), "update").await;
    assert!(indexed.is_clean());
    let before = env.service().stats().await.unwrap();

    let offline = env.service_with(Arc::new(OfflineEmbedder));
    let summary = ingest(&offline, "update").await;
    assert_eq!(summary.errors.len(), 6);
    assert_eq!(summary.deleted, 0);
    assert_eq!(summary.processed, 0);
    assert_eq!(env.service().stats().await.unwrap(), before);
}

#[tokio::test]
async fn test_cancel_mid_run_stops_remaining_files() {
    let env = Env::new().await;
    let mut config = env.config.clone();
    config.ingest.workers = 1;
    let pool = db::connect_lazy(&config.store).unwrap();
    let svc = RagService::new(
        config,
        Arc::new(SqliteStore::new(pool)),
        Arc::new(HashingProvider::new(128)),
    )
    .unwrap();

    let cancel = CancellationToken::new();
    let observer = Arc::new(CancelAfterFirstFile {
        cancel: cancel.clone(),
    });
    let summary = svc.ingest("update", None, observer, &cancel).await.unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.files_seen, 6);
    assert!(summary.processed > 0);
    assert!(summary.processed < summary.files_seen);
    assert_eq!(svc.stats().await.unwrap().documents, summary.processed);
}

#[tokio::test]
async fn test_invalid_mode_is_rejected() {
    let env = Env::new().await;
    let svc = env.service();

    let err = svc
        .ingest("rebuild", None, Arc::new(NoProgress), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidMode(ref m) if m == "rebuild"));
    assert_eq!(svc.stats().await.unwrap().entries, 0);
}

#[tokio::test]
async fn test_missing_database_degrades_health() {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    fs::create_dir_all(&docs).unwrap();
    write_corpus(&docs);

    let config = config(tmp.path(), "never-created.sqlite");
    let svc = RagService::from_config(&config).unwrap();

    let status = svc.ensure_collection().await;
    assert!(!status.health_ok);
    assert!(!status.exists);
    assert!(status.error.is_some());

    let summary = ingest(&svc, "update").await;
    assert!(summary.aborted.is_some());
    assert_eq!(summary.processed, 0);
    assert!(!tmp.path().join("never-created.sqlite").exists());
}

#[tokio::test]
async fn test_cancelled_run_processes_nothing() {
    let env = Env::new().await;
    let svc = env.service();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let summary = svc
        .ingest("update", None, Arc::new(NoProgress), &cancel)
        .await
        .unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.files_seen, 6);
    assert_eq!(summary.processed, 0);
    assert_eq!(svc.stats().await.unwrap().entries, 0);
}

#[tokio::test]
async fn test_answer_context_respects_budget() {
    let env = Env::new().await;
    let mut config = env.config.clone();
    config.context.max_tokens = 15;
    let pool = db::connect_lazy(&config.store).unwrap();
    let svc = RagService::new(
        config,
        Arc::new(SqliteStore::new(pool)),
        Arc::new(HashingProvider::new(128)),
    )
    .unwrap();
    ingest(&svc, "update").await;

    let ctx = svc.answer_context("How does cargo build Rust?").await.unwrap();
    assert!(ctx.context.split_whitespace().count() <= 15);
    assert!(!ctx.sources.is_empty());
    assert_eq!(ctx.sources.len(), ctx.context.split("\n\n").count());
    assert!(ctx.sources.iter().all(|s| s.title.ends_with(".txt")));
}
