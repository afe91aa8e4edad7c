//! Operational entry points exposed to outer layers (the CLI, an HTTP
//! server, scripts).
//!
//! Each method is a function of its inputs plus the content store; the only
//! shared state is the store connection.

use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::collection::{CollectionManager, CollectionStatus};
use crate::config::Config;
use crate::context::{build_context, AnswerContext};
use crate::db;
use crate::embedding::{create_provider, Embedder};
use crate::error::Result;
use crate::ingest::{IngestMode, IngestSummary, Ingestor};
use crate::models::{CollectionStats, StoredEntry};
use crate::progress::IngestObserver;
use crate::retrieve::{RetrieveOptions, RetrievedEntry, Retriever, RetrieverSettings, SearchType};
use crate::store::sqlite::SqliteStore;
use crate::store::Store;

pub struct RagService {
    config: Config,
    collections: CollectionManager,
    embedder: Arc<dyn Embedder>,
    settings: RetrieverSettings,
}

impl RagService {
    /// Wire the SQLite store and the configured embedding provider.
    ///
    /// The store connection is lazy: an unreachable database shows up later
    /// as degraded health, while a bad provider configuration fails here.
    pub fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect_lazy(&config.store)?;
        let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool));
        let embedder = create_provider(&config.embedding)?;
        Self::new(config.clone(), store, embedder)
    }

    pub fn new(config: Config, store: Arc<dyn Store>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let settings = RetrieverSettings::from_config(&config.retrieval)?;
        Ok(Self {
            config,
            collections: CollectionManager::new(store),
            embedder,
            settings,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn collection_name(&self) -> &str {
        &self.config.store.collection
    }

    pub async fn ensure_collection(&self) -> CollectionStatus {
        self.collections.ensure_collection(self.collection_name()).await
    }

    /// Run ingestion. `mode` is validated before anything else happens.
    pub async fn ingest(
        &self,
        mode: &str,
        source_dir: Option<&Path>,
        observer: Arc<dyn IngestObserver>,
        cancel: &CancellationToken,
    ) -> Result<IngestSummary> {
        let mode: IngestMode = mode.parse()?;
        let source_dir = source_dir.unwrap_or(&self.config.ingest.source_dir);

        let ingestor = Ingestor::new(self.collections.clone(), self.embedder.clone(), &self.config)?
            .with_observer(observer);
        ingestor.ingest(mode, source_dir, cancel).await
    }

    pub async fn retrieve(&self, query: &str, opts: &RetrieveOptions) -> Result<Vec<RetrievedEntry>> {
        self.retriever(self.settings.clone()).retrieve(query, opts).await
    }

    /// Retrieve with a different search type than the configured one.
    pub async fn retrieve_as(
        &self,
        search_type: SearchType,
        query: &str,
        opts: &RetrieveOptions,
    ) -> Result<Vec<RetrievedEntry>> {
        let settings = RetrieverSettings {
            search_type,
            ..self.settings.clone()
        };
        self.retriever(settings).retrieve(query, opts).await
    }

    fn retriever(&self, settings: RetrieverSettings) -> Retriever {
        Retriever::new(
            self.collections.clone(),
            self.collection_name(),
            self.embedder.clone(),
            settings,
        )
    }

    /// The `{question, context, sources}` payload for answer generation.
    pub async fn answer_context(&self, question: &str) -> Result<AnswerContext> {
        let results = self.retrieve(question, &RetrieveOptions::default()).await?;
        Ok(build_context(question, &results, self.config.context.max_tokens))
    }

    pub async fn delete_collection(&self) -> Result<u64> {
        self.collections.delete_collection(self.collection_name()).await
    }

    pub async fn delete_document(&self, doc_id: &str) -> Result<u64> {
        self.collections
            .delete_entries_by_doc_id(self.collection_name(), doc_id)
            .await
    }

    pub async fn stats(&self) -> Result<CollectionStats> {
        self.collections.stats(self.collection_name()).await
    }

    pub async fn inspect(&self, limit: usize) -> Result<Vec<StoredEntry>> {
        self.collections
            .list_entries(self.collection_name(), limit)
            .await
    }
}
