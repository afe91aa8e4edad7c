//! TOML configuration.
//!
//! Every component receives the section it needs at construction time;
//! nothing reads process-global state after [`load_config`] returns.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub context: ContextConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// sqlx SQLite URL, e.g. `sqlite:data/rag.sqlite`.
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
}

fn default_collection() -> String {
    "rag_app_collection".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_concurrency() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoaderConfig {
    #[serde(default = "default_primary_loader")]
    pub primary: String,
    /// Empty string disables the fallback.
    #[serde(default = "default_fallback_loader")]
    pub fallback: String,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            primary: default_primary_loader(),
            fallback: default_fallback_loader(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_primary_loader() -> String {
    "pdf_pages".to_string()
}
fn default_fallback_loader() -> String {
    "pdf_text".to_string()
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.pdf".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default = "default_breakpoint")]
    pub breakpoint: String,
    /// Defaults depend on `breakpoint`: 95 (percentile), 3 (standard
    /// deviations), 1.5 (interquartile multiplier).
    #[serde(default)]
    pub breakpoint_amount: Option<f64>,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            breakpoint: default_breakpoint(),
            breakpoint_amount: None,
            buffer_size: default_buffer_size(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_strategy() -> String {
    "semantic".to_string()
}
fn default_breakpoint() -> String {
    "percentile".to_string()
}
fn default_buffer_size() -> usize {
    1
}
fn default_max_tokens() -> usize {
    700
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            source_dir: default_source_dir(),
            workers: default_workers(),
        }
    }
}

fn default_source_dir() -> PathBuf {
    PathBuf::from("./pdf-documents")
}
fn default_workers() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_search_type")]
    pub search_type: String,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_fetch_k")]
    pub fetch_k: usize,
    #[serde(default)]
    pub score_threshold: Option<f32>,
    #[serde(default = "default_lambda_mult")]
    pub lambda_mult: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            search_type: default_search_type(),
            k: default_k(),
            fetch_k: default_fetch_k(),
            score_threshold: None,
            lambda_mult: default_lambda_mult(),
        }
    }
}

fn default_search_type() -> String {
    "similarity".to_string()
}
fn default_k() -> usize {
    4
}
fn default_fetch_k() -> usize {
    20
}
fn default_lambda_mult() -> f32 {
    0.5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    /// Budget for the formatted context, in whitespace-delimited tokens.
    #[serde(default = "default_context_tokens")]
    pub max_tokens: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_context_tokens(),
        }
    }
}

fn default_context_tokens() -> usize {
    3000
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Store
    if config.store.url.trim().is_empty() {
        anyhow::bail!("store.url must be set");
    }
    if config.store.collection.trim().is_empty() {
        anyhow::bail!("store.collection must not be empty");
    }

    // Embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "hashing" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, hashing, or local.",
            other
        ),
    }
    if matches!(config.embedding.provider.as_str(), "openai" | "ollama") {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.max_concurrency == 0 {
        anyhow::bail!("embedding.max_concurrency must be > 0");
    }

    // Loader
    let fallback = Some(config.loader.fallback.as_str()).filter(|f| !f.is_empty());
    for name in std::iter::once(config.loader.primary.as_str()).chain(fallback) {
        match name {
            "pdf_pages" | "pdf_text" | "text" => {}
            other => anyhow::bail!(
                "Unknown loader: '{}'. Must be pdf_pages, pdf_text, or text.",
                other
            ),
        }
    }
    if config.loader.include_globs.is_empty() {
        anyhow::bail!("loader.include_globs must list at least one pattern");
    }

    // Chunking
    match config.chunking.strategy.as_str() {
        "semantic" | "paragraph" => {}
        other => anyhow::bail!(
            "Unknown chunking strategy: '{}'. Must be semantic or paragraph.",
            other
        ),
    }
    match config.chunking.breakpoint.as_str() {
        "percentile" | "standard_deviation" | "interquartile" => {}
        other => anyhow::bail!(
            "Unknown breakpoint type: '{}'. Must be percentile, standard_deviation, or interquartile.",
            other
        ),
    }
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }

    // Ingest
    if config.ingest.workers == 0 {
        anyhow::bail!("ingest.workers must be > 0");
    }

    // Retrieval
    let retrieval = &config.retrieval;
    match retrieval.search_type.as_str() {
        "similarity" | "similarity_score_threshold" | "mmr" => {}
        other => anyhow::bail!(
            "Unknown search type: '{}'. Must be similarity, similarity_score_threshold, or mmr.",
            other
        ),
    }
    if retrieval.k == 0 {
        anyhow::bail!("retrieval.k must be >= 1");
    }
    if retrieval.fetch_k < retrieval.k {
        anyhow::bail!("retrieval.fetch_k must be >= retrieval.k");
    }
    if !(0.0..=1.0).contains(&retrieval.lambda_mult) {
        anyhow::bail!("retrieval.lambda_mult must be in [0.0, 1.0]");
    }
    if let Some(t) = retrieval.score_threshold {
        if !(0.0..=1.0).contains(&t) {
            anyhow::bail!("retrieval.score_threshold must be in [0.0, 1.0]");
        }
    } else if retrieval.search_type == "similarity_score_threshold" {
        anyhow::bail!("retrieval.score_threshold is required for similarity_score_threshold");
    }

    // Context
    if config.context.max_tokens == 0 {
        anyhow::bail!("context.max_tokens must be > 0");
    }

    Ok(())
}
