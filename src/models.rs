//! Core data models used throughout the pipeline.
//!
//! [`Document`] and [`Chunk`] are transient and live for a single ingestion
//! run. [`Collection`] and [`StoredEntry`] mirror the persisted rows.

use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Free-form metadata attached to documents, chunks, and stored entries.
pub type Metadata = Map<String, Value>;

/// Metadata key holding the content hash of the source file.
pub const META_DOC_ID: &str = "doc_id";
/// Metadata key holding the absolute source path.
pub const META_SOURCE: &str = "source";
/// Metadata key holding the source file name.
pub const META_SOURCE_FILENAME: &str = "source_filename";
/// Metadata key set by page-aware loaders (1-based).
pub const META_PAGE: &str = "page";

/// The `source` metadata value for a file: its absolute path.
pub fn absolute_source(path: &Path) -> String {
    std::path::absolute(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .to_string()
}

/// Extracted text of a source file (or one page of it).
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    pub raw_text: String,
    pub doc_id: String,
    pub metadata: Metadata,
}

impl Document {
    pub fn new(path: PathBuf, raw_text: String, doc_id: &str) -> Self {
        Self {
            path,
            raw_text,
            doc_id: doc_id.to_string(),
            metadata: Metadata::new(),
        }
    }

    /// Attach the identifying metadata every chunk must carry.
    pub fn enrich(&mut self) {
        let filename = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        self.metadata
            .insert(META_DOC_ID.to_string(), Value::String(self.doc_id.clone()));
        self.metadata.insert(
            META_SOURCE.to_string(),
            Value::String(absolute_source(&self.path)),
        );
        self.metadata
            .insert(META_SOURCE_FILENAME.to_string(), Value::String(filename));
    }
}

/// A span of a document's text; the unit that gets embedded and stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub content: String,
    pub metadata: Metadata,
}

impl Chunk {
    pub fn doc_id(&self) -> Option<&str> {
        self.metadata.get(META_DOC_ID).and_then(Value::as_str)
    }
}

/// A named partition of the content store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Collection {
    pub id: String,
    pub name: String,
    pub metadata: Value,
}

/// A chunk plus its vector, ready to be inserted.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub content: String,
    pub metadata: Metadata,
    pub embedding: Vec<f32>,
}

/// A persisted (chunk, vector, metadata) row.
#[derive(Debug, Clone, Serialize)]
pub struct StoredEntry {
    pub id: String,
    pub collection_id: String,
    pub content: String,
    pub metadata: Metadata,
    #[serde(skip)]
    pub embedding: Vec<f32>,
}

impl StoredEntry {
    pub fn doc_id(&self) -> Option<&str> {
        self.metadata.get(META_DOC_ID).and_then(Value::as_str)
    }
}

/// A stored entry with its cosine distance to some query vector.
#[derive(Debug, Clone)]
pub struct ScoredEntry {
    pub entry: StoredEntry,
    pub distance: f32,
}

/// Entry and document counts for one collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CollectionStats {
    pub entries: u64,
    pub documents: u64,
}
