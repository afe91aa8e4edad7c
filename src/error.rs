//! Error types for the ingestion and retrieval core.
//!
//! The variants follow the failure classes the pipeline distinguishes:
//! configuration problems are fatal, connectivity problems degrade health,
//! loader/chunker/embedding problems are scoped to a single file.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Content store unreachable: {0}")]
    Connectivity(String),

    #[error("Content store error: {0}")]
    Store(String),

    #[error("Load error: {0}")]
    Load(String),

    #[error("Chunking error: {0}")]
    Chunk(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Invalid ingest mode: '{0}'. Must be full, update, or append.")]
    InvalidMode(String),

    #[error("Invalid search type: '{0}'. Must be similarity, similarity_score_threshold, or mmr.")]
    InvalidSearchType(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for failures of the store connection itself (as opposed to a
    /// failing statement on a healthy connection).
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Error::Connectivity(_))
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Error::Connectivity(err.to_string()),
            other => Error::Store(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Embedding(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
