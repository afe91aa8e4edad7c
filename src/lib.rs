//! # rag-index
//!
//! Document ingestion and vector retrieval for retrieval-augmented answering.
//!
//! Files in a source directory are content-hashed, loaded into documents,
//! split into semantically coherent chunks, embedded, and stored in a named
//! collection. Queries are answered by similarity, score-threshold, or MMR
//! ranking, and the ranked chunks are packed into a context payload for an
//! answer-generation step.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌─────────────┐   ┌────────────┐
//! │  Source  │──▶│ Hash + Load  │──▶│ Chunk+Embed │──▶│ Collection │
//! │   dir    │   │ (SHA-256)    │   │ (semantic)  │   │  (SQLite)  │
//! └──────────┘   └──────────────┘   └─────────────┘   └─────┬──────┘
//!                                                           │
//!                                      ┌────────────────────┤
//!                                      ▼                    ▼
//!                                ┌───────────┐       ┌────────────┐
//!                                │ Retriever │──────▶│  Context   │
//!                                │ sim / MMR │       │  builder   │
//!                                └───────────┘       └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rag init                         # create database
//! rag ingest --mode update         # index ./pdf-documents
//! rag retrieve "refund policy" --search-type mmr
//! rag context "What is the refund policy?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`digest`] | SHA-256 document identity |
//! | [`scan`] | Source directory discovery |
//! | [`loader`] | PDF and text loaders with fallback |
//! | [`chunk`] | Semantic and paragraph chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Content store trait, SQLite and in-memory backends |
//! | [`collection`] | Collection lifecycle and health |
//! | [`ingest`] | Ingestion modes and per-file pipeline |
//! | [`progress`] | Ingest progress reporting |
//! | [`retrieve`] | Similarity, threshold, and MMR retrieval |
//! | [`context`] | Context assembly and source attribution |
//! | [`service`] | Operational entry points |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod collection;
pub mod config;
pub mod context;
pub mod db;
pub mod digest;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod loader;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod retrieve;
pub mod scan;
pub mod service;
pub mod store;
