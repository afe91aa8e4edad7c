//! Document chunkers.
//!
//! Two strategies implement [`Chunker`]:
//!
//! - **[`SemanticChunker`]** splits on sentence boundaries and starts a new
//!   chunk wherever the embedding distance between neighbouring sentence
//!   windows exceeds a breakpoint threshold.
//! - **[`ParagraphChunker`]** packs paragraphs (`\n\n`-separated) into chunks
//!   under a `max_tokens` budget, hard-splitting oversized paragraphs.
//!
//! Each document is split on its own, and every chunk inherits a copy of
//! its document's metadata. Whitespace-only documents produce no chunks.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::config::ChunkingConfig;
use crate::embedding::{cosine_similarity, Embedder};
use crate::error::{Error, Result};
use crate::models::{Chunk, Document};

/// Approximate chars-per-token ratio used by [`ParagraphChunker`].
const CHARS_PER_TOKEN: usize = 4;

#[async_trait]
pub trait Chunker: Send + Sync {
    fn name(&self) -> &str;

    async fn split_documents(&self, docs: &[Document]) -> Result<Vec<Chunk>>;
}

pub fn create_chunker(
    config: &ChunkingConfig,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
) -> Result<Arc<dyn Chunker>> {
    match config.strategy.as_str() {
        "semantic" => {
            let breakpoint = match config.breakpoint.as_str() {
                "percentile" => Breakpoint::Percentile,
                "standard_deviation" => Breakpoint::StandardDeviation,
                "interquartile" => Breakpoint::Interquartile,
                other => {
                    return Err(Error::Config(format!("Unknown breakpoint type: '{}'", other)))
                }
            };
            Ok(Arc::new(SemanticChunker {
                embedder,
                breakpoint,
                amount: config
                    .breakpoint_amount
                    .unwrap_or_else(|| breakpoint.default_amount()),
                buffer_size: config.buffer_size,
                batch_size: batch_size.max(1),
            }))
        }
        "paragraph" => Ok(Arc::new(ParagraphChunker::new(config.max_tokens))),
        other => Err(Error::Config(format!("Unknown chunking strategy: '{}'", other))),
    }
}

// ============ Semantic ============

/// How the distance threshold is derived from a document's distances.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Breakpoint {
    /// The `amount`-th percentile of the distances.
    Percentile,
    /// Mean plus `amount` standard deviations.
    StandardDeviation,
    /// Mean plus `amount` times the interquartile range.
    Interquartile,
}

impl Breakpoint {
    pub fn default_amount(self) -> f64 {
        match self {
            Breakpoint::Percentile => 95.0,
            Breakpoint::StandardDeviation => 3.0,
            Breakpoint::Interquartile => 1.5,
        }
    }

    pub fn threshold(self, distances: &[f64], amount: f64) -> f64 {
        match self {
            Breakpoint::Percentile => percentile(distances, amount),
            Breakpoint::StandardDeviation => mean(distances) + amount * std_dev(distances),
            Breakpoint::Interquartile => {
                let iqr = percentile(distances, 75.0) - percentile(distances, 25.0);
                mean(distances) + amount * iqr
            }
        }
    }
}

pub struct SemanticChunker {
    embedder: Arc<dyn Embedder>,
    breakpoint: Breakpoint,
    amount: f64,
    buffer_size: usize,
    batch_size: usize,
}

impl SemanticChunker {
    pub fn new(embedder: Arc<dyn Embedder>, breakpoint: Breakpoint) -> Self {
        Self {
            embedder,
            breakpoint,
            amount: breakpoint.default_amount(),
            buffer_size: 1,
            batch_size: 64,
        }
    }

    pub fn with_amount(mut self, amount: f64) -> Self {
        self.amount = amount;
        self
    }

    pub async fn split_text(&self, text: &str) -> Result<Vec<String>> {
        let sentences = split_sentences(text);
        if sentences.len() <= 1 {
            return Ok(sentences);
        }

        let windows = combine_sentences(&sentences, self.buffer_size);
        let mut embeddings = Vec::with_capacity(windows.len());
        for batch in windows.chunks(self.batch_size) {
            embeddings.extend(
                self.embedder
                    .embed_batch(batch)
                    .await
                    .map_err(|e| Error::Chunk(format!("sentence embedding failed: {}", e)))?,
            );
        }
        if embeddings.len() != windows.len() {
            return Err(Error::Chunk(format!(
                "expected {} sentence embeddings, got {}",
                windows.len(),
                embeddings.len()
            )));
        }

        let distances: Vec<f64> = embeddings
            .windows(2)
            .map(|pair| 1.0 - cosine_similarity(&pair[0], &pair[1]) as f64)
            .collect();
        let threshold = self.breakpoint.threshold(&distances, self.amount);
        debug!(sentences = sentences.len(), threshold, "semantic breakpoints");

        let mut chunks = Vec::new();
        let mut start = 0;
        for (i, &d) in distances.iter().enumerate() {
            if d > threshold {
                chunks.push(sentences[start..=i].join(" "));
                start = i + 1;
            }
        }
        if start < sentences.len() {
            chunks.push(sentences[start..].join(" "));
        }
        Ok(chunks)
    }
}

#[async_trait]
impl Chunker for SemanticChunker {
    fn name(&self) -> &str {
        "semantic"
    }

    async fn split_documents(&self, docs: &[Document]) -> Result<Vec<Chunk>> {
        let mut out = Vec::new();
        for doc in docs {
            for content in self.split_text(&doc.raw_text).await? {
                out.push(Chunk {
                    content,
                    metadata: doc.metadata.clone(),
                });
            }
        }
        Ok(out)
    }
}

/// Split after `.`, `?` or `!` when followed by whitespace.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '?' | '!') {
            continue;
        }
        let end = i + c.len_utf8();
        if !matches!(chars.peek(), Some((_, next)) if next.is_whitespace()) {
            continue;
        }
        push_trimmed(&mut sentences, &text[start..end]);
        while matches!(chars.peek(), Some((_, next)) if next.is_whitespace()) {
            chars.next();
        }
        start = chars.peek().map(|(j, _)| *j).unwrap_or(text.len());
    }
    push_trimmed(&mut sentences, &text[start..]);
    sentences
}

fn push_trimmed(out: &mut Vec<String>, s: &str) {
    let s = s.trim();
    if !s.is_empty() {
        out.push(s.to_string());
    }
}

/// Each sentence joined with up to `buffer_size` neighbours on either side.
fn combine_sentences(sentences: &[String], buffer_size: usize) -> Vec<String> {
    (0..sentences.len())
        .map(|i| {
            let lo = i.saturating_sub(buffer_size);
            let hi = (i + buffer_size + 1).min(sentences.len());
            sentences[lo..hi].join(" ")
        })
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

/// Percentile with linear interpolation between closest ranks.
fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

// ============ Paragraph ============

pub struct ParagraphChunker {
    max_tokens: usize,
}

impl ParagraphChunker {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens: max_tokens.max(1),
        }
    }

    /// Split text into chunks on paragraph boundaries, respecting `max_tokens`.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        let max_chars = self.max_tokens * CHARS_PER_TOKEN;
        let mut chunks = Vec::new();
        let mut current = String::new();

        for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
            let would_be = if current.is_empty() {
                para.len()
            } else {
                current.len() + 2 + para.len()
            };
            if would_be > max_chars && !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }

            if para.len() > max_chars {
                hard_split(para, max_chars, &mut chunks);
                continue;
            }

            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(para);
        }

        if !current.is_empty() {
            chunks.push(current);
        }
        chunks
    }
}

/// Split an oversized paragraph at the last newline or space before the
/// limit, falling back to the nearest char boundary.
fn hard_split(para: &str, max_chars: usize, out: &mut Vec<String>) {
    let mut remaining = para;
    while !remaining.is_empty() {
        if remaining.len() <= max_chars {
            push_trimmed(out, remaining);
            break;
        }
        let mut limit = max_chars;
        while !remaining.is_char_boundary(limit) {
            limit -= 1;
        }
        let split_at = remaining[..limit]
            .rfind('\n')
            .or_else(|| remaining[..limit].rfind(' '))
            .map(|pos| pos + 1)
            .unwrap_or(limit.max(next_boundary(remaining)));
        push_trimmed(out, &remaining[..split_at]);
        remaining = &remaining[split_at..];
    }
}

fn next_boundary(s: &str) -> usize {
    s.chars().next().map(char::len_utf8).unwrap_or(s.len())
}

#[async_trait]
impl Chunker for ParagraphChunker {
    fn name(&self) -> &str {
        "paragraph"
    }

    async fn split_documents(&self, docs: &[Document]) -> Result<Vec<Chunk>> {
        Ok(docs
            .iter()
            .flat_map(|doc| {
                self.split_text(&doc.raw_text)
                    .into_iter()
                    .map(|content| Chunk {
                        content,
                        metadata: doc.metadata.clone(),
                    })
            })
            .collect())
    }
}
