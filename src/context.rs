//! Context assembly for the answer-generation step.
//!
//! Retrieved chunks are joined with blank lines into one context string that
//! fits a budget of whitespace-delimited tokens. Lowest-ranked chunks are
//! dropped first; if the top chunk alone is over budget it is cut to the
//! budget. `sources` lists exactly the chunks that made it in, in order.

use serde::Serialize;
use serde_json::Value;
use std::path::Path;

use crate::models::{Metadata, META_PAGE, META_SOURCE, META_SOURCE_FILENAME};
use crate::retrieve::RetrievedEntry;

const SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    pub title: String,
    pub page: Option<u64>,
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerContext {
    pub question: String,
    pub context: String,
    pub sources: Vec<SourceRef>,
}

pub fn build_context(question: &str, results: &[RetrievedEntry], max_tokens: usize) -> AnswerContext {
    let mut parts: Vec<String> = Vec::new();
    let mut sources = Vec::new();
    let mut used = 0;

    for (rank, result) in results.iter().enumerate() {
        let content = &result.entry.content;
        let tokens = content.split_whitespace().count();

        if used + tokens > max_tokens {
            if rank == 0 && max_tokens > 0 {
                let truncated: Vec<&str> = content.split_whitespace().take(max_tokens).collect();
                parts.push(truncated.join(" "));
                sources.push(source_ref(&result.entry.metadata));
            }
            break;
        }

        used += tokens;
        parts.push(content.clone());
        sources.push(source_ref(&result.entry.metadata));
    }

    AnswerContext {
        question: question.to_string(),
        context: parts.join(SEPARATOR),
        sources,
    }
}

fn meta_str<'a>(metadata: &'a Metadata, key: &str) -> Option<&'a str> {
    metadata
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn meta_u64(metadata: &Metadata, key: &str) -> Option<u64> {
    match metadata.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Title: `title`, then `source_filename`, then the file name of the source
/// path, then `"untitled"`. Page: `page`, then `page_number`. Source:
/// `source`, then `source_path`.
pub fn source_ref(metadata: &Metadata) -> SourceRef {
    let source = meta_str(metadata, META_SOURCE)
        .or_else(|| meta_str(metadata, "source_path"))
        .map(str::to_string);

    let title = meta_str(metadata, "title")
        .or_else(|| meta_str(metadata, META_SOURCE_FILENAME))
        .map(str::to_string)
        .or_else(|| {
            source.as_deref().and_then(|s| {
                Path::new(s)
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
            })
        })
        .unwrap_or_else(|| "untitled".to_string());

    SourceRef {
        title,
        page: meta_u64(metadata, META_PAGE).or_else(|| meta_u64(metadata, "page_number")),
        source,
    }
}
