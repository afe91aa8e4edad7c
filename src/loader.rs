//! Document loaders: turn a source file into one or more [`Document`]s.
//!
//! | Name | Output |
//! |------|--------|
//! | `pdf_pages` | one document per PDF page, `page` metadata (1-based) |
//! | `pdf_text` | one document holding the whole PDF's text |
//! | `text` | one document holding the file as UTF-8 |
//!
//! Loaders are synchronous; [`LoaderChain`] runs them on the blocking pool
//! and falls back to a second loader when the first one fails.

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

use crate::config::LoaderConfig;
use crate::error::{Error, Result};
use crate::models::{Document, META_PAGE};

pub trait Loader: Send + Sync {
    fn name(&self) -> &str;

    /// Extract documents from `path`. Every returned document carries `doc_id`.
    fn load(&self, path: &Path, doc_id: &str) -> Result<Vec<Document>>;
}

fn read_pdf(path: &Path) -> Result<Vec<u8>> {
    let is_pdf = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false);
    if !is_pdf {
        return Err(Error::Load(format!("{} is not a PDF", path.display())));
    }
    Ok(std::fs::read(path)?)
}

/// Page-aware PDF extraction.
pub struct PdfPagesLoader;

impl Loader for PdfPagesLoader {
    fn name(&self) -> &str {
        "pdf_pages"
    }

    fn load(&self, path: &Path, doc_id: &str) -> Result<Vec<Document>> {
        let bytes = read_pdf(path)?;
        let pages = pdf_extract::extract_text_from_mem_by_pages(&bytes)
            .map_err(|e| Error::Load(format!("PDF extraction failed: {}", e)))?;

        Ok(pages
            .into_iter()
            .enumerate()
            .map(|(i, text)| {
                let mut doc = Document::new(path.to_path_buf(), text, doc_id);
                doc.metadata
                    .insert(META_PAGE.to_string(), Value::from(i as u64 + 1));
                doc
            })
            .collect())
    }
}

/// Whole-file PDF extraction; no page metadata.
pub struct PdfTextLoader;

impl Loader for PdfTextLoader {
    fn name(&self) -> &str {
        "pdf_text"
    }

    fn load(&self, path: &Path, doc_id: &str) -> Result<Vec<Document>> {
        let bytes = read_pdf(path)?;
        let text = pdf_extract::extract_text_from_mem(&bytes)
            .map_err(|e| Error::Load(format!("PDF extraction failed: {}", e)))?;
        Ok(vec![Document::new(path.to_path_buf(), text, doc_id)])
    }
}

/// Plain UTF-8 text files.
pub struct TextLoader;

impl Loader for TextLoader {
    fn name(&self) -> &str {
        "text"
    }

    fn load(&self, path: &Path, doc_id: &str) -> Result<Vec<Document>> {
        let bytes = std::fs::read(path)?;
        let text = String::from_utf8(bytes)
            .map_err(|_| Error::Load(format!("{} is not valid UTF-8", path.display())))?;
        Ok(vec![Document::new(path.to_path_buf(), text, doc_id)])
    }
}

pub fn create_loader(name: &str) -> Result<Arc<dyn Loader>> {
    match name {
        "pdf_pages" => Ok(Arc::new(PdfPagesLoader)),
        "pdf_text" => Ok(Arc::new(PdfTextLoader)),
        "text" => Ok(Arc::new(TextLoader)),
        other => Err(Error::Config(format!(
            "Unknown loader: '{}'. Must be pdf_pages, pdf_text, or text.",
            other
        ))),
    }
}

/// A primary loader with an optional fallback.
#[derive(Clone)]
pub struct LoaderChain {
    primary: Arc<dyn Loader>,
    fallback: Option<Arc<dyn Loader>>,
}

impl LoaderChain {
    pub fn new(primary: Arc<dyn Loader>, fallback: Option<Arc<dyn Loader>>) -> Self {
        Self { primary, fallback }
    }

    pub fn from_config(config: &LoaderConfig) -> Result<Self> {
        let primary = create_loader(&config.primary)?;
        let fallback = if config.fallback.is_empty() {
            None
        } else {
            Some(create_loader(&config.fallback)?)
        };
        Ok(Self::new(primary, fallback))
    }

    /// Load with the primary loader, then the fallback if the primary fails.
    ///
    /// Fails only when every configured loader fails.
    pub async fn load(&self, path: &Path, doc_id: &str) -> Result<Vec<Document>> {
        let primary_err = match run_blocking(self.primary.clone(), path, doc_id).await {
            Ok(docs) => return Ok(docs),
            Err(e) => e,
        };

        let Some(fallback) = &self.fallback else {
            return Err(primary_err);
        };
        warn!(
            file = %path.display(),
            loader = self.primary.name(),
            fallback = fallback.name(),
            error = %primary_err,
            "primary loader failed, trying fallback"
        );

        run_blocking(fallback.clone(), path, doc_id)
            .await
            .map_err(|fallback_err| {
                Error::Load(format!(
                    "{} failed ({}); {} failed ({})",
                    self.primary.name(),
                    primary_err,
                    fallback.name(),
                    fallback_err
                ))
            })
    }
}

/// Run a loader on the blocking pool; a panicking extractor becomes a load error.
async fn run_blocking(loader: Arc<dyn Loader>, path: &Path, doc_id: &str) -> Result<Vec<Document>> {
    let path: PathBuf = path.to_path_buf();
    let doc_id = doc_id.to_string();
    let name = loader.name().to_string();
    tokio::task::spawn_blocking(move || loader.load(&path, &doc_id))
        .await
        .map_err(|e| Error::Load(format!("{} loader aborted: {}", name, e)))?
}
