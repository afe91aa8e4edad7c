//! Ingestion progress observers.
//!
//! The pipeline never prints; it reports [`IngestEvent`]s to an injected
//! [`IngestObserver`]. The CLI picks one via [`ProgressMode`]. Output goes to
//! **stderr** so stdout remains parseable for scripts.

use std::io::Write;
use std::path::PathBuf;

/// A single progress event for an ingestion run.
#[derive(Clone, Debug)]
pub enum IngestEvent {
    /// Walking the source directory; total unknown.
    Discovering { source_dir: PathBuf },
    /// Full mode cleared the collection before processing.
    CollectionCleared { deleted: u64 },
    /// A file finished: `n` of `total` files done.
    FileIngested {
        file: PathBuf,
        chunks: u64,
        n: u64,
        total: u64,
    },
    /// A file was skipped because of an error.
    FileFailed {
        file: PathBuf,
        error: String,
        n: u64,
        total: u64,
    },
}

pub trait IngestObserver: Send + Sync {
    fn report(&self, event: IngestEvent);
}

/// Human-friendly progress on stderr: "ingest  12 / 1,024 files  report.pdf (8 chunks)".
pub struct StderrProgress;

impl IngestObserver for StderrProgress {
    fn report(&self, event: IngestEvent) {
        let line = match &event {
            IngestEvent::Discovering { source_dir } => {
                format!("ingest  discovering {}...\n", source_dir.display())
            }
            IngestEvent::CollectionCleared { deleted } => {
                format!("ingest  cleared collection ({} entries)\n", format_number(*deleted))
            }
            IngestEvent::FileIngested {
                file,
                chunks,
                n,
                total,
            } => format!(
                "ingest  {} / {} files  {} ({} chunks)\n",
                format_number(*n),
                format_number(*total),
                file_label(file),
                format_number(*chunks)
            ),
            IngestEvent::FileFailed {
                file,
                error,
                n,
                total,
            } => format!(
                "ingest  {} / {} files  {} FAILED: {}\n",
                format_number(*n),
                format_number(*total),
                file_label(file),
                error
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestObserver for JsonProgress {
    fn report(&self, event: IngestEvent) {
        let obj = match &event {
            IngestEvent::Discovering { source_dir } => serde_json::json!({
                "event": "progress",
                "phase": "discovering",
                "source_dir": source_dir.display().to_string(),
            }),
            IngestEvent::CollectionCleared { deleted } => serde_json::json!({
                "event": "progress",
                "phase": "cleared",
                "deleted": deleted,
            }),
            IngestEvent::FileIngested {
                file,
                chunks,
                n,
                total,
            } => serde_json::json!({
                "event": "progress",
                "phase": "ingesting",
                "file": file.display().to_string(),
                "chunks": chunks,
                "n": n,
                "total": total,
            }),
            IngestEvent::FileFailed {
                file,
                error,
                n,
                total,
            } => serde_json::json!({
                "event": "file_error",
                "phase": "ingesting",
                "file": file.display().to_string(),
                "error": error,
                "n": n,
                "total": total,
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op observer when progress is disabled.
pub struct NoProgress;

impl IngestObserver for NoProgress {
    fn report(&self, _event: IngestEvent) {}
}

fn file_label(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn observer(&self) -> std::sync::Arc<dyn IngestObserver> {
        match self {
            ProgressMode::Off => std::sync::Arc::new(NoProgress),
            ProgressMode::Human => std::sync::Arc::new(StderrProgress),
            ProgressMode::Json => std::sync::Arc::new(JsonProgress),
        }
    }
}

impl std::str::FromStr for ProgressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" | "none" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => Err(format!(
                "Invalid progress mode: '{}'. Must be off, human, or json.",
                other
            )),
        }
    }
}
