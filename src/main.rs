//! # rag CLI (`rag`)
//!
//! Command-line front end for the ingestion-and-retrieval core.
//!
//! ## Usage
//!
//! ```bash
//! rag --config ./config/rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rag init` | Create the SQLite database and its tables |
//! | `rag health` | Check the store and ensure the collection exists |
//! | `rag ingest --mode <full\|update\|append>` | Index the source directory |
//! | `rag retrieve "<query>"` | Show ranked entries for a query |
//! | `rag context "<query>"` | Emit the `{question, context, sources}` payload as JSON |
//! | `rag collection stats\|inspect\|delete\|delete-doc` | Collection maintenance |
//!
//! ## Examples
//!
//! ```bash
//! rag init --config ./config/rag.toml
//! rag ingest --mode update --config ./config/rag.toml
//! rag retrieve "What is the refund policy?" --search-type mmr --k 3
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use rag_index::config;
use rag_index::context::source_ref;
use rag_index::ingest::IngestSummary;
use rag_index::migrate;
use rag_index::progress::{format_number, ProgressMode};
use rag_index::retrieve::{RetrieveOptions, RetrievedEntry, SearchType};
use rag_index::service::RagService;

/// Characters of chunk content shown per result by `rag retrieve`.
const PREVIEW_CHARS: usize = 700;

/// rag: content-addressed document ingestion and vector retrieval.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "rag",
    about = "Index documents into a vector collection and retrieve ranked context",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rag.toml")]
    config: PathBuf,

    /// Log debug output from the pipeline to stderr (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database file and tables. Idempotent.
    Init,

    /// Check the content store and ensure the collection exists.
    ///
    /// Prints the status as JSON; exits non-zero when the store is unhealthy.
    Health,

    /// Ingest the source directory into the collection.
    Ingest {
        /// `full` (rebuild), `update` (replace per file), or `append`.
        #[arg(long, default_value = "update")]
        mode: String,

        /// Source directory; defaults to `ingest.source_dir` from the config.
        #[arg(long)]
        source: Option<PathBuf>,

        /// Print the summary as JSON.
        #[arg(long)]
        json: bool,

        /// Progress on stderr: off, human, or json. Defaults to human on a TTY.
        #[arg(long)]
        progress: Option<ProgressMode>,
    },

    /// Retrieve ranked entries for a query.
    Retrieve {
        query: String,

        #[arg(long)]
        k: Option<usize>,

        /// Candidates fetched before MMR re-ranking.
        #[arg(long)]
        fetch_k: Option<usize>,

        /// Minimum score for `similarity_score_threshold`.
        #[arg(long)]
        threshold: Option<f32>,

        /// Override `retrieval.search_type`.
        #[arg(long)]
        search_type: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Print the answer-generation payload for a question as JSON.
    Context { question: String },

    /// Inspect or maintain the collection.
    Collection {
        #[command(subcommand)]
        action: CollectionAction,
    },
}

#[derive(Subcommand)]
enum CollectionAction {
    /// Entry and document counts.
    Stats,
    /// Show the first entries of the collection.
    Inspect {
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Delete the collection and every entry in it.
    Delete,
    /// Delete the entries of one document.
    DeleteDoc { doc_id: String },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "rag_index=debug,rag=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    if let Commands::Init = cli.command {
        migrate::run_migrations(&cfg.store).await?;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let service = RagService::from_config(&cfg).context("Failed to set up the pipeline")?;

    match cli.command {
        Commands::Init => unreachable!("handled above"),
        Commands::Health => {
            let status = service.ensure_collection().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
            if !status.health_ok {
                bail!("content store unhealthy");
            }
        }
        Commands::Ingest {
            mode,
            source,
            json,
            progress,
        } => {
            let observer = progress
                .unwrap_or_else(ProgressMode::default_for_tty)
                .observer();

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("interrupt received, finishing in-flight files...");
                    on_signal.cancel();
                }
            });

            let summary = service
                .ingest(&mode, source.as_deref(), observer, &cancel)
                .await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }
            if let Some(reason) = &summary.aborted {
                bail!("ingest aborted: {}", reason);
            }
        }
        Commands::Retrieve {
            query,
            k,
            fetch_k,
            threshold,
            search_type,
            json,
        } => {
            let opts = RetrieveOptions {
                k,
                fetch_k,
                threshold,
            };
            let results = match search_type {
                Some(s) => {
                    let search_type: SearchType = s.parse()?;
                    service.retrieve_as(search_type, &query, &opts).await?
                }
                None => service.retrieve(&query, &opts).await?,
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                print_results(&results);
            }
        }
        Commands::Context { question } => {
            let payload = service.answer_context(&question).await?;
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        Commands::Collection { action } => match action {
            CollectionAction::Stats => {
                let stats = service.stats().await?;
                println!("collection {}", cfg.store.collection);
                println!("  entries: {}", format_number(stats.entries));
                println!("  documents: {}", format_number(stats.documents));
            }
            CollectionAction::Inspect { limit } => {
                let entries = service.inspect(limit).await?;
                if entries.is_empty() {
                    println!("No entries.");
                }
                for (i, entry) in entries.iter().enumerate() {
                    println!("--- entry {} ({}) ---", i + 1, entry.id);
                    println!("metadata: {}", serde_json::to_string(&entry.metadata)?);
                    println!("{}", preview(&entry.content));
                }
            }
            CollectionAction::Delete => {
                let deleted = service.delete_collection().await?;
                println!(
                    "deleted collection {} ({} entries)",
                    cfg.store.collection,
                    format_number(deleted)
                );
            }
            CollectionAction::DeleteDoc { doc_id } => {
                let deleted = service.delete_document(&doc_id).await?;
                println!("deleted {} entries for doc_id {}", format_number(deleted), doc_id);
            }
        },
    }

    Ok(())
}

fn print_summary(summary: &IngestSummary) {
    println!("ingest {}", summary.mode);
    println!("  files seen: {}", format_number(summary.files_seen));
    println!("  processed: {}", format_number(summary.processed));
    println!("  added chunks: {}", format_number(summary.added_chunks));
    println!("  deleted: {}", format_number(summary.deleted));
    if !summary.errors.is_empty() {
        println!("  errors: {}", summary.errors.len());
        for e in &summary.errors {
            println!("    {}: {}", e.file, e.error);
        }
    }
    if summary.cancelled {
        println!("cancelled");
    } else if summary.aborted.is_none() {
        println!("ok");
    }
}

fn print_results(results: &[RetrievedEntry]) {
    if results.is_empty() {
        println!("No results.");
        return;
    }
    for (i, r) in results.iter().enumerate() {
        let src = source_ref(&r.entry.metadata);
        let page = src.page.map(|p| format!(" p.{}", p)).unwrap_or_default();
        println!("{}. [{:.3}] {}{}", i + 1, r.score, src.title, page);
        println!("   {}", preview(&r.entry.content).replace('\n', "\n   "));
    }
}

fn preview(content: &str) -> String {
    match content.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}...", &content[..idx]),
        None => content.to_string(),
    }
}
