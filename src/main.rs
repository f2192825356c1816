//! # ankiai CLI
//!
//! The `ankiai` binary drives the retrieval side of flashcard generation:
//! it indexes documents into a local vector store and prints the context a
//! card generator would receive for a query or a page.
//!
//! ## Usage
//!
//! ```bash
//! ankiai --config ./ankiai.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ankiai init` | Create the SQLite store and the configured collection |
//! | `ankiai ingest <file>` | Chunk, embed, and index a PDF or text file |
//! | `ankiai retrieve "<query>"` | Show the top-k chunks for a query |
//! | `ankiai context "<query>"` | Print the assembled context for a query |
//! | `ankiai page <file> --page N` | Print the generation context for one page |
//! | `ankiai sources` | List indexed documents and their chunk counts |
//! | `ankiai collections` | List collections in the store |
//! | `ankiai clear` | Remove chunks from the collection |
//!
//! ## Examples
//!
//! ```bash
//! # Index pages 10-40 of a book into its own collection
//! ankiai ingest ./books/ddia.pdf --start 10 --end 40 --per-document
//!
//! # Context for page 12, metadata headers included
//! ankiai page ./books/ddia.pdf --page 12 --per-document
//!
//! # Relevance-ordered context for a free-form query
//! ankiai context "leader election" --ordering relevance --metadata
//! ```
//!
//! Logging goes to stderr. `-v` enables info, `-vv` debug; `RUST_LOG`
//! overrides both.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use ankiai::commands;
use ankiai::config::{self, Config};
use ankiai::context::ChunkOrdering;

/// Retrieval-augmented context for flashcard generation.
#[derive(Parser)]
#[command(
    name = "ankiai",
    about = "Index documents and build retrieval context for flashcard generation",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./ankiai.toml")]
    config: PathBuf,

    /// Override the collection named in `[store].collection`.
    #[arg(long, global = true)]
    collection: Option<String>,

    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the store and collection. Safe to run repeatedly.
    Init,

    /// Chunk, embed, and index a document.
    ///
    /// Re-ingesting the same file replaces its previous chunks.
    Ingest {
        /// PDF, `.txt`, or `.md` file.
        file: PathBuf,

        /// First page to index (1-indexed).
        #[arg(long)]
        start: Option<u32>,

        /// Last page to index (inclusive).
        #[arg(long)]
        end: Option<u32>,

        /// Index into a collection derived from the file path.
        #[arg(long)]
        per_document: bool,
    },

    /// Show the chunks most similar to a query.
    Retrieve {
        query: String,

        #[arg(long)]
        top_k: Option<usize>,

        /// Drop results scoring below this (0-1).
        #[arg(long)]
        min_score: Option<f64>,

        /// Restrict to one source document path.
        #[arg(long)]
        source: Option<String>,
    },

    /// Print the assembled context for a query.
    Context {
        query: String,

        /// `position` (document order) or `relevance` (best first).
        #[arg(long, value_parser = commands::parse_ordering)]
        ordering: Option<ChunkOrdering>,

        /// Prefix each chunk with its source and pages.
        #[arg(long)]
        metadata: bool,

        /// Token budget for the context (0 = unbounded).
        #[arg(long)]
        max_tokens: Option<usize>,

        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Print the generation context for one page of a document.
    Page {
        file: PathBuf,

        #[arg(long)]
        page: u32,

        /// Skip retrieval and print the page text.
        #[arg(long)]
        baseline: bool,

        /// Retrieve from the collection derived from the file path.
        #[arg(long)]
        per_document: bool,
    },

    /// List indexed documents.
    Sources,

    /// List collections in the store.
    Collections,

    /// Remove chunks from the collection.
    Clear {
        /// Only remove chunks of this source document.
        #[arg(long)]
        source: Option<String>,
    },
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut cfg: Config = config::load_config(&cli.config)?;
    if let Some(collection) = cli.collection {
        cfg.store.collection = collection;
    }

    match cli.command {
        Commands::Init => {
            commands::run_init(&cfg).await?;
        }
        Commands::Ingest {
            file,
            start,
            end,
            per_document,
        } => {
            commands::run_ingest(&cfg, &file, start, end, per_document).await?;
        }
        Commands::Retrieve {
            query,
            top_k,
            min_score,
            source,
        } => {
            let mut options = cfg.retrieval.options();
            if let Some(k) = top_k {
                options.top_k = k;
            }
            if let Some(min) = min_score {
                options.min_score = min;
            }
            options.source_filter = source;
            commands::run_retrieve(&cfg, &query, &options).await?;
        }
        Commands::Context {
            query,
            ordering,
            metadata,
            max_tokens,
            top_k,
        } => {
            let mut retrieve = cfg.retrieval.options();
            if let Some(k) = top_k {
                retrieve.top_k = k;
            }
            let mut context = cfg.context.options();
            if let Some(ordering) = ordering {
                context.ordering = ordering;
            }
            if metadata {
                context.include_metadata = true;
            }
            if let Some(budget) = max_tokens {
                context.max_tokens = (budget > 0).then_some(budget);
            }
            commands::run_context(&cfg, &query, &retrieve, &context).await?;
        }
        Commands::Page {
            file,
            page,
            baseline,
            per_document,
        } => {
            commands::run_page(&cfg, &file, page, baseline, per_document).await?;
        }
        Commands::Sources => {
            commands::run_sources(&cfg).await?;
        }
        Commands::Collections => {
            commands::run_collections(&cfg).await?;
        }
        Commands::Clear { source } => {
            commands::run_clear(&cfg, source.as_deref()).await?;
        }
    }

    Ok(())
}
