//! CLI command implementations.
//!
//! Each `run_*` function backs one `ankiai` subcommand: it opens what it
//! needs, does the work through the library API, and prints a plain-text
//! report to stdout.

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::config::Config;
use crate::context::{build_baseline_context, build_context, ChunkOrdering, ContextOptions};
use crate::loader::load_document;
use crate::models::RetrievalResult;
use crate::pipeline::{collection_name_for, RagPipeline};
use crate::retriever::RetrieveOptions;
use crate::vector_store::VectorStore;

/// Create the database and the configured collection.
pub async fn run_init(cfg: &Config) -> Result<()> {
    let store = VectorStore::open(&cfg.store).await?;
    println!("Store initialized: {}", cfg.store.path.display());
    println!("  collection: {}", store.collection());
    println!("  dims: {}", store.dims());
    store.close().await;
    Ok(())
}

pub async fn run_ingest(
    cfg: &Config,
    file: &Path,
    start: Option<u32>,
    end: Option<u32>,
    per_document: bool,
) -> Result<()> {
    let doc = load_document(file, start, end)
        .with_context(|| format!("Failed to load {}", file.display()))?;

    let mut pipeline = open_pipeline(cfg, &doc.file_path, per_document).await?;
    let report = pipeline.ingest(&doc).await?;

    println!("ingest {}", report.source_document);
    println!("  collection: {}", report.collection);
    println!("  pages: {}-{}", report.page_range.0, report.page_range.1);
    println!("  chunks: {}", report.chunks);
    println!("  tokens: {}", report.tokens);
    println!("  model: {}", report.model);

    pipeline.close().await;
    Ok(())
}

pub async fn run_retrieve(cfg: &Config, query: &str, options: &RetrieveOptions) -> Result<()> {
    let pipeline = RagPipeline::open(cfg).await?;
    let results = pipeline.retriever().retrieve(query, options).await?;

    if results.is_empty() {
        println!("No results.");
    } else {
        print_results(&results);
    }

    pipeline.close().await;
    Ok(())
}

pub async fn run_context(
    cfg: &Config,
    query: &str,
    retrieve: &RetrieveOptions,
    context: &ContextOptions,
) -> Result<()> {
    let pipeline = RagPipeline::open(cfg).await?;
    let results = pipeline.retriever().retrieve(query, retrieve).await?;
    let built = build_context(&results, context);

    if let Some(notice) = &built.truncation {
        eprintln!(
            "Warning: context truncated from {} to {} tokens (budget {}); dropped {}",
            notice.tokens_before,
            notice.tokens_after,
            notice.budget,
            notice.dropped_chunk_ids.join(", ")
        );
    }
    println!("{}", built.text);

    pipeline.close().await;
    Ok(())
}

/// Print the generation context for one page of `file`: retrieved context,
/// or the page itself with `baseline`.
pub async fn run_page(
    cfg: &Config,
    file: &Path,
    page: u32,
    baseline: bool,
    per_document: bool,
) -> Result<()> {
    let doc = load_document(file, Some(page), Some(page))
        .with_context(|| format!("Failed to load {}", file.display()))?;

    if baseline {
        println!("{}", build_baseline_context(&doc, page)?);
        return Ok(());
    }

    let pipeline = open_pipeline(cfg, &doc.file_path, per_document).await?;
    let page_text = build_baseline_context(&doc, page)?;
    let ctx = pipeline.context_for_page(&page_text, page).await?;

    eprintln!(
        "page {}: {} chunk(s) retrieved, {} tokens{}",
        ctx.page_number,
        ctx.chunks_retrieved,
        ctx.context_tokens,
        if ctx.is_fallback() { " (page text fallback)" } else { "" }
    );
    println!("{}", ctx.text);

    pipeline.close().await;
    Ok(())
}

pub async fn run_sources(cfg: &Config) -> Result<()> {
    let store = VectorStore::open(&cfg.store).await?;
    let sources = store.list_sources().await?;

    if sources.is_empty() {
        println!("No sources in collection '{}'.", store.collection());
    } else {
        println!("{:<8} SOURCE", "CHUNKS");
        for source in &sources {
            println!("{:<8} {}", source.chunks, source.source_document);
        }
    }

    store.close().await;
    Ok(())
}

pub async fn run_collections(cfg: &Config) -> Result<()> {
    let store = VectorStore::open(&cfg.store).await?;
    println!("{:<40} {:<6} {:<8} MODEL", "COLLECTION", "DIMS", "CHUNKS");
    for c in store.list_collections().await? {
        println!(
            "{:<40} {:<6} {:<8} {}",
            c.name,
            c.dims,
            c.chunks,
            c.model.as_deref().unwrap_or("-")
        );
    }
    store.close().await;
    Ok(())
}

pub async fn run_clear(cfg: &Config, source: Option<&str>) -> Result<()> {
    let store = VectorStore::open(&cfg.store).await?;
    let removed = match source {
        Some(source) => store.delete_by_source(source).await?,
        None => store.clear().await?,
    };
    println!("Removed {} chunk(s) from '{}'.", removed, store.collection());
    store.close().await;
    Ok(())
}

/// Parse `--ordering`.
pub fn parse_ordering(s: &str) -> std::result::Result<ChunkOrdering, String> {
    s.parse()
}

async fn open_pipeline(cfg: &Config, file_path: &str, per_document: bool) -> Result<RagPipeline> {
    if !cfg.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }
    let pipeline = if per_document {
        RagPipeline::open_collection(cfg, &collection_name_for(file_path)).await?
    } else {
        RagPipeline::open(cfg).await?
    };
    Ok(pipeline)
}

fn print_results(results: &[RetrievalResult]) {
    for (i, result) in results.iter().enumerate() {
        let chunk = &result.chunk;
        println!(
            "{}. [{:.3}] {} (pages {})",
            i + 1,
            result.score,
            chunk.source_name(),
            chunk.page_label()
        );
        let excerpt: String = chunk.own_text().chars().take(160).collect();
        println!("    excerpt: \"{}\"", excerpt.replace('\n', " ").trim());
        println!("    id: {}", chunk.chunk_id);
        println!();
    }
}
