//! End-to-end RAG flow for one collection.
//!
//! ```text
//! Document ─► chunk_document ─► EmbeddingGenerator ─► VectorStore::replace_source
//!
//! page text ─► build_page_query ─► Retriever ─► build_context ─► prompt context
//! ```
//!
//! [`RagPipeline::ingest`] is the expensive, once-per-document step.
//! [`RagPipeline::context_for_page`] runs per page and falls back to the
//! page's own text when nothing relevant is retrieved.

use std::path::Path;

use crate::chunk::{chunk_document, path_digest};
use crate::config::{Config, StoreConfig};
use crate::context::{build_context, TruncationNotice};
use crate::embed::EmbeddingGenerator;
use crate::error::{RagError, Result};
use crate::models::{Chunk, Document, RetrievalResult};
use crate::retriever::{RetrieveOptions, Retriever};
use crate::vector_store::VectorStore;

const QUERY_PREFIX: &str = "Key concepts and information for creating educational flashcards: ";
const QUERY_PREVIEW_CHARS: usize = 500;
const COLLECTION_STEM_CHARS: usize = 20;

/// Outcome of [`RagPipeline::ingest`].
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub source_document: String,
    pub collection: String,
    pub page_range: (u32, u32),
    pub chunks: usize,
    pub tokens: usize,
    pub model: String,
}

/// Context assembled for one page, with what was retrieved to build it.
#[derive(Debug, Clone)]
pub struct PageContext {
    pub page_number: u32,
    pub query: String,
    pub text: String,
    /// Chunks included in `text`.
    pub chunks_retrieved: usize,
    /// Scores of the retrieved chunks, best first.
    pub top_scores: Vec<f64>,
    pub context_tokens: usize,
    pub truncation: Option<TruncationNotice>,
}

impl PageContext {
    /// True when no chunk made it into the context and `text` is the page
    /// itself.
    pub fn is_fallback(&self) -> bool {
        self.chunks_retrieved == 0
    }
}

pub struct RagPipeline {
    config: Config,
    retriever: Retriever,
}

impl RagPipeline {
    /// Open the collection named in `config.store`.
    pub async fn open(config: &Config) -> Result<Self> {
        Self::open_collection(config, &config.store.collection).await
    }

    /// Open the per-document collection for `path` (see [`collection_name_for`]).
    pub async fn for_document(config: &Config, path: &str) -> Result<Self> {
        Self::open_collection(config, &collection_name_for(path)).await
    }

    pub async fn open_collection(config: &Config, collection: &str) -> Result<Self> {
        if !config.embedding.is_enabled() {
            return Err(RagError::config(
                "embedding provider is disabled; set [embedding] provider in config",
            ));
        }

        let store_config = StoreConfig {
            collection: collection.to_string(),
            ..config.store.clone()
        };
        let store = VectorStore::open(&store_config).await?;
        let generator = EmbeddingGenerator::from_config(&config.embedding)?;
        let retriever = Retriever::new(store, generator)?;

        Ok(Self::from_parts(config.clone(), retriever))
    }

    /// Assemble a pipeline from an existing retriever (e.g. one using a
    /// custom provider).
    pub fn from_parts(config: Config, retriever: Retriever) -> Self {
        Self { config, retriever }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn store(&self) -> &VectorStore {
        self.retriever.store()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Chunk, embed, and index `doc`, superseding any chunks previously
    /// stored for the same file.
    pub async fn ingest(&mut self, doc: &Document) -> Result<IngestReport> {
        let mut chunks: Vec<Chunk> = chunk_document(doc, &self.config.chunking)?.collect();
        if chunks.is_empty() {
            return Err(RagError::validation(format!(
                "no chunks created from {}",
                doc.file_path
            )));
        }
        let tokens: usize = chunks.iter().map(|c| c.token_count).sum();
        tracing::info!(source = %doc.file_path, chunks = chunks.len(), tokens, "chunked document");

        self.retriever.generator().generate_embeddings(&mut chunks).await?;

        let model = self.retriever.generator().model_name().to_string();
        self.retriever.store_mut().bind_model(&model).await?;
        self.retriever
            .store()
            .replace_source(&doc.file_path, &chunks)
            .await?;

        let report = IngestReport {
            source_document: doc.file_path.clone(),
            collection: self.store().collection().to_string(),
            page_range: doc.page_range,
            chunks: chunks.len(),
            tokens,
            model,
        };
        tracing::info!(
            source = %report.source_document,
            collection = %report.collection,
            chunks = report.chunks,
            "indexed document"
        );
        Ok(report)
    }

    /// Retrieve with the configured defaults.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievalResult>> {
        self.retriever
            .retrieve(query, &self.config.retrieval.options())
            .await
    }

    /// Build the generation context for one page.
    pub async fn context_for_page(&self, page_text: &str, page_number: u32) -> Result<PageContext> {
        self.context_for_page_with(page_text, page_number, &self.config.retrieval.options())
            .await
    }

    pub async fn context_for_page_with(
        &self,
        page_text: &str,
        page_number: u32,
        options: &RetrieveOptions,
    ) -> Result<PageContext> {
        let query = build_page_query(page_text);
        let results = self.retriever.retrieve(&query, options).await?;

        if results.is_empty() {
            tracing::warn!(page = page_number, "no chunks retrieved, using page text");
            return Ok(page_fallback(page_number, query, page_text, Vec::new(), None));
        }

        let context = build_context(&results, &self.config.context.options());
        if context.chunk_ids.is_empty() {
            tracing::warn!(
                page = page_number,
                budget = ?self.config.context.max_tokens,
                "no retrieved chunk fits the context budget, using page text"
            );
            let scores = results.iter().map(|r| r.score).collect();
            return Ok(page_fallback(
                page_number,
                query,
                page_text,
                scores,
                context.truncation,
            ));
        }
        tracing::debug!(
            page = page_number,
            chunks = results.len(),
            top_score = results[0].score,
            tokens = context.token_count,
            "built page context"
        );

        Ok(PageContext {
            page_number,
            query,
            text: context.text,
            chunks_retrieved: context.chunk_ids.len(),
            top_scores: results.iter().map(|r| r.score).collect(),
            context_tokens: context.token_count,
            truncation: context.truncation,
        })
    }

    pub async fn close(self) {
        let (store, _) = self.retriever.into_parts();
        store.close().await;
    }
}

fn page_fallback(
    page_number: u32,
    query: String,
    page_text: &str,
    top_scores: Vec<f64>,
    truncation: Option<TruncationNotice>,
) -> PageContext {
    PageContext {
        page_number,
        query,
        text: page_text.to_string(),
        chunks_retrieved: 0,
        top_scores,
        context_tokens: crate::tokens::count_tokens(page_text),
        truncation,
    }
}

/// Retrieval query for a page: a fixed instruction plus the first 500
/// characters of the page.
pub fn build_page_query(page_text: &str) -> String {
    let mut preview: String = page_text.chars().take(QUERY_PREVIEW_CHARS).collect();
    preview = preview.trim().to_string();
    if page_text.chars().count() > QUERY_PREVIEW_CHARS {
        preview.push_str("...");
    }
    format!("{}{}", QUERY_PREFIX, preview)
}

/// Deterministic per-document collection name:
/// `ankiai_<stem, alphanumerics only, ≤20 chars>_<8 hex of sha256(path)>`.
pub fn collection_name_for(path: &str) -> String {
    let stem = Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    let safe: String = stem
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .take(COLLECTION_STEM_CHARS)
        .collect();
    format!("ankiai_{}_{}", safe, path_digest(path))
}
