//! # ankiai
//!
//! Retrieval-augmented context for flashcard generation from long documents.
//!
//! A document is split into overlapping token-bounded chunks, each chunk is
//! embedded, and the vectors are stored in a SQLite-backed collection. At
//! generation time the text of a page becomes a query; the closest chunks
//! are retrieved and assembled into a budgeted context block for the card
//! generator.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌───────────────────┐   ┌─────────────┐
//! │  loader  │──▶│  chunk  │──▶│ EmbeddingGenerator│──▶│ VectorStore │
//! │ PDF/text │   │ Chunker │   │  batch + retry    │   │   SQLite    │
//! └──────────┘   └─────────┘   └───────────────────┘   └──────┬──────┘
//!                                                             │
//!                   ┌─────────────────┐   ┌───────────┐       │
//!   page text ────▶ │    Retriever    │◀──┤  search   │◀──────┘
//!                   └────────┬────────┘   └───────────┘
//!                            ▼
//!                   ┌─────────────────┐
//!                   │  build_context  │──▶ prompt context
//!                   └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Documents, chunks, retrieval results |
//! | [`tokens`] | Whitespace token counting |
//! | [`loader`] | PDF and text loading with page ranges |
//! | [`chunk`] | Overlapping, boundary-aware chunking |
//! | [`embedding`] | Embedding provider abstraction and vector helpers |
//! | [`embed`] | Batched embedding generation with retry |
//! | [`vector_store`] | Persistent collections and L2 similarity search |
//! | [`retriever`] | Query embedding, search, and score filtering |
//! | [`context`] | Context assembly under a token budget |
//! | [`pipeline`] | Ingest and per-page context end to end |
//! | [`commands`] | CLI command implementations |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`error`] | Error type |

pub mod chunk;
pub mod commands;
pub mod config;
pub mod context;
pub mod db;
pub mod embed;
pub mod embedding;
pub mod error;
pub mod loader;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod retriever;
pub mod tokens;
pub mod vector_store;

pub use chunk::chunk_document;
pub use config::{ChunkingConfig, Config};
pub use context::{build_context, ChunkOrdering, ContextOptions, ContextResult, TruncationNotice};
pub use embed::EmbeddingGenerator;
pub use embedding::{EmbeddingProvider, ProviderError};
pub use error::{RagError, Result};
pub use models::{Chunk, Document, DocumentMetadata, RetrievalResult};
pub use pipeline::RagPipeline;
pub use retriever::{RetrieveOptions, Retriever};
pub use vector_store::VectorStore;
