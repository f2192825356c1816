//! Persistent vector store on SQLite.
//!
//! A store handle is bound to one named **collection**. A collection has a
//! fixed embedding dimension (set when it is created) and, once the first
//! vectors are written through the pipeline, a fixed embedding model.
//!
//! # Storage
//!
//! | Table | Contents |
//! |-------|----------|
//! | `collections` | name, dims, bound model |
//! | `chunks` | one row per chunk: text, serialized chunk metadata, little-endian `f32` BLOB |
//!
//! # Search
//!
//! Search is exact brute force over the collection (optionally filtered to
//! one source document first):
//!
//! ```text
//! distance = Σ (qᵢ − vᵢ)²
//! score    = 1 / (1 + distance)
//! ```
//!
//! Results are ordered by ascending distance; ties keep insertion order.
//! This is comfortably fast for the few thousand chunks a book produces.

use chrono::Utc;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use crate::config::StoreConfig;
use crate::db;
use crate::embedding::{blob_to_vec, l2_score, squared_l2, vec_to_blob};
use crate::error::{RagError, Result};
use crate::migrate;
use crate::models::Chunk;

/// A search result: the stored chunk (embedding included) and its distance
/// to the query.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk: Chunk,
    /// Squared L2 distance.
    pub distance: f64,
    /// `1 / (1 + distance)`, in `(0, 1]`.
    pub score: f64,
}

/// Per-source chunk count, as reported by [`VectorStore::list_sources`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub source_document: String,
    pub chunks: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    pub name: String,
    pub dims: usize,
    pub model: Option<String>,
    pub chunks: usize,
}

pub struct VectorStore {
    pool: SqlitePool,
    collection: String,
    dims: usize,
    model: Option<String>,
}

impl VectorStore {
    /// Connect, migrate, and create or load `config.collection`.
    pub async fn open(config: &StoreConfig) -> Result<Self> {
        if config.dims == 0 {
            return Err(RagError::config("store dimension must be > 0"));
        }

        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;

        let existing = sqlx::query("SELECT dims, model FROM collections WHERE name = ?")
            .bind(&config.collection)
            .fetch_optional(&pool)
            .await?;

        let model = match existing {
            Some(row) => {
                let dims: i64 = row.get("dims");
                if dims as usize != config.dims {
                    pool.close().await;
                    return Err(RagError::config(format!(
                        "collection '{}' has dimension {}, configured dimension is {}",
                        config.collection, dims, config.dims
                    )));
                }
                row.get::<Option<String>, _>("model")
            }
            None => {
                sqlx::query("INSERT INTO collections (name, dims, model, created_at) VALUES (?, ?, NULL, ?)")
                    .bind(&config.collection)
                    .bind(config.dims as i64)
                    .bind(Utc::now().timestamp())
                    .execute(&pool)
                    .await?;
                tracing::info!(collection = %config.collection, dims = config.dims, "created collection");
                None
            }
        };

        Ok(Self {
            pool,
            collection: config.collection.clone(),
            dims: config.dims,
            model,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Embedding model bound to this collection, if any.
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// Record `model` as the collection's embedding model.
    ///
    /// The first call binds it; later calls must name the same model.
    pub async fn bind_model(&mut self, model: &str) -> Result<()> {
        match &self.model {
            Some(bound) if bound == model => Ok(()),
            Some(bound) => Err(RagError::config(format!(
                "collection '{}' was built with model '{}', not '{}'",
                self.collection, bound, model
            ))),
            None => {
                sqlx::query("UPDATE collections SET model = ? WHERE name = ?")
                    .bind(model)
                    .bind(&self.collection)
                    .execute(&self.pool)
                    .await?;
                self.model = Some(model.to_string());
                Ok(())
            }
        }
    }

    /// Insert or update chunks by id. Returns the number written.
    ///
    /// All chunks are validated before anything is written, and the write is
    /// a single transaction.
    pub async fn add_chunks(&self, chunks: &[Chunk]) -> Result<usize> {
        self.validate_chunks(chunks)?;
        if chunks.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for chunk in chunks {
            self.upsert_chunk(&mut tx, chunk).await?;
        }
        tx.commit().await?;

        tracing::debug!(collection = %self.collection, chunks = chunks.len(), "stored chunks");
        Ok(chunks.len())
    }

    /// Replace every chunk of `source_document` with `chunks`, atomically.
    pub async fn replace_source(&self, source_document: &str, chunks: &[Chunk]) -> Result<usize> {
        self.validate_chunks(chunks)?;
        if let Some(stray) = chunks.iter().find(|c| c.source_document != source_document) {
            return Err(RagError::validation(format!(
                "chunk {} belongs to '{}', not '{}'",
                stray.chunk_id, stray.source_document, source_document
            )));
        }

        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query("DELETE FROM chunks WHERE collection = ? AND source_document = ?")
            .bind(&self.collection)
            .bind(source_document)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        for chunk in chunks {
            self.upsert_chunk(&mut tx, chunk).await?;
        }
        tx.commit().await?;

        tracing::info!(
            collection = %self.collection,
            source = source_document,
            removed,
            added = chunks.len(),
            "replaced source chunks"
        );
        Ok(chunks.len())
    }

    /// The `top_k` nearest chunks to `query`, optionally restricted to one
    /// source document.
    pub async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        source_filter: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        if top_k == 0 {
            return Err(RagError::validation("top_k must be > 0"));
        }
        if query.len() != self.dims {
            return Err(RagError::config(format!(
                "query has dimension {}, collection '{}' has {}",
                query.len(),
                self.collection,
                self.dims
            )));
        }

        let rows = match source_filter {
            Some(source) => {
                sqlx::query(
                    "SELECT metadata_json, embedding FROM chunks
                     WHERE collection = ? AND source_document = ?
                     ORDER BY id",
                )
                .bind(&self.collection)
                .bind(source)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT metadata_json, embedding FROM chunks
                     WHERE collection = ?
                     ORDER BY id",
                )
                .bind(&self.collection)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let chunk = row_to_chunk(row)?;
            let distance = match chunk.embedding.as_deref() {
                Some(vector) if vector.len() == query.len() => squared_l2(query, vector),
                _ => continue,
            };
            hits.push(SearchHit {
                chunk,
                distance,
                score: l2_score(distance),
            });
        }

        // Stable sort: equal distances keep insertion (id) order.
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(top_k);
        Ok(hits)
    }

    pub async fn get_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>> {
        let row = sqlx::query(
            "SELECT metadata_json, embedding FROM chunks WHERE collection = ? AND chunk_id = ?",
        )
        .bind(&self.collection)
        .bind(chunk_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_chunk).transpose()
    }

    /// Delete chunks by id. Returns the number removed.
    pub async fn delete_chunks(&self, chunk_ids: &[String]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0u64;
        for id in chunk_ids {
            removed += sqlx::query("DELETE FROM chunks WHERE collection = ? AND chunk_id = ?")
                .bind(&self.collection)
                .bind(id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(removed as usize)
    }

    pub async fn delete_by_source(&self, source_document: &str) -> Result<usize> {
        let removed = sqlx::query("DELETE FROM chunks WHERE collection = ? AND source_document = ?")
            .bind(&self.collection)
            .bind(source_document)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(removed as usize)
    }

    pub async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE collection = ?")
            .bind(&self.collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    pub async fn list_sources(&self) -> Result<Vec<SourceInfo>> {
        let rows = sqlx::query(
            "SELECT source_document, COUNT(*) AS chunks FROM chunks
             WHERE collection = ?
             GROUP BY source_document
             ORDER BY source_document",
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| SourceInfo {
                source_document: row.get("source_document"),
                chunks: row.get::<i64, _>("chunks") as usize,
            })
            .collect())
    }

    /// Remove every chunk in the collection. The collection itself, with its
    /// dimension and model binding, remains.
    pub async fn clear(&self) -> Result<usize> {
        let removed = sqlx::query("DELETE FROM chunks WHERE collection = ?")
            .bind(&self.collection)
            .execute(&self.pool)
            .await?
            .rows_affected();
        tracing::info!(collection = %self.collection, removed, "cleared collection");
        Ok(removed as usize)
    }

    /// Every collection in the database, with chunk counts.
    pub async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        let rows = sqlx::query(
            "SELECT c.name, c.dims, c.model, COUNT(ch.id) AS chunks
             FROM collections c
             LEFT JOIN chunks ch ON ch.collection = c.name
             GROUP BY c.name
             ORDER BY c.name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| CollectionInfo {
                name: row.get("name"),
                dims: row.get::<i64, _>("dims") as usize,
                model: row.get("model"),
                chunks: row.get::<i64, _>("chunks") as usize,
            })
            .collect())
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    fn validate_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        for chunk in chunks {
            let vector = match chunk.embedding.as_deref() {
                Some(v) if !v.is_empty() => v,
                _ => {
                    return Err(RagError::validation(format!(
                        "chunk {} has no embedding",
                        chunk.chunk_id
                    )))
                }
            };
            if vector.len() != self.dims {
                return Err(RagError::config(format!(
                    "chunk {} has dimension {}, collection '{}' has {}",
                    chunk.chunk_id,
                    vector.len(),
                    self.collection,
                    self.dims
                )));
            }
        }
        Ok(())
    }

    async fn upsert_chunk(&self, tx: &mut Transaction<'_, Sqlite>, chunk: &Chunk) -> Result<()> {
        let vector = chunk.embedding.as_deref().unwrap_or_default();
        let metadata_json = serde_json::to_string(chunk)?;

        sqlx::query(
            r#"
            INSERT INTO chunks (collection, chunk_id, source_document, position, text, hash,
                                metadata_json, embedding, dims, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(collection, chunk_id) DO UPDATE SET
                source_document = excluded.source_document,
                position = excluded.position,
                text = excluded.text,
                hash = excluded.hash,
                metadata_json = excluded.metadata_json,
                embedding = excluded.embedding,
                dims = excluded.dims,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&self.collection)
        .bind(&chunk.chunk_id)
        .bind(&chunk.source_document)
        .bind(chunk.position as i64)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .bind(&metadata_json)
        .bind(vec_to_blob(vector))
        .bind(vector.len() as i64)
        .bind(Utc::now().timestamp())
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Result<Chunk> {
    let metadata_json: String = row.get("metadata_json");
    let blob: Vec<u8> = row.get("embedding");
    let mut chunk: Chunk = serde_json::from_str(&metadata_json)?;
    chunk.embedding = Some(blob_to_vec(&blob));
    Ok(chunk)
}
