//! Query-time retrieval: embed the query, search the store, filter by score.

use crate::embed::EmbeddingGenerator;
use crate::error::{RagError, Result};
use crate::models::RetrievalResult;
use crate::vector_store::VectorStore;

#[derive(Debug, Clone, PartialEq)]
pub struct RetrieveOptions {
    pub top_k: usize,
    /// Results scoring below this are dropped. Must be in `[0, 1]`.
    pub min_score: f64,
    /// Restrict the search to one source document.
    pub source_filter: Option<String>,
}

impl Default for RetrieveOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_score: 0.0,
            source_filter: None,
        }
    }
}

impl RetrieveOptions {
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(RagError::validation("top_k must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.min_score) {
            return Err(RagError::validation(format!(
                "min_score must be in [0, 1], got {}",
                self.min_score
            )));
        }
        Ok(())
    }
}

/// Couples a [`VectorStore`] with the [`EmbeddingGenerator`] that filled it.
pub struct Retriever {
    store: VectorStore,
    generator: EmbeddingGenerator,
}

impl Retriever {
    /// Checks that the generator produces vectors the store can hold and,
    /// when the store already has a bound model, that it is the same model.
    pub fn new(store: VectorStore, generator: EmbeddingGenerator) -> Result<Self> {
        if generator.dims() != store.dims() {
            return Err(RagError::config(format!(
                "embedding model '{}' produces {} dimensions, collection '{}' has {}",
                generator.model_name(),
                generator.dims(),
                store.collection(),
                store.dims()
            )));
        }
        if let Some(bound) = store.model() {
            if bound != generator.model_name() {
                return Err(RagError::config(format!(
                    "collection '{}' was built with model '{}', query model is '{}'",
                    store.collection(),
                    bound,
                    generator.model_name()
                )));
            }
        }
        Ok(Self { store, generator })
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut VectorStore {
        &mut self.store
    }

    pub fn generator(&self) -> &EmbeddingGenerator {
        &self.generator
    }

    pub fn into_parts(self) -> (VectorStore, EmbeddingGenerator) {
        (self.store, self.generator)
    }

    /// The chunks most similar to `query`, best first.
    ///
    /// At most `top_k` results, every one with `score >= min_score`.
    pub async fn retrieve(
        &self,
        query: &str,
        options: &RetrieveOptions,
    ) -> Result<Vec<RetrievalResult>> {
        if query.trim().is_empty() {
            return Err(RagError::validation("query must not be empty"));
        }
        options.validate()?;

        if self.store.count().await? == 0 {
            tracing::warn!(collection = self.store.collection(), "retrieval from empty collection");
            return Ok(Vec::new());
        }

        let vector = self.generator.embed_query(query).await?;
        let hits = self
            .store
            .search(&vector, options.top_k, options.source_filter.as_deref())
            .await?;

        let found = hits.len();
        let results: Vec<RetrievalResult> = hits
            .into_iter()
            .filter(|hit| hit.score >= options.min_score)
            .map(|hit| RetrievalResult {
                chunk: hit.chunk,
                score: hit.score,
            })
            .collect();

        tracing::debug!(
            top_k = options.top_k,
            found,
            kept = results.len(),
            min_score = options.min_score,
            "retrieved chunks"
        );
        Ok(results)
    }
}
