//! Context assembly for the flashcard prompt.
//!
//! Turns retrieval results into one text block:
//!
//! 1. **Order**: [`ChunkOrdering::Position`] restores reading order
//!    (`source_document`, then `position`); [`ChunkOrdering::Relevance`]
//!    keeps the retriever's best-first order.
//! 2. **Format**: optionally prefix each chunk with a
//!    `[Source: <file>, Pages: <pages>]` line.
//! 3. **Join** with the separator (default `"\n\n---\n\n"`).
//! 4. **Budget**: while the result is over `max_tokens`, drop the
//!    lowest-scoring chunk (relevance ordering) or the latest chunk
//!    (position ordering). Dropping is reported in
//!    [`ContextResult::truncation`], never silent.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::models::{Document, RetrievalResult};
use crate::tokens::count_tokens;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkOrdering {
    /// Best score first, as returned by the retriever.
    Relevance,
    /// Document order.
    #[default]
    Position,
}

impl FromStr for ChunkOrdering {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "relevance" => Ok(ChunkOrdering::Relevance),
            "position" => Ok(ChunkOrdering::Position),
            other => Err(format!(
                "unknown ordering '{}', expected 'relevance' or 'position'",
                other
            )),
        }
    }
}

impl fmt::Display for ChunkOrdering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkOrdering::Relevance => write!(f, "relevance"),
            ChunkOrdering::Position => write!(f, "position"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContextOptions {
    pub include_metadata: bool,
    pub ordering: ChunkOrdering,
    pub separator: String,
    /// Token budget for the assembled text; `None` is unbounded.
    pub max_tokens: Option<usize>,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            include_metadata: false,
            ordering: ChunkOrdering::Position,
            separator: "\n\n---\n\n".to_string(),
            max_tokens: Some(6000),
        }
    }
}

/// Chunks dropped to fit the token budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruncationNotice {
    pub dropped_chunk_ids: Vec<String>,
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub budget: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContextResult {
    pub text: String,
    /// Ids of the chunks in `text`, in output order.
    pub chunk_ids: Vec<String>,
    pub token_count: usize,
    pub truncation: Option<TruncationNotice>,
}

impl ContextResult {
    pub fn is_truncated(&self) -> bool {
        self.truncation.is_some()
    }
}

pub fn build_context(results: &[RetrievalResult], options: &ContextOptions) -> ContextResult {
    let mut selected: Vec<&RetrievalResult> = results.iter().collect();
    if options.ordering == ChunkOrdering::Position {
        selected.sort_by(|a, b| {
            a.chunk
                .source_document
                .cmp(&b.chunk.source_document)
                .then(a.chunk.position.cmp(&b.chunk.position))
        });
    }

    let mut text = assemble(&selected, options);
    let mut token_count = count_tokens(&text);
    let mut truncation = None;

    if let Some(budget) = options.max_tokens {
        let tokens_before = token_count;
        let mut dropped = Vec::new();

        while token_count > budget && !selected.is_empty() {
            let victim = match options.ordering {
                ChunkOrdering::Position => selected.len() - 1,
                ChunkOrdering::Relevance => lowest_score_index(&selected),
            };
            dropped.push(selected.remove(victim).chunk.chunk_id.clone());
            text = assemble(&selected, options);
            token_count = count_tokens(&text);
        }

        if !dropped.is_empty() {
            tracing::warn!(
                budget,
                tokens_before,
                tokens_after = token_count,
                dropped = dropped.len(),
                "context exceeded token budget, dropped chunks"
            );
            truncation = Some(TruncationNotice {
                dropped_chunk_ids: dropped,
                tokens_before,
                tokens_after: token_count,
                budget,
            });
        }
    }

    ContextResult {
        text,
        chunk_ids: selected.iter().map(|r| r.chunk.chunk_id.clone()).collect(),
        token_count,
        truncation,
    }
}

/// Token count of the context `results` would produce without a budget.
pub fn estimate_tokens(results: &[RetrievalResult], options: &ContextOptions) -> usize {
    let unbounded = ContextOptions {
        max_tokens: None,
        ..options.clone()
    };
    build_context(results, &unbounded).token_count
}

/// Context without retrieval: the full text of `page`.
///
/// For a document without page structure the whole content is returned for
/// any page inside its range.
pub fn build_baseline_context(doc: &Document, page: u32) -> Result<String> {
    let (first, last) = doc.page_range;
    if page < first || page > last {
        return Err(RagError::validation(format!(
            "page {} is outside the document range {}-{}",
            page, first, last
        )));
    }
    Ok(doc
        .page_text(page)
        .unwrap_or(doc.content.as_str())
        .to_string())
}

fn assemble(selected: &[&RetrievalResult], options: &ContextOptions) -> String {
    selected
        .iter()
        .map(|r| format_chunk(r, options.include_metadata))
        .collect::<Vec<_>>()
        .join(&options.separator)
}

fn format_chunk(result: &RetrievalResult, include_metadata: bool) -> String {
    let chunk = &result.chunk;
    if include_metadata {
        format!(
            "[Source: {}, Pages: {}]\n{}",
            chunk.source_name(),
            chunk.page_label(),
            chunk.text
        )
    } else {
        chunk.text.clone()
    }
}

/// Index of the lowest score; on ties, the latest one.
fn lowest_score_index(selected: &[&RetrievalResult]) -> usize {
    let mut index = 0;
    for (i, r) in selected.iter().enumerate() {
        if r.score <= selected[index].score {
            index = i;
        }
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, DocumentFormat, DocumentMetadata};

    fn result(source: &str, position: usize, text: &str, score: f64) -> RetrievalResult {
        RetrievalResult {
            chunk: Chunk {
                chunk_id: format!("{}_{}", source, position),
                text: text.to_string(),
                source_document: format!("/books/{}", source),
                page_numbers: vec![position as u32 + 1],
                position,
                token_count: count_tokens(text),
                char_count: text.len(),
                overlap_len: 0,
                overlap_with_previous: None,
                overlap_with_next: None,
                hash: String::new(),
                embedding: None,
            },
            score,
        }
    }

    fn unbounded(ordering: ChunkOrdering) -> ContextOptions {
        ContextOptions {
            ordering,
            max_tokens: None,
            ..ContextOptions::default()
        }
    }

    #[test]
    fn test_position_ordering() {
        let results = vec![
            result("b.pdf", 0, "b zero", 0.9),
            result("a.pdf", 2, "a two", 0.8),
            result("a.pdf", 0, "a zero", 0.7),
        ];
        let ctx = build_context(&results, &unbounded(ChunkOrdering::Position));
        assert_eq!(ctx.text, "a zero\n\n---\n\na two\n\n---\n\nb zero");
        assert_eq!(ctx.chunk_ids, vec!["a.pdf_0", "a.pdf_2", "b.pdf_0"]);
        assert!(!ctx.is_truncated());
    }

    #[test]
    fn test_relevance_ordering_keeps_input() {
        let results = vec![
            result("a.pdf", 5, "five", 0.9),
            result("a.pdf", 1, "one", 0.5),
        ];
        let ctx = build_context(&results, &unbounded(ChunkOrdering::Relevance));
        assert_eq!(ctx.text, "five\n\n---\n\none");
    }

    #[test]
    fn test_metadata_prefix() {
        let results = vec![result("ddia.pdf", 2, "Partitioning splits data.", 0.9)];
        let options = ContextOptions {
            include_metadata: true,
            ..unbounded(ChunkOrdering::Position)
        };
        let ctx = build_context(&results, &options);
        assert_eq!(ctx.text, "[Source: ddia.pdf, Pages: 3]\nPartitioning splits data.");
    }

    #[test]
    fn test_empty_results() {
        let ctx = build_context(&[], &ContextOptions::default());
        assert_eq!(ctx.text, "");
        assert_eq!(ctx.token_count, 0);
        assert!(ctx.truncation.is_none());
    }

    #[test]
    fn test_budget_drops_lowest_relevance() {
        let results = vec![
            result("a.pdf", 0, "one two three four", 0.9),
            result("a.pdf", 1, "five six seven eight", 0.2),
            result("a.pdf", 2, "nine ten eleven twelve", 0.6),
        ];
        // Three chunks: 12 words + 2 separators ("---") = 14 tokens.
        let options = ContextOptions {
            ordering: ChunkOrdering::Relevance,
            max_tokens: Some(10),
            ..ContextOptions::default()
        };
        let ctx = build_context(&results, &options);
        assert_eq!(ctx.chunk_ids, vec!["a.pdf_0", "a.pdf_2"]);
        assert_eq!(ctx.token_count, 9);

        let notice = ctx.truncation.unwrap();
        assert_eq!(notice.dropped_chunk_ids, vec!["a.pdf_1"]);
        assert_eq!(notice.tokens_before, 14);
        assert_eq!(notice.tokens_after, 9);
        assert_eq!(notice.budget, 10);
    }

    #[test]
    fn test_budget_drops_latest_position() {
        let results = vec![
            result("a.pdf", 2, "nine ten eleven twelve", 0.99),
            result("a.pdf", 0, "one two three four", 0.1),
            result("a.pdf", 1, "five six seven eight", 0.2),
        ];
        let options = ContextOptions {
            ordering: ChunkOrdering::Position,
            max_tokens: Some(5),
            ..ContextOptions::default()
        };
        let ctx = build_context(&results, &options);
        assert_eq!(ctx.text, "one two three four");
        assert_eq!(
            ctx.truncation.unwrap().dropped_chunk_ids,
            vec!["a.pdf_2", "a.pdf_1"]
        );
    }

    #[test]
    fn test_estimate_tokens_ignores_budget() {
        let results = vec![
            result("a.pdf", 0, "one two three four", 0.9),
            result("a.pdf", 1, "five six seven eight", 0.2),
        ];
        let options = ContextOptions {
            max_tokens: Some(1),
            ..ContextOptions::default()
        };
        assert_eq!(estimate_tokens(&results, &options), 9);
    }

    #[test]
    fn test_ordering_from_str() {
        assert_eq!("Position".parse::<ChunkOrdering>(), Ok(ChunkOrdering::Position));
        assert_eq!("relevance".parse::<ChunkOrdering>(), Ok(ChunkOrdering::Relevance));
        assert!("random".parse::<ChunkOrdering>().is_err());
    }

    #[test]
    fn test_baseline_context() {
        let doc = Document::from_pages(
            "book.pdf",
            3,
            vec!["page three".to_string(), "page four".to_string()],
            DocumentMetadata::new(10, 0, DocumentFormat::Pdf),
        );
        assert_eq!(build_baseline_context(&doc, 4).unwrap(), "page four");
        assert!(matches!(
            build_baseline_context(&doc, 5),
            Err(RagError::Validation(_))
        ));
    }
}
