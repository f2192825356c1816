//! Core data models used throughout the retrieval pipeline.
//!
//! These types represent the documents, chunks, and retrieval results that
//! flow from the loader through chunking, embedding, storage, and context
//! assembly.

use std::ops::Range;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source format of a parsed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Epub,
    Text,
}

/// Metadata about the source file a [`Document`] was extracted from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub total_pages: u32,
    pub file_size_bytes: u64,
    pub file_format: DocumentFormat,
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub keywords: Vec<String>,
    pub creation_date: Option<NaiveDateTime>,
}

impl DocumentMetadata {
    pub fn new(total_pages: u32, file_size_bytes: u64, file_format: DocumentFormat) -> Self {
        Self {
            total_pages,
            file_size_bytes,
            file_format,
            title: None,
            author: None,
            subject: None,
            keywords: Vec::new(),
            creation_date: None,
        }
    }
}

/// Parsed document text, ready for chunking.
///
/// A document is an immutable value. When built with
/// [`Document::from_pages`] it also remembers where each page starts inside
/// [`content`](Document::content), which lets the chunker tag chunks with the
/// exact pages they were drawn from.
#[derive(Debug, Clone)]
pub struct Document {
    /// Full extracted text.
    pub content: String,
    /// Path of the source file.
    pub file_path: String,
    /// `(start, end)` page numbers, 1-indexed and inclusive.
    pub page_range: (u32, u32),
    pub metadata: DocumentMetadata,
    pub processed_at: DateTime<Utc>,
    /// Byte offset of the start of each page in `content`. Empty when the
    /// page structure is unknown.
    page_starts: Vec<usize>,
}

impl Document {
    /// Document without page structure: every span maps to the whole range.
    pub fn new(
        content: impl Into<String>,
        file_path: impl Into<String>,
        page_range: (u32, u32),
        metadata: DocumentMetadata,
    ) -> Self {
        Self {
            content: content.into(),
            file_path: file_path.into(),
            page_range,
            metadata,
            processed_at: Utc::now(),
            page_starts: Vec::new(),
        }
    }

    /// Build a document from per-page text, starting at page `first_page`.
    ///
    /// Pages are joined with a blank line so that a page break is always
    /// also a paragraph break.
    pub fn from_pages(
        file_path: impl Into<String>,
        first_page: u32,
        pages: Vec<String>,
        metadata: DocumentMetadata,
    ) -> Self {
        let mut content = String::new();
        let mut page_starts = Vec::with_capacity(pages.len());

        for (i, page) in pages.iter().enumerate() {
            if i > 0 {
                content.push_str("\n\n");
            }
            page_starts.push(content.len());
            content.push_str(page);
        }

        let last_page = first_page + (pages.len().max(1) as u32) - 1;

        Self {
            content,
            file_path: file_path.into(),
            page_range: (first_page, last_page),
            metadata,
            processed_at: Utc::now(),
            page_starts,
        }
    }

    /// Number of pages in the range.
    pub fn page_count(&self) -> u32 {
        self.page_range.1 - self.page_range.0 + 1
    }

    pub fn has_page_structure(&self) -> bool {
        !self.page_starts.is_empty()
    }

    /// Text of a single page, if the page structure is known and `page`
    /// falls inside the range.
    pub fn page_text(&self, page: u32) -> Option<&str> {
        if !self.has_page_structure() || page < self.page_range.0 || page > self.page_range.1 {
            return None;
        }
        let idx = (page - self.page_range.0) as usize;
        let start = *self.page_starts.get(idx)?;
        let end = match self.page_starts.get(idx + 1) {
            Some(next) => next - 2,
            None => self.content.len(),
        };
        Some(&self.content[start..end])
    }

    /// Pages touched by the byte range `span` of [`content`](Document::content).
    pub fn pages_for_span(&self, span: Range<usize>) -> Vec<u32> {
        let (first, last) = self.page_range;
        if !self.has_page_structure() {
            return (first..=last).collect();
        }

        let page_at = |offset: usize| -> u32 {
            let idx = self
                .page_starts
                .partition_point(|&s| s <= offset)
                .saturating_sub(1);
            first + idx as u32
        };

        let start = page_at(span.start);
        let end = if span.end > span.start {
            page_at(span.end - 1)
        } else {
            start
        };
        (start..=end).collect()
    }
}

/// A contiguous span of document text, the unit of embedding and retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable identifier, e.g. `chapter_3_1a2b3c4d_chunk_007`.
    pub chunk_id: String,
    pub text: String,
    /// Path of the source document.
    pub source_document: String,
    /// Pages this chunk was drawn from, ascending (1-indexed).
    pub page_numbers: Vec<u32>,
    /// 0-based sequence index in the document.
    pub position: usize,
    pub token_count: usize,
    pub char_count: usize,
    /// Byte length of the leading overlap copied from the previous chunk,
    /// separator included. Zero for the first chunk.
    pub overlap_len: usize,
    pub overlap_with_previous: Option<String>,
    pub overlap_with_next: Option<String>,
    /// SHA-256 of `text`.
    pub hash: String,
    #[serde(default, skip_serializing)]
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    pub fn has_embedding(&self) -> bool {
        self.embedding.as_ref().is_some_and(|e| !e.is_empty())
    }

    pub fn is_first(&self) -> bool {
        self.position == 0
    }

    /// The leading text shared with the previous chunk (without separator).
    pub fn overlap_text(&self) -> &str {
        self.text[..self.overlap_len].trim_end()
    }

    /// The text this chunk contributes beyond its overlap.
    pub fn own_text(&self) -> &str {
        &self.text[self.overlap_len..]
    }

    /// File name of the source document, for citations.
    pub fn source_name(&self) -> &str {
        Path::new(&self.source_document)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.source_document)
    }

    /// Compact page label: `3`, `3-5`, or `1, 4`.
    pub fn page_label(&self) -> String {
        let mut pages = self.page_numbers.clone();
        pages.sort_unstable();
        pages.dedup();

        match pages.as_slice() {
            [] => "unknown".to_string(),
            [only] => only.to_string(),
            [first, .., last] if (*last - *first) as usize + 1 == pages.len() => {
                format!("{}-{}", first, last)
            }
            _ => pages
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

/// A retrieved chunk and its similarity score in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub chunk: Chunk,
    pub score: f64,
}
