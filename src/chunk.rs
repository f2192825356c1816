//! Paragraph-first overlapping chunker.
//!
//! Splits a [`Document`] into [`Chunk`]s of roughly `target_tokens` tokens
//! that share `overlap_tokens` tokens with their predecessor, so a retrieval
//! hit never starts at a hard cut.
//!
//! Boundaries are chosen from the coarsest unit that fits:
//!
//! | Unit | Boundary | Joined with | Used when |
//! |------|----------|-------------|-----------|
//! | paragraph | blank line | `"\n\n"` | paragraph ≤ content cap |
//! | sentence | `.` `!` `?` + whitespace + uppercase | `" "` | paragraph > content cap |
//! | window | every `target_tokens` tokens | `" "` | sentence still > content cap |
//!
//! The content cap is `max_chunk_tokens - overlap_tokens`, so every chunk
//! after the first carries the full overlap and still stays within
//! `max_chunk_tokens`. Units are accumulated while the running count stays
//! within `target_tokens`. Chunk ids are deterministic
//! (`<stem>_<sha256(path)[..8]>_chunk_<NNN>`), so re-chunking the same file
//! produces the same ids and the store upserts instead of duplicating.

use std::ops::Range;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::config::ChunkingConfig;
use crate::error::Result;
use crate::models::{Chunk, Document};
use crate::tokens::{count_tokens, tail, tail_offset, token_spans};

const PARAGRAPH_JOINER: &str = "\n\n";
const SENTENCE_JOINER: &str = " ";
const OVERLAP_SEPARATOR: &str = "\n\n";

/// Split `doc` into overlapping chunks.
///
/// The boundaries are computed up front; the chunks themselves are built
/// lazily as the returned [`Chunks`] is iterated.
pub fn chunk_document<'a>(doc: &'a Document, config: &ChunkingConfig) -> Result<Chunks<'a>> {
    config.validate()?;

    let cap = config.content_cap();
    let units = split_units(&doc.content, cap, config.target_tokens.min(cap));
    let raws = accumulate(&doc.content, &units, config.target_tokens);

    tracing::debug!(
        source = %doc.file_path,
        units = units.len(),
        chunks = raws.len(),
        "chunked document"
    );

    Ok(Chunks {
        doc,
        raws,
        next: 0,
        id_prefix: chunk_id_prefix(&doc.file_path),
        overlap_tokens: config.overlap_tokens,
    })
}

/// Lazy, restartable sequence of chunks over one document.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    doc: &'a Document,
    raws: Vec<RawSegment>,
    next: usize,
    id_prefix: String,
    overlap_tokens: usize,
}

impl<'a> Chunks<'a> {
    /// Rewind to the first chunk.
    pub fn restart(&mut self) {
        self.next = 0;
    }

    /// Total number of chunks, regardless of iteration state.
    pub fn total(&self) -> usize {
        self.raws.len()
    }

    fn chunk_id(&self, index: usize) -> String {
        format!("{}_chunk_{:03}", self.id_prefix, index)
    }

    fn build(&self, index: usize) -> Chunk {
        let raw = &self.raws[index];

        let overlap = if index == 0 { 0 } else { self.overlap_tokens };

        let (text, overlap_len, span_start) = if overlap > 0 {
            let prev = &self.raws[index - 1];
            let shared = tail(&prev.text, overlap);
            let prev_content = &self.doc.content[prev.span.clone()];
            let start = prev.span.start + tail_offset(prev_content, overlap);

            let mut text = String::with_capacity(shared.len() + 2 + raw.text.len());
            text.push_str(shared);
            text.push_str(OVERLAP_SEPARATOR);
            let overlap_len = text.len();
            text.push_str(&raw.text);
            (text, overlap_len, start)
        } else {
            (raw.text.clone(), 0, raw.span.start)
        };

        let page_numbers = self.doc.pages_for_span(span_start..raw.span.end);

        Chunk {
            chunk_id: self.chunk_id(index),
            token_count: count_tokens(&text),
            char_count: text.chars().count(),
            hash: sha256_hex(&text),
            text,
            source_document: self.doc.file_path.clone(),
            page_numbers,
            position: index,
            overlap_len,
            overlap_with_previous: (overlap_len > 0).then(|| self.chunk_id(index - 1)),
            overlap_with_next: (self.overlap_tokens > 0 && index + 1 < self.raws.len())
                .then(|| self.chunk_id(index + 1)),
            embedding: None,
        }
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.next >= self.raws.len() {
            return None;
        }
        let chunk = self.build(self.next);
        self.next += 1;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.raws.len() - self.next;
        (remaining, Some(remaining))
    }
}

impl<'a> ExactSizeIterator for Chunks<'a> {}

/// Chunk text without overlap, plus the byte span of `content` it covers.
///
/// The tokens of `text` are exactly the tokens of `content[span]`; only the
/// whitespace between units differs.
#[derive(Debug, Clone)]
struct RawSegment {
    text: String,
    span: Range<usize>,
    tokens: usize,
}

/// A paragraph, sentence, or window: the atoms accumulated into chunks.
#[derive(Debug, Clone)]
struct Unit {
    span: Range<usize>,
    tokens: usize,
    paragraph: usize,
}

fn split_units(content: &str, cap: usize, window: usize) -> Vec<Unit> {
    let mut units = Vec::new();

    for (paragraph, para_span) in paragraph_spans(content).into_iter().enumerate() {
        let text = &content[para_span.clone()];
        let spans: Vec<Range<usize>> = token_spans(text)
            .into_iter()
            .map(|s| s.start + para_span.start..s.end + para_span.start)
            .collect();

        if spans.len() <= cap {
            units.push(Unit {
                span: para_span,
                tokens: spans.len(),
                paragraph,
            });
            continue;
        }

        for sentence in sentence_ranges(content, &spans) {
            let words = &spans[sentence];
            if words.len() <= cap {
                units.push(Unit {
                    span: words[0].start..words[words.len() - 1].end,
                    tokens: words.len(),
                    paragraph,
                });
                continue;
            }
            for window in words.chunks(window) {
                units.push(Unit {
                    span: window[0].start..window[window.len() - 1].end,
                    tokens: window.len(),
                    paragraph,
                });
            }
        }
    }

    units
}

/// Byte spans of the blank-line separated paragraphs in `text`, trimmed.
fn paragraph_spans(text: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut current: Option<Range<usize>> = None;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if let Some(span) = current.take() {
                spans.push(span);
            }
        } else {
            let start = offset + (line.len() - line.trim_start().len());
            let end = start + trimmed.len();
            match current.as_mut() {
                Some(span) => span.end = end,
                None => current = Some(start..end),
            }
        }
        offset += line.len();
    }
    if let Some(span) = current {
        spans.push(span);
    }

    spans
}

/// Group a paragraph's word spans into sentences, as index ranges into
/// `words`. A sentence ends at a word ending in `.`, `!` or `?` that is
/// followed by a word starting with an uppercase letter.
fn sentence_ranges(content: &str, words: &[Range<usize>]) -> Vec<Range<usize>> {
    let mut sentences = Vec::new();
    let mut start = 0;

    for i in 0..words.len().saturating_sub(1) {
        let word = &content[words[i].clone()];
        let next = &content[words[i + 1].clone()];
        let ends_sentence = word.ends_with(['.', '!', '?']);
        let starts_sentence = next.chars().next().is_some_and(char::is_uppercase);
        if ends_sentence && starts_sentence {
            sentences.push(start..i + 1);
            start = i + 1;
        }
    }
    if start < words.len() {
        sentences.push(start..words.len());
    }

    sentences
}

fn accumulate(content: &str, units: &[Unit], target: usize) -> Vec<RawSegment> {
    let mut raws = Vec::new();
    let mut current: Option<(RawSegment, usize)> = None;

    for unit in units {
        let unit_text = &content[unit.span.clone()];

        if let Some((raw, paragraph)) = current.as_mut() {
            if raw.tokens + unit.tokens <= target {
                let joiner = if *paragraph == unit.paragraph {
                    SENTENCE_JOINER
                } else {
                    PARAGRAPH_JOINER
                };
                raw.text.push_str(joiner);
                raw.text.push_str(unit_text);
                raw.span.end = unit.span.end;
                raw.tokens += unit.tokens;
                *paragraph = unit.paragraph;
                continue;
            }
        }

        if let Some((raw, _)) = current.take() {
            raws.push(raw);
        }
        current = Some((
            RawSegment {
                text: unit_text.to_string(),
                span: unit.span.clone(),
                tokens: unit.tokens,
            },
            unit.paragraph,
        ));
    }
    if let Some((raw, _)) = current {
        raws.push(raw);
    }

    raws
}

/// `<stem>_<8 hex>` shared by every chunk id of one source file.
fn chunk_id_prefix(file_path: &str) -> String {
    format!("{}_{}", sanitized_stem(file_path), path_digest(file_path))
}

/// File stem with everything but ASCII alphanumerics, `-` and `_` replaced
/// by `_`.
pub(crate) fn sanitized_stem(file_path: &str) -> String {
    let stem = Path::new(file_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("document");
    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "document".to_string()
    } else {
        cleaned
    }
}

/// First 8 hex digits of the SHA-256 of `file_path`.
pub(crate) fn path_digest(file_path: &str) -> String {
    sha256_hex(file_path)[..8].to_string()
}

fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
