//! Document loading: PDF and plain text into a paged [`Document`].
//!
//! | Extension | Pages |
//! |-----------|-------|
//! | `.pdf` | one per PDF page (`pdf-extract`) |
//! | `.txt`, `.md` | split on form feed (`\x0c`); a file without one is a single page |
//!
//! Page ranges are 1-indexed and inclusive. An end page past the last page
//! is clipped (with a warning); everything else out of range is a
//! [`RagError::Validation`].

use std::path::Path;

use crate::error::{RagError, Result};
use crate::models::{Document, DocumentFormat, DocumentMetadata};

/// Load `path`, keeping pages `start..=end` (defaults: first and last page).
pub fn load_document(path: &Path, start: Option<u32>, end: Option<u32>) -> Result<Document> {
    let format = detect_format(path)?;
    let bytes = std::fs::read(path)?;
    let file_size = bytes.len() as u64;

    let pages = match format {
        DocumentFormat::Pdf => extract_pdf_pages(&bytes)?,
        DocumentFormat::Text => split_text_pages(&String::from_utf8_lossy(&bytes)),
        other => {
            return Err(RagError::Extraction(format!(
                "{:?} documents are not supported",
                other
            )))
        }
    };

    let total = pages.len() as u32;
    let (first, last) = resolve_page_range(total, start, end)?;

    let selected: Vec<String> = pages
        .into_iter()
        .skip((first - 1) as usize)
        .take((last - first + 1) as usize)
        .collect();

    let metadata = DocumentMetadata::new(total, file_size, format);
    let doc = Document::from_pages(path.display().to_string(), first, selected, metadata);

    tracing::info!(
        path = %path.display(),
        pages = doc.page_count(),
        first,
        last,
        chars = doc.content.len(),
        "loaded document"
    );
    Ok(doc)
}

fn detect_format(path: &Path) -> Result<DocumentFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "pdf" => Ok(DocumentFormat::Pdf),
        "txt" | "md" => Ok(DocumentFormat::Text),
        "docx" => Ok(DocumentFormat::Docx),
        "epub" => Ok(DocumentFormat::Epub),
        _ => Err(RagError::validation(format!(
            "unsupported file type: {}",
            path.display()
        ))),
    }
}

fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<String>> {
    pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| RagError::Extraction(format!("PDF extraction failed: {}", e)))
}

fn split_text_pages(text: &str) -> Vec<String> {
    let mut pages: Vec<String> = text.split('\x0c').map(str::to_string).collect();
    // A trailing form feed ends the last page rather than starting a new one.
    if pages.len() > 1 && pages.last().is_some_and(|p| p.trim().is_empty()) {
        pages.pop();
    }
    pages
}

/// Validate and clip a requested page range against `total` pages.
pub fn resolve_page_range(total: u32, start: Option<u32>, end: Option<u32>) -> Result<(u32, u32)> {
    if total == 0 {
        return Err(RagError::Extraction("document has no pages".to_string()));
    }

    let start = start.unwrap_or(1);
    let end = end.unwrap_or(total);

    if start < 1 {
        return Err(RagError::validation("start page must be >= 1"));
    }
    if start > end {
        return Err(RagError::validation(format!(
            "start page {} is after end page {}",
            start, end
        )));
    }
    if start > total {
        return Err(RagError::validation(format!(
            "start page {} is beyond the last page ({})",
            start, total
        )));
    }

    let end = if end > total {
        tracing::warn!(requested = end, total, "end page beyond document, clipping");
        total
    } else {
        end
    };

    Ok((start, end))
}
