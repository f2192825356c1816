//! Approximate token accounting.
//!
//! A token is a maximal run of non-whitespace characters. This keeps token
//! boundaries addressable as byte offsets into the original text, so the
//! chunker can slice overlaps and force-splits without re-encoding, and the
//! context builder budgets with the same measure the chunker used.

use std::ops::Range;

/// Count the tokens in `text`.
pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Byte ranges of every token in `text`, in order.
pub fn token_spans(text: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;

    for (i, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some(s) = start.take() {
                spans.push(s..i);
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        spans.push(s..text.len());
    }

    spans
}

/// The suffix of `text` holding its last `n` tokens.
///
/// Returns all of `text` (trimmed) when it has `n` tokens or fewer, and an
/// empty string when `n == 0`.
pub fn tail(text: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    let spans = token_spans(text);
    if spans.len() <= n {
        return text.trim();
    }
    let first = &spans[spans.len() - n];
    let last = &spans[spans.len() - 1];
    &text[first.start..last.end]
}

/// Byte offset (into `text`) where the last `n` tokens begin.
pub fn tail_offset(text: &str, n: usize) -> usize {
    if n == 0 {
        return text.len();
    }
    let spans = token_spans(text);
    if spans.len() <= n {
        return spans.first().map(|s| s.start).unwrap_or(text.len());
    }
    spans[spans.len() - n].start
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_tokens() {
        assert_eq!(count_tokens(""), 0);
        assert_eq!(count_tokens("   \n\t "), 0);
        assert_eq!(count_tokens("one two  three\n\nfour"), 4);
    }

    #[test]
    fn test_token_spans_unicode() {
        let text = "héllo  wörld";
        let spans = token_spans(text);
        assert_eq!(spans.len(), 2);
        assert_eq!(&text[spans[0].clone()], "héllo");
        assert_eq!(&text[spans[1].clone()], "wörld");
    }

    #[test]
    fn test_tail() {
        let text = "a b c d e";
        assert_eq!(tail(text, 2), "d e");
        assert_eq!(tail(text, 5), "a b c d e");
        assert_eq!(tail(text, 10), "a b c d e");
        assert_eq!(tail(text, 0), "");
    }

    #[test]
    fn test_tail_offset() {
        let text = "alpha beta gamma";
        assert_eq!(&text[tail_offset(text, 1)..], "gamma");
        assert_eq!(tail_offset(text, 3), 0);
        assert_eq!(tail_offset(text, 7), 0);
        assert_eq!(tail_offset(text, 0), text.len());
    }
}
