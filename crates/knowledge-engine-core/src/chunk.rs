//! Boundary-aware text segmenter.
//!
//! Splits raw text into [`TextChunk`]s no longer than `max_chunk_size`
//! characters, preferring paragraph, then sentence, then word boundaries.
//!
//! # Algorithm
//!
//! 1. With `preserve_paragraphs`, split on blank lines. A paragraph that
//!    fits becomes one chunk; an oversized paragraph is split by sentence.
//! 2. Otherwise, with `preserve_sentences`, split on `.`, `!` or `?`
//!    followed by whitespace and greedily pack sentences into chunks.
//! 3. Otherwise pack whitespace-delimited words the same way.
//! 4. A sentence that does not fit is packed word by word; a single word
//!    that does not fit is hard-split at character boundaries.
//! 5. With `overlap_size > 0`, every chunk after the first is prefixed with
//!    the last `overlap_size` words of the previous chunk's content (its
//!    own prefix included). Offsets are not affected by the prefix.
//!
//! Offsets are byte offsets into the input; sizes are counted in `char`s.
//!
//! # Example
//!
//! ```rust
//! use knowledge_engine_core::chunk::{segment, SegmenterConfig};
//!
//! let config = SegmenterConfig::default();
//! let chunks = segment("Hello world.\n\nSecond paragraph.", &config);
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[0].index, 0);
//! assert!(chunks[1].metadata.is_complete_paragraph);
//! ```

use serde::{Deserialize, Serialize};

use crate::models::{ChunkMetadata, TextChunk};

/// Segmenter tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Maximum characters per chunk (before any overlap prefix).
    pub max_chunk_size: usize,
    /// Number of trailing words of the previous chunk prepended to each chunk.
    pub overlap_size: usize,
    pub preserve_sentences: bool,
    pub preserve_paragraphs: bool,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 1000,
            overlap_size: 0,
            preserve_sentences: true,
            preserve_paragraphs: true,
        }
    }
}

/// Byte range `[start, end)` into the source text.
type Span = (usize, usize);

/// Split `text` into chunks according to `config`.
///
/// Empty or whitespace-only input yields no chunks.
pub fn segment(text: &str, config: &SegmenterConfig) -> Vec<TextChunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let max = config.max_chunk_size.max(1);
    let whole: Span = (text.len() - text.trim_start().len(), text.trim_end().len());

    let mut spans = Vec::new();
    if config.preserve_paragraphs {
        for para in paragraph_spans(text) {
            if span_chars(text, para) <= max {
                spans.push(para);
            } else {
                pack_sentences(text, para, max, &mut spans);
            }
        }
    } else if config.preserve_sentences {
        pack_sentences(text, whole, max, &mut spans);
    } else {
        pack_words(text, whole, max, &mut spans);
    }

    build_chunks(text, &spans, config.overlap_size)
}

fn build_chunks(text: &str, spans: &[Span], overlap: usize) -> Vec<TextChunk> {
    let mut chunks: Vec<TextChunk> = Vec::with_capacity(spans.len());

    for (index, &(start, end)) in spans.iter().enumerate() {
        let body = &text[start..end];
        let content = match chunks.last() {
            Some(prev) if overlap > 0 => {
                let prefix = last_words(&prev.content, overlap);
                if prefix.is_empty() {
                    body.to_string()
                } else {
                    format!("{prefix} {body}")
                }
            }
            _ => body.to_string(),
        };

        let metadata = ChunkMetadata {
            is_complete_sentence: content.trim_end().ends_with(is_terminator),
            is_complete_paragraph: starts_paragraph(text, start) && ends_paragraph(text, end),
            word_count: content.split_whitespace().count(),
            character_count: content.chars().count(),
        };

        chunks.push(TextChunk {
            content,
            index,
            start_offset: start,
            end_offset: end,
            metadata,
        });
    }

    chunks
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

fn span_chars(text: &str, (start, end): Span) -> usize {
    text[start..end].chars().count()
}

fn last_words(s: &str, n: usize) -> String {
    let words: Vec<&str> = s.split_whitespace().collect();
    words[words.len().saturating_sub(n)..].join(" ")
}

/// Paragraphs separated by lines that are empty or whitespace-only.
/// Each span is trimmed of surrounding whitespace.
fn paragraph_spans(text: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    let mut end = 0;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();

        if line.trim().is_empty() {
            if let Some(s) = start.take() {
                spans.push((s, end));
            }
            continue;
        }

        if start.is_none() {
            start = Some(line_start + (line.len() - line.trim_start().len()));
        }
        end = line_start + line.trim_end().len();
    }

    if let Some(s) = start {
        spans.push((s, end));
    }
    spans
}

/// Sentences inside `span`: a run ending at a terminator that is followed by
/// whitespace or the end of the span. Trailing text without a terminator is
/// the final sentence.
fn sentence_spans(text: &str, (from, to): Span) -> Vec<Span> {
    let slice = &text[from..to];
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    let mut chars = slice.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if start.is_none() {
            if c.is_whitespace() {
                continue;
            }
            start = Some(i);
        }
        if is_terminator(c) && chars.peek().map_or(true, |&(_, next)| next.is_whitespace()) {
            if let Some(s) = start.take() {
                spans.push((from + s, from + i + c.len_utf8()));
            }
        }
    }

    if let Some(s) = start {
        spans.push((from + s, from + slice.trim_end().len()));
    }
    spans
}

fn word_spans(text: &str, (from, to): Span) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;

    for (i, c) in text[from..to].char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                spans.push((from + s, from + i));
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }

    if let Some(s) = start {
        spans.push((from + s, to));
    }
    spans
}

fn pack_sentences(text: &str, span: Span, max: usize, out: &mut Vec<Span>) {
    let units = sentence_spans(text, span);
    pack(text, &units, max, out, pack_words);
}

fn pack_words(text: &str, span: Span, max: usize, out: &mut Vec<Span>) {
    let units = word_spans(text, span);
    pack(text, &units, max, out, hard_split);
}

/// Greedily merge consecutive units while the merged slice fits in `max`.
/// Units that are too large on their own go through `split_oversized`.
fn pack(
    text: &str,
    units: &[Span],
    max: usize,
    out: &mut Vec<Span>,
    split_oversized: fn(&str, Span, usize, &mut Vec<Span>),
) {
    let mut current: Option<Span> = None;

    for &unit in units {
        if span_chars(text, unit) > max {
            if let Some(c) = current.take() {
                out.push(c);
            }
            split_oversized(text, unit, max, out);
            continue;
        }

        current = match current {
            Some((s, _)) if span_chars(text, (s, unit.1)) <= max => Some((s, unit.1)),
            Some(c) => {
                out.push(c);
                Some(unit)
            }
            None => Some(unit),
        };
    }

    if let Some(c) = current {
        out.push(c);
    }
}

/// Cut a span every `max` characters, on char boundaries.
fn hard_split(text: &str, (from, to): Span, max: usize, out: &mut Vec<Span>) {
    let mut start = from;
    let mut count = 0;

    for (i, _) in text[from..to].char_indices() {
        if count == max {
            out.push((start, from + i));
            start = from + i;
            count = 0;
        }
        count += 1;
    }

    if start < to {
        out.push((start, to));
    }
}

fn starts_paragraph(text: &str, start: usize) -> bool {
    let before = &text[..start];
    if before.trim().is_empty() {
        return true;
    }
    before[before.trim_end().len()..].matches('\n').count() >= 2
}

fn ends_paragraph(text: &str, end: usize) -> bool {
    let after = &text[end..];
    if after.trim().is_empty() {
        return true;
    }
    after[..after.len() - after.trim_start().len()]
        .matches('\n')
        .count()
        >= 2
}
