//! Span splitting for accepted lines

use crate::filter::KeywordPattern;
use crate::{DisplayLine, RawLine, Span};
use std::ops::Range;

/// How much of a line to mark
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HighlightMode {
    /// Highlighting disabled or no keyword: one plain span
    Off,
    /// Every non-overlapping match
    AllMatches,
    /// Only the leftmost match; used under high load to cut per-line work
    FirstMatch,
}

/// Split `text` into alternating plain/highlighted spans
///
/// The spans always cover the whole line with no gaps or overlaps, so
/// concatenating them reproduces `text` exactly.
pub fn highlight_spans(
    text: &str,
    pattern: Option<&KeywordPattern>,
    mode: HighlightMode,
) -> Vec<Span> {
    let pattern = match (pattern, mode) {
        (Some(pattern), HighlightMode::AllMatches | HighlightMode::FirstMatch) => pattern,
        _ => return vec![Span::plain(text)],
    };

    let ranges: Vec<Range<usize>> = match mode {
        HighlightMode::FirstMatch => pattern.find_first(text).into_iter().collect(),
        _ => pattern.find_ranges(text),
    };

    if ranges.is_empty() {
        return vec![Span::plain(text)];
    }

    let mut spans = Vec::with_capacity(ranges.len() * 2 + 1);
    let mut last_end = 0;

    for range in ranges {
        if range.start > last_end {
            spans.push(Span::plain(&text[last_end..range.start]));
        }
        spans.push(Span::highlighted(&text[range.clone()]));
        last_end = range.end;
    }

    if last_end < text.len() {
        spans.push(Span::plain(&text[last_end..]));
    }

    spans
}

/// Build the display form of an accepted raw line
pub fn highlight_line(
    line: &RawLine,
    pattern: Option<&KeywordPattern>,
    mode: HighlightMode,
) -> DisplayLine {
    DisplayLine {
        spans: highlight_spans(&line.text, pattern, mode),
        source_ordinal: line.ordinal,
    }
}
