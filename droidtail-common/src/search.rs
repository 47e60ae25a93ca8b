//! Search over the rendered buffer
//!
//! Independent of the session's filter: a search takes its own keyword and
//! mode, scans the buffer text as it is right now and returns an ordered,
//! cyclable result list tagged with the buffer generation it was computed
//! against.

use crate::filter::KeywordPattern;
use crate::{DisplayBuffer, Result, SearchResult};
use tracing::debug;

/// Ordered search hits plus a navigation cursor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResults {
    results: Vec<SearchResult>,
    cursor: Option<usize>,
    generation: u64,
}

impl SearchResults {
    fn new(results: Vec<SearchResult>, generation: u64) -> Self {
        let cursor = if results.is_empty() { None } else { Some(0) };
        Self {
            results,
            cursor,
            generation,
        }
    }

    pub fn empty(generation: u64) -> Self {
        Self::new(Vec::new(), generation)
    }

    pub fn results(&self) -> &[SearchResult] {
        &self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Buffer generation the offsets refer to
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Offsets no longer match a buffer at `generation`
    pub fn is_stale_for(&self, generation: u64) -> bool {
        self.generation != generation
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// Result under the cursor; the first one right after a search
    pub fn current(&self) -> Option<SearchResult> {
        self.cursor.map(|i| self.results[i])
    }

    /// Advance the cursor, wrapping from the last result to the first
    pub fn find_next(&mut self) -> Option<SearchResult> {
        let len = self.results.len();
        if len == 0 {
            return None;
        }
        let next = match self.cursor {
            Some(i) => (i + 1) % len,
            None => 0,
        };
        self.cursor = Some(next);
        Some(self.results[next])
    }

    /// Move the cursor back, wrapping from the first result to the last
    pub fn find_previous(&mut self) -> Option<SearchResult> {
        let len = self.results.len();
        if len == 0 {
            return None;
        }
        let previous = match self.cursor {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        self.cursor = Some(previous);
        Some(self.results[previous])
    }
}

/// Stateless keyword search
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchEngine;

impl SearchEngine {
    pub fn new() -> Self {
        Self
    }

    /// Search the buffer's current text
    ///
    /// Offsets are byte offsets into `DisplayBuffer::text()`. An empty
    /// buffer or an empty keyword yields no results; a regex that does not
    /// compile is a `Pattern` error.
    pub fn search(
        &self,
        buffer: &DisplayBuffer,
        keyword: &str,
        case_sensitive: bool,
        use_regex: bool,
    ) -> Result<SearchResults> {
        let generation = buffer.generation();
        if buffer.is_empty() || keyword.is_empty() {
            // Still reject a bad regex so the caller hears about it
            if use_regex && !keyword.is_empty() {
                KeywordPattern::compile(keyword, use_regex, case_sensitive)?;
            }
            return Ok(SearchResults::empty(generation));
        }

        let pattern = KeywordPattern::compile(keyword, use_regex, case_sensitive)?;
        let results = self.search_text(&buffer.text(), &pattern);
        debug!(keyword, matches = results.len(), generation, "Buffer search complete");
        Ok(SearchResults::new(results, generation))
    }

    /// All matches of `pattern` in newline-joined text, in ascending order
    ///
    /// Each line is matched on its own, so anchors bind to line boundaries
    /// the same way they do when filtering.
    pub fn search_text(&self, text: &str, pattern: &KeywordPattern) -> Vec<SearchResult> {
        let mut results = Vec::new();
        let mut line_start = 0;

        for (line, content) in text.split('\n').enumerate() {
            results.extend(pattern.find_ranges(content).into_iter().map(|range| SearchResult {
                start_offset: line_start + range.start,
                end_offset: line_start + range.end,
                line,
            }));
            line_start += content.len() + 1;
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DisplayLine, DroidtailError, Span};

    fn buffer_with(lines: &[&str]) -> DisplayBuffer {
        let mut buffer = DisplayBuffer::new(100, 5);
        for (i, text) in lines.iter().enumerate() {
            buffer.append(DisplayLine {
                spans: vec![Span::plain(*text)],
                source_ordinal: i as u64,
            });
        }
        buffer
    }

    #[test]
    fn test_search_offsets_and_lines() {
        let buffer = buffer_with(&["E/Net: timeout", "I/App: ok", "W/Net: TIMEOUT again"]);
        let results = SearchEngine::new().search(&buffer, "timeout", false, false).unwrap();

        let text = buffer.text();
        let found: Vec<(&str, usize)> = results
            .results()
            .iter()
            .map(|r| (&text[r.start_offset..r.end_offset], r.line))
            .collect();
        assert_eq!(found, vec![("timeout", 0), ("TIMEOUT", 2)]);
        assert_eq!(results.current(), Some(results.results()[0]));
    }

    #[test]
    fn test_anchored_regex_matches_every_line() {
        let buffer = buffer_with(&["E/a timeout", "E/b timeout", "I/c timeout later"]);
        let engine = SearchEngine::new();

        let starts = engine.search(&buffer, "^E/", true, true).unwrap();
        let lines: Vec<usize> = starts.results().iter().map(|r| r.line).collect();
        assert_eq!(lines, vec![0, 1]);

        let ends = engine.search(&buffer, "timeout$", true, true).unwrap();
        let text = buffer.text();
        let found: Vec<(&str, usize)> = ends
            .results()
            .iter()
            .map(|r| (&text[r.start_offset..r.end_offset], r.line))
            .collect();
        assert_eq!(found, vec![("timeout", 0), ("timeout", 1)]);

        // No match runs across a line break
        assert!(engine.search(&buffer, r"timeout\sE", true, true).unwrap().is_empty());
    }

    #[test]
    fn test_search_is_deterministic() {
        let buffer = buffer_with(&["a1 a2", "b", "a3"]);
        let engine = SearchEngine::new();
        let first = engine.search(&buffer, r"a\d", true, true).unwrap();
        let second = engine.search(&buffer, r"a\d", true, true).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
        assert!(first.results().windows(2).all(|w| w[0].start_offset < w[1].start_offset));
    }

    #[test]
    fn test_find_next_is_cyclic() {
        let buffer = buffer_with(&["x", "x", "x", "x"]);
        let mut results = SearchEngine::new().search(&buffer, "x", true, false).unwrap();
        let first = results.current().unwrap();

        for _ in 0..results.len() - 1 {
            assert_ne!(results.find_next(), Some(first));
        }
        assert_eq!(results.find_next(), Some(first));
    }

    #[test]
    fn test_find_previous_wraps_to_last() {
        let buffer = buffer_with(&["x", "y", "x"]);
        let mut results = SearchEngine::new().search(&buffer, "x", true, false).unwrap();
        let last = *results.results().last().unwrap();

        assert_eq!(results.find_previous(), Some(last));
        assert_eq!(results.cursor(), Some(1));
        assert_eq!(results.find_next().map(|r| r.line), Some(0));
    }

    #[test]
    fn test_empty_buffer_and_empty_keyword() {
        let engine = SearchEngine::new();
        let mut empty = engine.search(&DisplayBuffer::new(10, 1), "x", false, false).unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.find_next(), None);
        assert_eq!(empty.find_previous(), None);

        let buffer = buffer_with(&["line"]);
        assert!(engine.search(&buffer, "", false, false).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_regex_is_pattern_error() {
        let engine = SearchEngine::new();
        let buffer = buffer_with(&["line"]);
        assert!(matches!(
            engine.search(&buffer, "[oops", false, true),
            Err(DroidtailError::Pattern { .. })
        ));
        assert!(matches!(
            engine.search(&DisplayBuffer::new(10, 1), "[oops", false, true),
            Err(DroidtailError::Pattern { .. })
        ));
    }

    #[test]
    fn test_results_go_stale_after_clear() {
        let mut buffer = buffer_with(&["x"]);
        let results = SearchEngine::new().search(&buffer, "x", false, false).unwrap();
        assert!(!results.is_stale_for(buffer.generation()));

        buffer.clear();
        assert!(results.is_stale_for(buffer.generation()));
    }
}
