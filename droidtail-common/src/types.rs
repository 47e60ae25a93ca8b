//! Common types for the droidtail pipeline

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// One line read from the log producer's stdout
#[derive(Debug, Clone, PartialEq)]
pub struct RawLine {
    pub text: String,
    pub received_at: SystemTime,
    /// Position of the line in the producer's output, starting at 0
    pub ordinal: u64,
}

impl RawLine {
    pub fn new<S: Into<String>>(text: S, ordinal: u64) -> Self {
        Self {
            text: text.into(),
            received_at: SystemTime::now(),
            ordinal,
        }
    }
}

/// Keyword filter for a filtering session
///
/// Read-only for the lifetime of a running session; changing it means
/// stopping and restarting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub keyword: String,
    pub use_regex: bool,
    pub case_sensitive: bool,
    pub highlight_enabled: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            keyword: String::new(),
            use_regex: false,
            case_sensitive: false,
            highlight_enabled: true,
        }
    }
}

impl FilterConfig {
    pub fn literal<S: Into<String>>(keyword: S) -> Self {
        Self {
            keyword: keyword.into(),
            ..Default::default()
        }
    }

    pub fn regex<S: Into<String>>(pattern: S) -> Self {
        Self {
            keyword: pattern.into(),
            use_regex: true,
            ..Default::default()
        }
    }

    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn with_highlight(mut self, enabled: bool) -> Self {
        self.highlight_enabled = enabled;
        self
    }
}

/// A contiguous run of text within a display line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Span {
    pub text: String,
    pub highlighted: bool,
}

impl Span {
    pub fn plain<S: Into<String>>(text: S) -> Self {
        Self {
            text: text.into(),
            highlighted: false,
        }
    }

    pub fn highlighted<S: Into<String>>(text: S) -> Self {
        Self {
            text: text.into(),
            highlighted: true,
        }
    }
}

/// An accepted line, split into spans for rendering
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayLine {
    pub spans: Vec<Span>,
    pub source_ordinal: u64,
}

impl DisplayLine {
    /// Reassemble the original line text
    pub fn text(&self) -> String {
        self.spans.iter().map(|s| s.text.as_str()).collect()
    }

    /// Length of the line text in bytes
    pub fn text_len(&self) -> usize {
        self.spans.iter().map(|s| s.text.len()).sum()
    }

    /// Number of characters in the line text
    pub fn char_count(&self) -> usize {
        self.spans.iter().map(|s| s.text.chars().count()).sum()
    }

    pub fn has_highlight(&self) -> bool {
        self.spans.iter().any(|s| s.highlighted)
    }
}

/// A search hit inside the buffer's concatenated text
///
/// Offsets are byte offsets into `DisplayBuffer::text()`, end exclusive.
/// They are only meaningful for the buffer generation they were computed
/// against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    pub start_offset: usize,
    pub end_offset: usize,
    /// Zero-based buffer line the match starts on
    pub line: usize,
}

/// Load tier selected from queue depth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoadTier {
    Low,
    Medium,
    High,
}

/// Lifecycle of a filtering session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
}

/// Why a session left the running state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    Requested,
    ProducerExited,
    /// A tick failed and the session could not continue
    PipelineError,
}

/// Session lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Started { session_id: String },
    Stopped { session_id: String, reason: StopReason },
    Cleared,
    Trimmed { removed: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_line_text_concatenates_spans() {
        let line = DisplayLine {
            spans: vec![
                Span::plain("E/Net: "),
                Span::highlighted("timeout"),
                Span::plain(" after 3s"),
            ],
            source_ordinal: 7,
        };
        assert_eq!(line.text(), "E/Net: timeout after 3s");
        assert_eq!(line.text_len(), 23);
        assert!(line.has_highlight());
    }

    #[test]
    fn test_filter_config_serialization_defaults() {
        let config: FilterConfig = serde_json::from_str(r#"{"keyword":"ERR"}"#).unwrap();
        assert_eq!(config.keyword, "ERR");
        assert!(!config.use_regex);
        assert!(config.highlight_enabled);
    }

    #[test]
    fn test_char_count_counts_unicode_scalars() {
        let line = DisplayLine {
            spans: vec![Span::plain("héllo")],
            source_ordinal: 0,
        };
        assert_eq!(line.char_count(), 5);
        assert_eq!(line.text_len(), 6);
    }
}
