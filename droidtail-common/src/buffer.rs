//! Bounded display buffer
//!
//! This module holds the lines currently meant to be visible. Appends go to
//! the tail; eviction removes from the head in batches once the buffer has
//! grown past its cap by more than the trim threshold, instead of trimming
//! on every append.

use crate::logging::RateLimitedWarn;
use crate::{AdaptiveParams, DisplayLine, Result};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, info, warn};

/// Backing storage for display lines
///
/// Head removal and tail-preserving rebuild are separate operations so a
/// failing fast path can fall back to the slow one.
pub trait LineStore: Send + Sync + fmt::Debug {
    fn push_back(&mut self, line: DisplayLine);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn iter(&self) -> Box<dyn Iterator<Item = &DisplayLine> + '_>;

    /// Remove `count` lines from the head in one operation
    fn remove_head(&mut self, count: usize) -> Result<()>;

    /// Rebuild the store keeping only the last `keep` lines
    fn retain_tail(&mut self, keep: usize) -> Result<()>;

    fn clear(&mut self);
}

/// In-memory ring of display lines
#[derive(Debug, Default)]
pub struct VecDequeStore {
    lines: VecDeque<DisplayLine>,
}

impl VecDequeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LineStore for VecDequeStore {
    fn push_back(&mut self, line: DisplayLine) {
        self.lines.push_back(line);
    }

    fn len(&self) -> usize {
        self.lines.len()
    }

    fn iter(&self) -> Box<dyn Iterator<Item = &DisplayLine> + '_> {
        Box::new(self.lines.iter())
    }

    fn remove_head(&mut self, count: usize) -> Result<()> {
        let count = count.min(self.lines.len());
        self.lines.drain(..count);
        Ok(())
    }

    fn retain_tail(&mut self, keep: usize) -> Result<()> {
        let skip = self.lines.len().saturating_sub(keep);
        self.lines = self.lines.drain(..).skip(skip).collect();
        Ok(())
    }

    fn clear(&mut self) {
        self.lines.clear();
    }
}

/// Result of a trim check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimOutcome {
    /// Not enough growth since the last trim to look at the length
    NotDue,
    /// Growth threshold passed but the buffer is still within its cap
    WithinCap,
    /// Head lines removed in one operation
    Trimmed { removed: usize },
    /// Head removal failed; the buffer was rebuilt from its tail instead
    Rebuilt { removed: usize },
    /// Both strategies failed; growth counter reset, buffer left as is
    Failed,
}

impl TrimOutcome {
    pub fn removed(&self) -> usize {
        match self {
            Self::Trimmed { removed } | Self::Rebuilt { removed } => *removed,
            _ => 0,
        }
    }
}

/// Statistics about buffer usage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BufferStats {
    pub total_lines: usize,
    pub total_chars: usize,
    pub pending_growth: usize,
    pub generation: u64,
    pub trim_count: u64,
    pub fallback_rebuilds: u64,
    pub trim_failures: u64,
    pub lines_evicted: u64,
}

/// Append-only line store with threshold-batched head eviction
///
/// Between trims the length may exceed `max_display_lines` by at most
/// `trim_threshold_lines`. Every trim or clear bumps `generation`, which
/// invalidates search offsets computed against the previous content.
pub struct DisplayBuffer {
    store: Box<dyn LineStore>,
    max_display_lines: usize,
    trim_threshold_lines: usize,
    pending_growth: usize,
    total_chars: usize,
    generation: u64,
    trim_count: u64,
    fallback_rebuilds: u64,
    trim_failures: u64,
    lines_evicted: u64,
    failure_gate: RateLimitedWarn,
}

impl fmt::Debug for DisplayBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayBuffer")
            .field("len", &self.store.len())
            .field("max_display_lines", &self.max_display_lines)
            .field("trim_threshold_lines", &self.trim_threshold_lines)
            .field("pending_growth", &self.pending_growth)
            .field("generation", &self.generation)
            .finish()
    }
}

impl DisplayBuffer {
    /// Create a buffer with an explicit cap and trim threshold
    pub fn new(max_display_lines: usize, trim_threshold_lines: usize) -> Self {
        Self::with_store(Box::new(VecDequeStore::new()), max_display_lines, trim_threshold_lines)
    }

    /// Create a buffer sized from adaptive parameters
    pub fn from_params(params: &AdaptiveParams) -> Self {
        Self::new(params.max_display_lines, params.trim_threshold_lines)
    }

    /// Create a buffer over a custom store
    pub fn with_store(
        store: Box<dyn LineStore>,
        max_display_lines: usize,
        trim_threshold_lines: usize,
    ) -> Self {
        let total_chars = store.iter().map(DisplayLine::char_count).sum();
        Self {
            store,
            max_display_lines,
            trim_threshold_lines,
            pending_growth: 0,
            total_chars,
            generation: 0,
            trim_count: 0,
            fallback_rebuilds: 0,
            trim_failures: 0,
            lines_evicted: 0,
            failure_gate: RateLimitedWarn::default(),
        }
    }

    /// Apply a new cap and threshold; takes effect at the next trim check
    pub fn set_limits(&mut self, max_display_lines: usize, trim_threshold_lines: usize) {
        self.max_display_lines = max_display_lines;
        self.trim_threshold_lines = trim_threshold_lines;
    }

    /// Add a line to the tail
    pub fn append(&mut self, line: DisplayLine) {
        self.total_chars += line.char_count();
        self.store.push_back(line);
        self.pending_growth += 1;
    }

    /// Trim the head if enough growth has accumulated since the last trim
    pub fn maybe_trim(&mut self) -> TrimOutcome {
        if self.pending_growth <= self.trim_threshold_lines {
            return TrimOutcome::NotDue;
        }
        self.trim_excess()
    }

    /// Trim down to the cap regardless of accumulated growth
    pub fn trim_to_cap(&mut self) -> TrimOutcome {
        self.trim_excess()
    }

    fn trim_excess(&mut self) -> TrimOutcome {
        let current_len = self.store.len();
        if current_len <= self.max_display_lines {
            return TrimOutcome::WithinCap;
        }

        let excess = current_len - self.max_display_lines;
        let evicted_chars: usize = self
            .store
            .iter()
            .take(excess)
            .map(DisplayLine::char_count)
            .sum();

        let outcome = match self.store.remove_head(excess) {
            Ok(()) => {
                self.total_chars = self.total_chars.saturating_sub(evicted_chars);
                TrimOutcome::Trimmed { removed: excess }
            }
            Err(e) => {
                debug!(error = %e, "Head trim failed, rebuilding buffer from tail");
                match self.store.retain_tail(self.max_display_lines) {
                    Ok(()) => {
                        self.fallback_rebuilds += 1;
                        self.total_chars = self.store.iter().map(DisplayLine::char_count).sum();
                        TrimOutcome::Rebuilt {
                            removed: current_len.saturating_sub(self.store.len()),
                        }
                    }
                    Err(rebuild_err) => {
                        self.trim_failures += 1;
                        self.pending_growth = 0;
                        if let Some(suppressed) = self.failure_gate.check() {
                            warn!(
                                error = %rebuild_err,
                                len = current_len,
                                suppressed,
                                "Display buffer trim failed, buffer keeps growing"
                            );
                        }
                        return TrimOutcome::Failed;
                    }
                }
            }
        };

        self.pending_growth = 0;
        self.generation += 1;
        self.trim_count += 1;
        self.lines_evicted += outcome.removed() as u64;
        debug!(
            removed = outcome.removed(),
            remaining = self.store.len(),
            "Display buffer trimmed"
        );
        outcome
    }

    /// Drop all lines
    pub fn clear(&mut self) {
        self.store.clear();
        self.pending_growth = 0;
        self.total_chars = 0;
        self.generation += 1;
        info!("Display buffer cleared");
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn pending_growth(&self) -> usize {
        self.pending_growth
    }

    pub fn max_display_lines(&self) -> usize {
        self.max_display_lines
    }

    pub fn trim_threshold_lines(&self) -> usize {
        self.trim_threshold_lines
    }

    /// Characters currently buffered, across all lines
    pub fn total_chars(&self) -> usize {
        self.total_chars
    }

    /// Content version; changes whenever lines are evicted or cleared
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn lines(&self) -> impl Iterator<Item = &DisplayLine> + '_ {
        self.store.iter()
    }

    /// Copy of the current lines in order
    pub fn snapshot(&self) -> Vec<DisplayLine> {
        self.store.iter().cloned().collect()
    }

    /// The most recent `count` lines
    pub fn recent(&self, count: usize) -> Vec<DisplayLine> {
        let skip = self.store.len().saturating_sub(count);
        self.store.iter().skip(skip).cloned().collect()
    }

    /// Concatenated buffer text, each line terminated by `\n`
    ///
    /// Search offsets index into this string.
    pub fn text(&self) -> String {
        let mut text = String::with_capacity(self.total_chars + self.store.len());
        for line in self.store.iter() {
            for span in &line.spans {
                text.push_str(&span.text);
            }
            text.push('\n');
        }
        text
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            total_lines: self.store.len(),
            total_chars: self.total_chars,
            pending_growth: self.pending_growth,
            generation: self.generation,
            trim_count: self.trim_count,
            fallback_rebuilds: self.fallback_rebuilds,
            trim_failures: self.trim_failures,
            lines_evicted: self.lines_evicted,
        }
    }
}

impl Default for DisplayBuffer {
    fn default() -> Self {
        Self::from_params(&AdaptiveParams::default())
    }
}
