//! Keyword filtering engine
//!
//! This module decides whether a raw line belongs in the display, using
//! either substring containment or a regular expression, with optional
//! case folding. Compiled patterns are cached per (keyword, mode, case)
//! so a running session compiles its pattern exactly once.

use crate::logging::RateLimitedWarn;
use crate::{DroidtailError, FilterConfig, Result};
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::ops::Range;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// A compiled keyword, shared by filtering, highlighting and search
#[derive(Debug, Clone)]
pub enum KeywordPattern {
    /// Case-sensitive substring
    Literal(String),
    /// User regex, or an escaped literal when case folding is needed
    Regex(Regex),
}

impl KeywordPattern {
    /// Compile a keyword in the given mode
    ///
    /// Case-insensitive literals are compiled as escaped regexes so match
    /// offsets stay valid in the original text even when case folding
    /// changes byte lengths.
    pub fn compile(keyword: &str, use_regex: bool, case_sensitive: bool) -> Result<Self> {
        if !use_regex && case_sensitive {
            return Ok(Self::Literal(keyword.to_string()));
        }

        let source = if use_regex {
            keyword.to_string()
        } else {
            regex::escape(keyword)
        };

        let regex = RegexBuilder::new(&source)
            .case_insensitive(!case_sensitive)
            .build()
            .map_err(|e| DroidtailError::pattern(keyword, e.to_string()))?;

        Ok(Self::Regex(regex))
    }

    pub fn from_config(config: &FilterConfig) -> Result<Self> {
        Self::compile(&config.keyword, config.use_regex, config.case_sensitive)
    }

    pub fn is_match(&self, text: &str) -> bool {
        match self {
            Self::Literal(needle) => text.contains(needle.as_str()),
            Self::Regex(regex) => regex.is_match(text),
        }
    }

    /// All non-overlapping, non-empty matches, left to right
    pub fn find_ranges(&self, text: &str) -> Vec<Range<usize>> {
        match self {
            Self::Literal(needle) => {
                if needle.is_empty() {
                    return Vec::new();
                }
                text.match_indices(needle.as_str())
                    .map(|(start, m)| start..start + m.len())
                    .collect()
            }
            Self::Regex(regex) => regex
                .find_iter(text)
                .filter(|m| !m.is_empty())
                .map(|m| m.range())
                .collect(),
        }
    }

    /// The leftmost non-empty match
    pub fn find_first(&self, text: &str) -> Option<Range<usize>> {
        match self {
            Self::Literal(needle) => {
                if needle.is_empty() {
                    return None;
                }
                text.find(needle.as_str()).map(|start| start..start + needle.len())
            }
            Self::Regex(regex) => regex
                .find_iter(text)
                .find(|m| !m.is_empty())
                .map(|m| m.range()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PatternKey {
    keyword: String,
    use_regex: bool,
    case_sensitive: bool,
}

impl From<&FilterConfig> for PatternKey {
    fn from(config: &FilterConfig) -> Self {
        Self {
            keyword: config.keyword.clone(),
            use_regex: config.use_regex,
            case_sensitive: config.case_sensitive,
        }
    }
}

/// Line filter with a compiled-pattern cache
#[derive(Debug, Clone)]
pub struct FilterEngine {
    pattern_cache: Arc<RwLock<HashMap<PatternKey, Arc<KeywordPattern>>>>,
    failure_gate: Arc<RateLimitedWarn>,
}

impl FilterEngine {
    /// Create a new filter engine
    pub fn new() -> Self {
        Self {
            pattern_cache: Arc::new(RwLock::new(HashMap::new())),
            failure_gate: Arc::new(RateLimitedWarn::default()),
        }
    }

    /// Check that a config can be used for a session
    ///
    /// Compiles the pattern into the cache; a regex that does not compile
    /// is reported here so it never surfaces mid-stream.
    pub fn validate(&self, config: &FilterConfig) -> Result<()> {
        self.pattern_for(config).map(|_| ())
    }

    /// Get or compile the pattern for a config; `None` when the keyword is empty
    pub fn pattern_for(&self, config: &FilterConfig) -> Result<Option<Arc<KeywordPattern>>> {
        if config.keyword.is_empty() {
            return Ok(None);
        }

        let key = PatternKey::from(config);

        // First try to get from cache
        {
            let cache = self
                .pattern_cache
                .read()
                .map_err(|_| DroidtailError::poisoned("pattern cache"))?;
            if let Some(pattern) = cache.get(&key) {
                return Ok(Some(pattern.clone()));
            }
        }

        // Compile new pattern
        let pattern = Arc::new(KeywordPattern::from_config(config)?);

        // Store in cache
        {
            let mut cache = self
                .pattern_cache
                .write()
                .map_err(|_| DroidtailError::poisoned("pattern cache"))?;
            cache.insert(key, pattern.clone());
        }

        debug!(keyword = %config.keyword, use_regex = config.use_regex, "Compiled filter pattern");
        Ok(Some(pattern))
    }

    /// Decide whether a line passes the filter
    ///
    /// An empty keyword accepts everything. A pattern that fails to compile
    /// rejects the line instead of failing the pipeline.
    pub fn accepts(&self, line: &str, config: &FilterConfig) -> bool {
        match self.pattern_for(config) {
            Ok(pattern) => Self::accepts_compiled(pattern.as_deref(), line),
            Err(e) => {
                if let Some(suppressed) = self.failure_gate.check() {
                    warn!(error = %e, suppressed, "Rejecting line: filter pattern unusable");
                }
                false
            }
        }
    }

    /// Filter decision against an already compiled pattern
    pub fn accepts_compiled(pattern: Option<&KeywordPattern>, line: &str) -> bool {
        pattern.map_or(true, |pattern| pattern.is_match(line))
    }

    /// Clear the pattern cache
    pub fn clear_cache(&self) -> Result<()> {
        let mut cache = self
            .pattern_cache
            .write()
            .map_err(|_| DroidtailError::poisoned("pattern cache"))?;

        cache.clear();
        debug!("Pattern cache cleared");
        Ok(())
    }

    /// Number of compiled patterns held in the cache
    pub fn cache_size(&self) -> Result<usize> {
        let cache = self
            .pattern_cache
            .read()
            .map_err(|_| DroidtailError::poisoned("pattern cache"))?;
        Ok(cache.len())
    }
}

impl Default for FilterEngine {
    fn default() -> Self {
        Self::new()
    }
}
