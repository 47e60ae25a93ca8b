//! Droidtail Common Library
//!
//! This library contains the live log pipeline: producer capture, adaptive
//! draining, keyword filtering and highlighting, the bounded display buffer
//! and search, along with shared types, configuration and error handling.

pub mod buffer;
pub mod config;
pub mod error;
pub mod filter;
pub mod highlight;
pub mod logging;
pub mod performance;
pub mod queue;
pub mod scheduler;
pub mod search;
pub mod session;
pub mod stream;
pub mod types;

pub use buffer::{BufferStats, DisplayBuffer, LineStore, TrimOutcome, VecDequeStore};
pub use config::{
    derive_trim_threshold, shared_params, AdaptiveParams, AppConfig, ConfigFormat, ConfigManager,
    LogCommand, LoggingConfig, SharedParams,
};
pub use error::{DroidtailError, ErrorCategory, Result};
pub use filter::{FilterEngine, KeywordPattern};
pub use highlight::{highlight_line, highlight_spans, HighlightMode};
pub use logging::{init_logging_to_stderr, RateLimitedWarn};
pub use performance::{
    PerformanceCounter, PerformanceMonitor, PerformanceSnapshot, PerformanceStats,
};
pub use queue::LineQueue;
pub use scheduler::{AdaptiveScheduler, TickPlan, TickReport, SAMPLING_STRIDE};
pub use search::{SearchEngine, SearchResults};
pub use session::FilteringSession;
pub use stream::{StreamReader, StreamStatus};
pub use types::*;
