//! Adaptive drain scheduling
//!
//! Every tick reads the queue depth, picks a load tier, and from it a
//! batch size, the delay before the next tick, and whether to sample.
//! Light load drains small batches at a relaxed pace; medium load drains
//! larger batches more often; sustained overload drains the largest batch
//! as fast as allowed and keeps only one line in three, so latency stays
//! bounded instead of the queue growing without limit.

use crate::buffer::TrimOutcome;
use crate::filter::{FilterEngine, KeywordPattern};
use crate::highlight::{highlight_line, HighlightMode};
use crate::performance::PerformanceCounter;
use crate::{
    AdaptiveParams, DisplayBuffer, DisplayLine, DroidtailError, FilterConfig, LineQueue, LoadTier,
    RawLine, Result, SharedParams,
};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::trace;

/// Under high load, keep the first line of every group of this many
///
/// Fixed regardless of how far the queue is above the high threshold.
pub const SAMPLING_STRIDE: usize = 3;

const MEDIUM_BATCH_FACTOR: f64 = 1.5;
const MEDIUM_INTERVAL_FACTOR: f64 = 0.7;

/// What a single tick will do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TickPlan {
    pub tier: LoadTier,
    pub batch_size: usize,
    pub interval_ms: u64,
    pub sampling: bool,
}

impl TickPlan {
    /// Pick the plan for a queue depth; a pure function of its inputs
    ///
    /// `depth == high_load_threshold` is still medium load, and
    /// `depth == medium_load_threshold` is still low load.
    pub fn for_depth(depth: usize, params: &AdaptiveParams) -> Self {
        if depth > params.high_load_threshold {
            Self {
                tier: LoadTier::High,
                batch_size: params.max_batch_size,
                interval_ms: params.min_interval_ms,
                sampling: true,
            }
        } else if depth > params.medium_load_threshold {
            Self {
                tier: LoadTier::Medium,
                batch_size: (params.base_batch_size as f64 * MEDIUM_BATCH_FACTOR).round() as usize,
                interval_ms: (params.base_interval_ms as f64 * MEDIUM_INTERVAL_FACTOR).round()
                    as u64,
                sampling: false,
            }
        } else {
            Self {
                tier: LoadTier::Low,
                batch_size: params.base_batch_size,
                interval_ms: params.base_interval_ms,
                sampling: false,
            }
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Keep positions 0, 3, 6, … of a drained batch, preserving order
pub fn sample(lines: Vec<RawLine>) -> Vec<RawLine> {
    lines
        .into_iter()
        .enumerate()
        .filter(|(i, _)| i % SAMPLING_STRIDE == 0)
        .map(|(_, line)| line)
        .collect()
}

/// What a tick actually did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub plan: TickPlan,
    pub queue_depth: usize,
    /// Lines taken off the queue, before sampling and filtering
    pub drained: usize,
    /// Lines surviving sampling
    pub kept: usize,
    /// Lines that passed the filter and reached the buffer
    pub accepted: usize,
    pub trim: TrimOutcome,
}

/// Drains the line queue into the display buffer
///
/// All buffer and stats mutation of a running session happens here, on
/// the tick, never on the reader task.
pub struct AdaptiveScheduler {
    queue: LineQueue,
    params: SharedParams,
    filter: FilterConfig,
    pattern: Option<Arc<KeywordPattern>>,
    buffer: Arc<RwLock<DisplayBuffer>>,
    counter: Arc<PerformanceCounter>,
    line_tx: Option<broadcast::Sender<DisplayLine>>,
}

impl AdaptiveScheduler {
    /// Create a scheduler, compiling the filter pattern up front
    pub fn new(
        queue: LineQueue,
        params: SharedParams,
        filter: FilterConfig,
        engine: &FilterEngine,
        buffer: Arc<RwLock<DisplayBuffer>>,
        counter: Arc<PerformanceCounter>,
    ) -> Result<Self> {
        let pattern = engine.pattern_for(&filter)?;
        Ok(Self {
            queue,
            params,
            filter,
            pattern,
            buffer,
            counter,
            line_tx: None,
        })
    }

    /// Publish every appended line to render subscribers
    pub fn with_line_sender(mut self, line_tx: broadcast::Sender<DisplayLine>) -> Self {
        self.line_tx = Some(line_tx);
        self
    }

    /// Snapshot of the shared parameters for this tick
    fn params_snapshot(&self) -> AdaptiveParams {
        match self.params.read() {
            Ok(params) => params.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn highlight_mode(&self, plan: &TickPlan) -> HighlightMode {
        if !self.filter.highlight_enabled || self.pattern.is_none() {
            HighlightMode::Off
        } else if plan.tier == LoadTier::High {
            HighlightMode::FirstMatch
        } else {
            HighlightMode::AllMatches
        }
    }

    /// Run one scheduling tick; never blocks on the queue
    pub fn tick(&mut self) -> Result<TickReport> {
        let params = self.params_snapshot();
        let queue_depth = self.queue.len();
        let plan = TickPlan::for_depth(queue_depth, &params);

        let batch = self.queue.drain_up_to(plan.batch_size);
        let drained = batch.len();
        let kept_lines = if plan.sampling { sample(batch) } else { batch };
        let kept = kept_lines.len();

        let mode = self.highlight_mode(&plan);
        let pattern = self.pattern.as_deref();
        let display_lines: Vec<DisplayLine> = kept_lines
            .iter()
            .filter(|line| FilterEngine::accepts_compiled(pattern, &line.text))
            .map(|line| highlight_line(line, pattern, mode))
            .collect();
        let accepted = display_lines.len();

        let trim = {
            let mut buffer = self
                .buffer
                .write()
                .map_err(|_| DroidtailError::poisoned("display buffer"))?;
            buffer.set_limits(params.max_display_lines, params.trim_threshold_lines);

            let publish = self
                .line_tx
                .as_ref()
                .filter(|tx| tx.receiver_count() > 0);
            for line in display_lines {
                if let Some(tx) = publish {
                    let _ = tx.send(line.clone());
                }
                buffer.append(line);
            }
            buffer.maybe_trim()
        };

        self.counter.record_tick(plan, drained, drained - kept, accepted);

        let report = TickReport {
            plan,
            queue_depth,
            drained,
            kept,
            accepted,
            trim,
        };
        trace!(?report, "Scheduler tick");
        Ok(report)
    }

    /// Drain whatever is left in the queue without pausing, then enforce the cap
    pub fn drain_remaining(&mut self) -> Result<TrimOutcome> {
        while !self.queue.is_empty() {
            self.tick()?;
        }
        let mut buffer = self
            .buffer
            .write()
            .map_err(|_| DroidtailError::poisoned("display buffer"))?;
        Ok(buffer.trim_to_cap())
    }

    pub fn filter(&self) -> &FilterConfig {
        &self.filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared_params;

    fn params() -> AdaptiveParams {
        AdaptiveParams {
            base_batch_size: 10,
            max_batch_size: 50,
            base_interval_ms: 100,
            min_interval_ms: 20,
            high_load_threshold: 200,
            medium_load_threshold: 50,
            ..AdaptiveParams::default()
        }
    }

    fn scheduler_with(
        params: AdaptiveParams,
        filter: FilterConfig,
    ) -> (AdaptiveScheduler, LineQueue, Arc<RwLock<DisplayBuffer>>) {
        let queue = LineQueue::new();
        let buffer = Arc::new(RwLock::new(DisplayBuffer::from_params(&params)));
        let scheduler = AdaptiveScheduler::new(
            queue.clone(),
            shared_params(params),
            filter,
            &FilterEngine::new(),
            buffer.clone(),
            Arc::new(PerformanceCounter::new()),
        )
        .unwrap();
        (scheduler, queue, buffer)
    }

    #[test]
    fn test_tier_boundaries() {
        let p = params();

        let low = TickPlan::for_depth(0, &p);
        assert_eq!(
            (low.tier, low.batch_size, low.interval_ms, low.sampling),
            (LoadTier::Low, 10, 100, false)
        );

        let at_medium = TickPlan::for_depth(50, &p);
        assert_eq!(at_medium.tier, LoadTier::Low);

        let medium = TickPlan::for_depth(51, &p);
        assert_eq!(
            (medium.tier, medium.batch_size, medium.interval_ms, medium.sampling),
            (LoadTier::Medium, 15, 70, false)
        );

        let at_high = TickPlan::for_depth(200, &p);
        assert_eq!(at_high.tier, LoadTier::Medium);

        let high = TickPlan::for_depth(201, &p);
        assert_eq!(
            (high.tier, high.batch_size, high.interval_ms, high.sampling),
            (LoadTier::High, 50, 20, true)
        );
    }

    #[test]
    fn test_medium_tier_rounds() {
        let p = AdaptiveParams {
            base_batch_size: 3,
            base_interval_ms: 15,
            ..params()
        };
        let medium = TickPlan::for_depth(100, &p);
        // 3 * 1.5 = 4.5 and 15 * 0.7 = 10.5 round half away from zero
        assert_eq!(medium.batch_size, 5);
        assert_eq!(medium.interval_ms, 11);
    }

    #[test]
    fn test_sampling_keeps_every_third_line() {
        for n in 0..20u64 {
            let lines: Vec<RawLine> = (0..n).map(|i| RawLine::new("x", i)).collect();
            let kept = sample(lines);
            assert_eq!(kept.len() as u64, n.div_ceil(3));
            let ordinals: Vec<u64> = kept.iter().map(|l| l.ordinal).collect();
            let expected: Vec<u64> = (0..n).step_by(3).collect();
            assert_eq!(ordinals, expected);
        }
    }

    #[test]
    fn test_tick_filters_and_highlights() {
        let (mut scheduler, queue, buffer) = scheduler_with(params(), FilterConfig::literal("gc"));
        queue.push(RawLine::new("D/dalvikvm: GC_CONCURRENT freed 2MB", 0));
        queue.push(RawLine::new("I/ActivityManager: Start proc", 1));
        queue.push(RawLine::new("D/art: Background gc done", 2));

        let report = scheduler.tick().unwrap();
        assert_eq!(report.drained, 3);
        assert_eq!(report.kept, 3);
        assert_eq!(report.accepted, 2);

        let buffer = buffer.read().unwrap();
        let ordinals: Vec<u64> = buffer.lines().map(|l| l.source_ordinal).collect();
        assert_eq!(ordinals, vec![0, 2]);
        assert!(buffer.lines().all(|l| l.has_highlight()));
    }

    #[test]
    fn test_empty_queue_tick_is_noop() {
        let (mut scheduler, _queue, buffer) = scheduler_with(params(), FilterConfig::default());
        let report = scheduler.tick().unwrap();
        assert_eq!(report.drained, 0);
        assert_eq!(report.plan.tier, LoadTier::Low);
        assert!(buffer.read().unwrap().is_empty());
    }

    #[test]
    fn test_high_load_highlights_first_match_only() {
        let (mut scheduler, queue, buffer) = scheduler_with(params(), FilterConfig::literal("x"));
        for i in 0..300 {
            queue.push(RawLine::new("x and x", i));
        }

        let report = scheduler.tick().unwrap();
        assert_eq!(report.plan.tier, LoadTier::High);

        let buffer = buffer.read().unwrap();
        let first = buffer.lines().next().unwrap();
        assert_eq!(first.spans.iter().filter(|s| s.highlighted).count(), 1);
        assert_eq!(first.text(), "x and x");
    }

    #[test]
    fn test_params_are_snapshot_per_tick() {
        let p = params();
        let shared = shared_params(p.clone());
        let queue = LineQueue::new();
        let buffer = Arc::new(RwLock::new(DisplayBuffer::from_params(&p)));
        let mut scheduler = AdaptiveScheduler::new(
            queue.clone(),
            shared.clone(),
            FilterConfig::default(),
            &FilterEngine::new(),
            buffer,
            Arc::new(PerformanceCounter::new()),
        )
        .unwrap();

        for i in 0..30 {
            queue.push(RawLine::new("line", i));
        }
        assert_eq!(scheduler.tick().unwrap().drained, 10);

        shared.write().unwrap().base_batch_size = 5;
        assert_eq!(scheduler.tick().unwrap().drained, 5);
    }

    #[test]
    fn test_drain_remaining_empties_queue_and_caps_buffer() {
        let p = AdaptiveParams {
            max_display_lines: 20,
            trim_threshold_lines: 5,
            ..params()
        };
        let (mut scheduler, queue, buffer) = scheduler_with(p, FilterConfig::default());
        for i in 0..40 {
            queue.push(RawLine::new("line", i));
        }

        scheduler.drain_remaining().unwrap();
        assert!(queue.is_empty());
        let buffer = buffer.read().unwrap();
        assert_eq!(buffer.len(), 20);
        assert_eq!(buffer.lines().next().unwrap().source_ordinal, 20);
    }

    #[test]
    fn test_invalid_filter_regex_fails_construction() {
        let result = AdaptiveScheduler::new(
            LineQueue::new(),
            shared_params(params()),
            FilterConfig::regex("[unclosed"),
            &FilterEngine::new(),
            Arc::new(RwLock::new(DisplayBuffer::default())),
            Arc::new(PerformanceCounter::new()),
        );
        assert!(matches!(result, Err(DroidtailError::Pattern { .. })));
    }
}
