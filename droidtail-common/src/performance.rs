//! Performance monitoring
//!
//! Counters are bumped by the scheduler on every tick; the monitor turns
//! them, the queue depth and the buffer state into read-only snapshots for
//! a status display or a periodic log line.

use crate::buffer::BufferStats;
use crate::scheduler::TickPlan;
use crate::{
    AdaptiveParams, DisplayBuffer, DisplayLine, LineQueue, LoadTier, Result, SharedParams, Span,
};
use crate::DroidtailError;
use serde::Serialize;
use std::mem::size_of;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Rough per-line overhead on top of the text itself
const LINE_OVERHEAD_BYTES: usize = size_of::<DisplayLine>() + size_of::<Span>();

/// Processing counters since the last reset
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceStats {
    pub processed_lines: u64,
    pub accepted_lines: u64,
    pub sampled_out_lines: u64,
    pub ticks: u64,
    pub started_at: SystemTime,
    pub processing_rate_per_sec: f64,
}

#[derive(Debug)]
struct CounterEpoch {
    started: Instant,
    started_at: SystemTime,
}

impl CounterEpoch {
    fn now() -> Self {
        Self {
            started: Instant::now(),
            started_at: SystemTime::now(),
        }
    }
}

/// Performance counter for the drain pipeline
#[derive(Debug)]
pub struct PerformanceCounter {
    processed_lines: AtomicU64,
    accepted_lines: AtomicU64,
    sampled_out_lines: AtomicU64,
    ticks: AtomicU64,
    epoch: RwLock<CounterEpoch>,
    last_plan: RwLock<Option<TickPlan>>,
}

impl PerformanceCounter {
    pub fn new() -> Self {
        Self {
            processed_lines: AtomicU64::new(0),
            accepted_lines: AtomicU64::new(0),
            sampled_out_lines: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            epoch: RwLock::new(CounterEpoch::now()),
            last_plan: RwLock::new(None),
        }
    }

    /// Record one tick
    ///
    /// `drained` counts every line taken off the queue, including the ones
    /// later dropped by sampling or rejected by the filter.
    pub fn record_tick(&self, plan: TickPlan, drained: usize, sampled_out: usize, accepted: usize) {
        self.processed_lines.fetch_add(drained as u64, Ordering::Relaxed);
        self.sampled_out_lines.fetch_add(sampled_out as u64, Ordering::Relaxed);
        self.accepted_lines.fetch_add(accepted as u64, Ordering::Relaxed);
        self.ticks.fetch_add(1, Ordering::Relaxed);

        match self.last_plan.write() {
            Ok(mut last) => *last = Some(plan),
            Err(poisoned) => *poisoned.into_inner() = Some(plan),
        }
    }

    pub fn processed_lines(&self) -> u64 {
        self.processed_lines.load(Ordering::Relaxed)
    }

    pub fn last_plan(&self) -> Option<TickPlan> {
        match self.last_plan.read() {
            Ok(last) => *last,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn elapsed(&self) -> Duration {
        match self.epoch.read() {
            Ok(epoch) => epoch.started.elapsed(),
            Err(poisoned) => poisoned.into_inner().started.elapsed(),
        }
    }

    /// Lines processed per second since the last reset
    pub fn rate(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.processed_lines() as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn get_stats(&self) -> PerformanceStats {
        let started_at = match self.epoch.read() {
            Ok(epoch) => epoch.started_at,
            Err(poisoned) => poisoned.into_inner().started_at,
        };

        PerformanceStats {
            processed_lines: self.processed_lines(),
            accepted_lines: self.accepted_lines.load(Ordering::Relaxed),
            sampled_out_lines: self.sampled_out_lines.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
            started_at,
            processing_rate_per_sec: self.rate(),
        }
    }

    /// Zero the counters and restart the rate clock
    pub fn reset(&self) {
        self.processed_lines.store(0, Ordering::Relaxed);
        self.accepted_lines.store(0, Ordering::Relaxed);
        self.sampled_out_lines.store(0, Ordering::Relaxed);
        self.ticks.store(0, Ordering::Relaxed);

        match self.epoch.write() {
            Ok(mut epoch) => *epoch = CounterEpoch::now(),
            Err(poisoned) => *poisoned.into_inner() = CounterEpoch::now(),
        }
        match self.last_plan.write() {
            Ok(mut last) => *last = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }
}

impl Default for PerformanceCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of the pipeline
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSnapshot {
    pub queue_depth: usize,
    pub load_tier: LoadTier,
    pub batch_size: usize,
    pub interval_ms: u64,
    pub sampling: bool,
    pub buffer_length: usize,
    pub processing_rate_per_sec: f64,
    pub approx_memory_bytes: usize,
    pub stats: PerformanceStats,
    pub buffer: BufferStats,
}

impl PerformanceSnapshot {
    /// Whether the pipeline is currently dropping or failing to evict lines
    pub fn is_degraded(&self) -> bool {
        self.sampling || self.buffer.trim_failures > 0
    }
}

/// Read-only observer of a session's pipeline
#[derive(Clone)]
pub struct PerformanceMonitor {
    counter: Arc<PerformanceCounter>,
    queue: LineQueue,
    buffer: Arc<RwLock<DisplayBuffer>>,
    params: SharedParams,
}

impl PerformanceMonitor {
    pub fn new(
        counter: Arc<PerformanceCounter>,
        queue: LineQueue,
        buffer: Arc<RwLock<DisplayBuffer>>,
        params: SharedParams,
    ) -> Self {
        Self {
            counter,
            queue,
            buffer,
            params,
        }
    }

    pub fn get_counter(&self) -> Arc<PerformanceCounter> {
        self.counter.clone()
    }

    fn params_snapshot(&self) -> AdaptiveParams {
        match self.params.read() {
            Ok(params) => params.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Current pipeline snapshot
    ///
    /// Batch size and interval are the ones the scheduler last used; before
    /// the first tick they are the low-load values.
    pub fn snapshot(&self) -> Result<PerformanceSnapshot> {
        let queue_depth = self.queue.len();
        let plan = self
            .counter
            .last_plan()
            .unwrap_or_else(|| TickPlan::for_depth(0, &self.params_snapshot()));

        let buffer = self
            .buffer
            .read()
            .map_err(|_| DroidtailError::poisoned("display buffer"))?;
        let buffer_stats = buffer.stats();

        let stats = self.counter.get_stats();
        Ok(PerformanceSnapshot {
            queue_depth,
            load_tier: plan.tier,
            batch_size: plan.batch_size,
            interval_ms: plan.interval_ms,
            sampling: plan.sampling,
            buffer_length: buffer_stats.total_lines,
            processing_rate_per_sec: stats.processing_rate_per_sec,
            approx_memory_bytes: buffer_stats.total_chars
                + buffer_stats.total_lines * LINE_OVERHEAD_BYTES,
            stats,
            buffer: buffer_stats,
        })
    }

    /// Log a snapshot at debug level every `interval` until the task is aborted
    pub fn start_monitoring(&self, interval: Duration) -> JoinHandle<()> {
        let monitor = self.clone();

        let handle = tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);

            loop {
                interval_timer.tick().await;

                match monitor.snapshot() {
                    Ok(snapshot) => debug!(
                        queue_depth = snapshot.queue_depth,
                        tier = ?snapshot.load_tier,
                        batch_size = snapshot.batch_size,
                        interval_ms = snapshot.interval_ms,
                        buffer_length = snapshot.buffer_length,
                        rate = format!("{:.1}", snapshot.processing_rate_per_sec),
                        "Pipeline metrics"
                    ),
                    Err(e) => debug!(error = %e, "Pipeline metrics unavailable"),
                }
            }
        });

        info!("Performance monitoring started with interval: {:?}", interval);
        handle
    }
}
