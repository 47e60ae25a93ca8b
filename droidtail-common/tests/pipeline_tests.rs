//! Pipeline Integration Tests
//!
//! These tests drive the queue, scheduler, buffer and session together the
//! way a front-end would, including real child processes on Unix.

use droidtail_common::{
    AdaptiveParams, AdaptiveScheduler, DisplayBuffer, DisplayLine, FilterConfig, FilterEngine,
    LineQueue, LoadTier, PerformanceCounter, RawLine, Span, TickReport, shared_params,
};
use std::sync::{Arc, RwLock};

/// Scheduler wired to a fresh queue and buffer
struct TestPipeline {
    queue: LineQueue,
    buffer: Arc<RwLock<DisplayBuffer>>,
    counter: Arc<PerformanceCounter>,
    scheduler: AdaptiveScheduler,
}

impl TestPipeline {
    fn new(params: AdaptiveParams, filter: FilterConfig) -> Self {
        let queue = LineQueue::new();
        let buffer = Arc::new(RwLock::new(DisplayBuffer::from_params(&params)));
        let counter = Arc::new(PerformanceCounter::new());
        let scheduler = AdaptiveScheduler::new(
            queue.clone(),
            shared_params(params),
            filter,
            &FilterEngine::new(),
            buffer.clone(),
            counter.clone(),
        )
        .expect("valid filter");

        Self {
            queue,
            buffer,
            counter,
            scheduler,
        }
    }

    fn push_lines(&self, count: u64) {
        for i in 0..count {
            self.queue.push(RawLine::new(format!("I/Burst: line {}", i), i));
        }
    }

    fn run_until_empty(&mut self) -> Vec<TickReport> {
        let mut reports = Vec::new();
        while !self.queue.is_empty() {
            reports.push(self.scheduler.tick().expect("tick"));
        }
        reports
    }
}

#[test]
fn test_burst_then_drain() {
    let params = AdaptiveParams::default();
    let mut pipeline = TestPipeline::new(params.clone(), FilterConfig::default());
    pipeline.push_lines(1500);

    let reports = pipeline.run_until_empty();

    let first = reports.first().expect("at least one tick").plan;
    assert_eq!(first.tier, LoadTier::High);
    assert_eq!(first.batch_size, params.max_batch_size);
    assert_eq!(first.interval_ms, params.min_interval_ms);
    assert!(first.sampling);

    let last = reports.last().expect("at least one tick");
    assert!(last.queue_depth <= params.medium_load_threshold);
    assert_eq!(last.plan.tier, LoadTier::Low);
    assert_eq!(last.plan.batch_size, params.base_batch_size);
    assert_eq!(last.plan.interval_ms, params.base_interval_ms);
    assert!(!last.plan.sampling);

    // Load only ever eases while nothing new arrives
    let tiers: Vec<LoadTier> = reports.iter().map(|r| r.plan.tier).collect();
    let rank = |tier: &LoadTier| match tier {
        LoadTier::Low => 0,
        LoadTier::Medium => 1,
        LoadTier::High => 2,
    };
    assert!(tiers.windows(2).all(|w| rank(&w[0]) >= rank(&w[1])));

    // The one high-load tick kept a third of its 500 lines
    let drained: usize = reports.iter().map(|r| r.drained).sum();
    let kept: usize = reports.iter().map(|r| r.kept).sum();
    assert_eq!(drained, 1500);
    assert_eq!(kept, 1500 - 500 + 167);
    assert_eq!(pipeline.counter.processed_lines(), 1500);
    assert_eq!(pipeline.buffer.read().unwrap().len(), kept);
}

#[test]
fn test_sampled_lines_preserve_order() {
    let params = AdaptiveParams {
        high_load_threshold: 10,
        medium_load_threshold: 5,
        max_batch_size: 30,
        ..AdaptiveParams::default()
    };
    let mut pipeline = TestPipeline::new(params, FilterConfig::default());
    pipeline.push_lines(30);

    let report = pipeline.scheduler.tick().unwrap();
    assert_eq!(report.plan.tier, LoadTier::High);
    assert_eq!(report.kept, 10);

    let buffer = pipeline.buffer.read().unwrap();
    let ordinals: Vec<u64> = buffer.lines().map(|l| l.source_ordinal).collect();
    assert_eq!(ordinals, (0..30).step_by(3).collect::<Vec<u64>>());
}

#[test]
fn test_buffer_cap_keeps_last_lines() {
    let params = AdaptiveParams::default().with_max_display_lines(100);
    let mut buffer = DisplayBuffer::from_params(&params);
    assert_eq!(buffer.trim_threshold_lines(), 5);

    for i in 0..250u64 {
        buffer.append(DisplayLine {
            spans: vec![Span::plain(format!("line {}", i))],
            source_ordinal: i,
        });
        buffer.maybe_trim();
        assert!(buffer.len() <= 100 + 5);
    }

    buffer.trim_to_cap();
    let ordinals: Vec<u64> = buffer.lines().map(|l| l.source_ordinal).collect();
    assert_eq!(ordinals, (150..250).collect::<Vec<u64>>());
}

#[test]
fn test_filter_and_cap_together() {
    let params = AdaptiveParams::default().with_max_display_lines(20);
    let mut pipeline = TestPipeline::new(params, FilterConfig::regex(r"line \d*[05]$"));
    pipeline.push_lines(300);

    pipeline.run_until_empty();
    pipeline.scheduler.drain_remaining().unwrap();

    let buffer = pipeline.buffer.read().unwrap();
    assert_eq!(buffer.len(), 20);
    let ordinals: Vec<u64> = buffer.lines().map(|l| l.source_ordinal).collect();
    assert_eq!(ordinals, (200..300).step_by(5).collect::<Vec<u64>>());
    assert!(buffer.lines().all(|l| l.has_highlight()));
}

#[cfg(unix)]
mod process {
    use droidtail_common::{
        AdaptiveParams, DroidtailError, FilterConfig, FilteringSession, LogCommand, SessionEvent,
        SessionState, StopReason,
    };
    use std::time::Duration;
    use tokio::sync::broadcast::error::TryRecvError;

    fn fast_params() -> AdaptiveParams {
        AdaptiveParams {
            base_interval_ms: 5,
            min_interval_ms: 1,
            ..AdaptiveParams::default()
        }
    }

    #[tokio::test]
    async fn test_regex_filter_session() {
        let session = FilteringSession::new(fast_params());
        let mut lines = session.subscribe_lines();
        let command = LogCommand::new("sh").args([
            "-c",
            r"printf 'WARN err a timeout occurred\ninfo: all good\nE/Sock: ERR read TIMEOUT\n'",
        ]);

        session
            .start(FilterConfig::regex("ERR.*timeout"), &command)
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), session.wait_until_idle())
            .await
            .expect("session should end when the producer exits");

        let first = lines.recv().await.unwrap();
        assert_eq!(first.text(), "WARN err a timeout occurred");
        let highlighted: Vec<&str> = first
            .spans
            .iter()
            .filter(|s| s.highlighted)
            .map(|s| s.text.as_str())
            .collect();
        assert_eq!(highlighted, vec!["err a timeout"]);

        let second = lines.recv().await.unwrap();
        assert_eq!(second.text(), "E/Sock: ERR read TIMEOUT");
        assert!(lines.try_recv().is_err());

        let snapshot = session.snapshot().unwrap();
        assert_eq!(snapshot.buffer_length, 2);
        assert_eq!(snapshot.stats.processed_lines, 3);
        assert_eq!(snapshot.stats.accepted_lines, 2);
    }

    #[tokio::test]
    async fn test_stop_during_stream_caps_buffer() {
        let params = AdaptiveParams {
            base_interval_ms: 5,
            min_interval_ms: 1,
            ..AdaptiveParams::default()
        }
        .with_max_display_lines(50);
        let session = FilteringSession::new(params);
        let mut events = session.subscribe_events();
        let command = LogCommand::new("sh").args([
            "-c",
            "i=0; while true; do echo \"line $i\"; i=$((i+1)); done",
        ]);

        let id = session.start(FilterConfig::default(), &command).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        session.stop().await.unwrap();

        assert_eq!(session.state(), SessionState::Idle);
        let lines = session.snapshot_lines().unwrap();
        assert!(lines.len() <= 50);
        assert!(lines.windows(2).all(|w| w[0].source_ordinal < w[1].source_ordinal));

        // Trim events may have overflowed the channel; the stop event is last
        let mut stopped = None;
        loop {
            match events.try_recv() {
                Ok(SessionEvent::Stopped { session_id, reason }) => {
                    stopped = Some((session_id, reason))
                }
                Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        assert_eq!(stopped, Some((id, StopReason::Requested)));
    }

    #[tokio::test]
    async fn test_restart_after_producer_exit() {
        let session = FilteringSession::new(fast_params());
        let command = LogCommand::new("sh").args(["-c", "echo one"]);

        session.start(FilterConfig::default(), &command).await.unwrap();
        session.wait_until_idle().await;
        session.start(FilterConfig::default(), &command).await.unwrap();
        session.wait_until_idle().await;

        let texts: Vec<String> =
            session.snapshot_lines().unwrap().iter().map(|l| l.text()).collect();
        assert_eq!(texts, vec!["one", "one"]);

        let bad = session.start(FilterConfig::regex("*"), &command).await;
        assert!(matches!(bad, Err(DroidtailError::Pattern { .. })));
        assert_eq!(session.state(), SessionState::Idle);
    }
}
