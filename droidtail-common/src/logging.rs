//! Logging configuration for droidtail

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging on stderr so stdout stays free for rendered log lines
pub fn init_logging_to_stderr(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    tracing::debug!("Logging initialized on stderr with level: {}", level);
    Ok(())
}

/// Gate for warnings that can fire on every tick
///
/// `check` returns `Some(suppressed)` when the caller should emit its warning,
/// where `suppressed` is the number of occurrences swallowed since the last
/// emitted one. Within the window it returns `None` and counts.
#[derive(Debug)]
pub struct RateLimitedWarn {
    window: Duration,
    state: Mutex<RateState>,
}

#[derive(Debug)]
struct RateState {
    last_emitted: Option<Instant>,
    suppressed: u64,
}

impl RateLimitedWarn {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: Mutex::new(RateState {
                last_emitted: None,
                suppressed: 0,
            }),
        }
    }

    pub fn check(&self) -> Option<u64> {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        let due = match state.last_emitted {
            None => true,
            Some(last) => now.duration_since(last) >= self.window,
        };
        if due {
            let suppressed = state.suppressed;
            state.last_emitted = Some(now);
            state.suppressed = 0;
            Some(suppressed)
        } else {
            state.suppressed += 1;
            None
        }
    }
}

impl Default for RateLimitedWarn {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stderr_logging_initializes_once() {
        init_logging_to_stderr("debug").unwrap();
        assert!(init_logging_to_stderr("info").is_err());
    }

    #[test]
    fn test_rate_limited_warn_suppresses_within_window() {
        let gate = RateLimitedWarn::new(Duration::from_secs(3600));
        assert_eq!(gate.check(), Some(0));
        assert_eq!(gate.check(), None);
        assert_eq!(gate.check(), None);
    }

    #[test]
    fn test_rate_limited_warn_reports_suppressed_count() {
        let gate = RateLimitedWarn::new(Duration::from_millis(0));
        assert_eq!(gate.check(), Some(0));
        // Zero window: every call is due
        assert_eq!(gate.check(), Some(0));
    }
}
