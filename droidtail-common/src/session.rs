//! Filtering session
//!
//! A session owns the pipeline for one run of the log producer:
//!
//! ```text
//! Idle -> Starting -> Running -> Stopping -> Idle
//! ```
//!
//! `Starting` validates the filter and spawns the producer; `Running` ticks
//! the scheduler; `Stopping` terminates the producer and drains what is left
//! in the queue. Producer EOF goes through `Stopping` on its own. The display
//! buffer outlives individual runs, so a later start appends to it.

use crate::performance::{PerformanceCounter, PerformanceMonitor, PerformanceSnapshot};
use crate::scheduler::AdaptiveScheduler;
use crate::search::{SearchEngine, SearchResults};
use crate::stream::StreamReader;
use crate::{
    AdaptiveParams, DisplayBuffer, DisplayLine, DroidtailError, FilterConfig, FilterEngine,
    LineQueue, LogCommand, Result, SearchResult, SessionEvent, SessionState, SharedParams,
    StopReason,
};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const LINE_CHANNEL_CAPACITY: usize = 4096;
const EVENT_CHANNEL_CAPACITY: usize = 64;

struct ActiveRun {
    session_id: String,
    filter: FilterConfig,
    stop_tx: watch::Sender<bool>,
    /// Taken once the task has been awaited
    task: Option<JoinHandle<()>>,
}

/// Owns the queue, buffer and stats of a live filtering pipeline
pub struct FilteringSession {
    params: SharedParams,
    engine: FilterEngine,
    search_engine: SearchEngine,
    queue: LineQueue,
    buffer: Arc<RwLock<DisplayBuffer>>,
    counter: Arc<PerformanceCounter>,
    monitor: PerformanceMonitor,
    state_tx: Arc<watch::Sender<SessionState>>,
    line_tx: broadcast::Sender<DisplayLine>,
    event_tx: broadcast::Sender<SessionEvent>,
    search_results: Mutex<Option<SearchResults>>,
    active: tokio::sync::Mutex<Option<ActiveRun>>,
}

impl FilteringSession {
    pub fn new(params: AdaptiveParams) -> Self {
        Self::with_shared_params(crate::shared_params(params))
    }

    /// Create a session reading its tuning from shared parameters
    pub fn with_shared_params(params: SharedParams) -> Self {
        let initial = match params.read() {
            Ok(p) => p.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };

        let queue = LineQueue::new();
        let buffer = Arc::new(RwLock::new(DisplayBuffer::from_params(&initial)));
        let counter = Arc::new(PerformanceCounter::new());
        let monitor =
            PerformanceMonitor::new(counter.clone(), queue.clone(), buffer.clone(), params.clone());
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let (line_tx, _) = broadcast::channel(LINE_CHANNEL_CAPACITY);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            params,
            engine: FilterEngine::new(),
            search_engine: SearchEngine::new(),
            queue,
            buffer,
            counter,
            monitor,
            state_tx: Arc::new(state_tx),
            line_tx,
            event_tx,
            search_results: Mutex::new(None),
            active: tokio::sync::Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn params(&self) -> SharedParams {
        self.params.clone()
    }

    pub fn monitor(&self) -> &PerformanceMonitor {
        &self.monitor
    }

    /// Receive every line appended to the buffer, in append order
    pub fn subscribe_lines(&self) -> broadcast::Receiver<DisplayLine> {
        self.line_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Identifier of the current or most recent run
    pub async fn session_id(&self) -> Option<String> {
        self.active.lock().await.as_ref().map(|run| run.session_id.clone())
    }

    /// Filter of the current or most recent run
    pub async fn filter(&self) -> Option<FilterConfig> {
        self.active.lock().await.as_ref().map(|run| run.filter.clone())
    }

    /// Start filtering the output of `command`
    ///
    /// Fails with `InvalidState` unless the session is idle, `Pattern` if the
    /// filter regex does not compile, and `ProcessSpawn` if the command cannot
    /// be started. On any failure the session is back in `Idle`.
    pub async fn start(&self, filter: FilterConfig, command: &LogCommand) -> Result<String> {
        let mut active = self.active.lock().await;

        let claimed = self.state_tx.send_if_modified(|state| {
            if *state == SessionState::Idle {
                *state = SessionState::Starting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(DroidtailError::invalid_state(format!(
                "cannot start a session while {:?}",
                self.state()
            )));
        }

        // A run that ended on producer EOF leaves a finished task behind
        if let Some(ActiveRun { session_id, task: Some(task), .. }) = active.take() {
            if let Err(e) = task.await {
                warn!(session = %session_id, "Previous run ended abnormally: {}", e);
            }
        }

        match self.launch(filter, command) {
            Ok(run) => {
                let session_id = run.session_id.clone();
                *active = Some(run);
                Ok(session_id)
            }
            Err(e) => {
                self.state_tx.send_replace(SessionState::Idle);
                Err(e)
            }
        }
    }

    fn launch(&self, filter: FilterConfig, command: &LogCommand) -> Result<ActiveRun> {
        // Patterns of earlier runs are never looked up again
        self.engine.clear_cache()?;
        self.engine.validate(&filter)?;

        let params = match self.params.read() {
            Ok(p) => p.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        params.validate()?;

        let stale = self.queue.clear();
        if stale > 0 {
            debug!("Discarded {} lines left from a previous run", stale);
        }
        self.counter.reset();

        let scheduler = AdaptiveScheduler::new(
            self.queue.clone(),
            self.params.clone(),
            filter.clone(),
            &self.engine,
            self.buffer.clone(),
            self.counter.clone(),
        )?
        .with_line_sender(self.line_tx.clone());

        let reader = StreamReader::start(command, self.queue.clone())?;

        let session_id = Uuid::new_v4().to_string();
        let (stop_tx, stop_rx) = watch::channel(false);

        self.state_tx.send_replace(SessionState::Running);
        let _ = self.event_tx.send(SessionEvent::Started {
            session_id: session_id.clone(),
        });
        info!(
            session = %session_id,
            keyword = %filter.keyword,
            regex = filter.use_regex,
            "Filtering session started"
        );

        let task = tokio::spawn(run_pipeline(
            session_id.clone(),
            scheduler,
            reader,
            self.queue.clone(),
            stop_rx,
            self.state_tx.clone(),
            self.event_tx.clone(),
        ));

        Ok(ActiveRun {
            session_id,
            filter,
            stop_tx,
            task: Some(task),
        })
    }

    /// Stop the running session and wait for the final drain
    ///
    /// Idempotent; a no-op when nothing is running or the producer already
    /// exited.
    pub async fn stop(&self) -> Result<()> {
        let mut active = self.active.lock().await;
        let Some(run) = active.as_mut() else {
            return Ok(());
        };
        let Some(task) = run.task.take() else {
            return Ok(());
        };

        let _ = run.stop_tx.send(true);
        if let Err(e) = task.await {
            error!(session = %run.session_id, "Pipeline task failed: {}", e);
            self.state_tx.send_replace(SessionState::Idle);
        }
        Ok(())
    }

    /// Wait until the session is idle, after a stop or producer EOF
    pub async fn wait_until_idle(&self) {
        let mut state_rx = self.state_tx.subscribe();
        let _ = state_rx.wait_for(|state| *state == SessionState::Idle).await;
    }

    /// Drop every buffered line
    ///
    /// Resets the processing stats when a run is active and invalidates any
    /// stored search results.
    pub fn clear(&self) -> Result<()> {
        {
            let mut buffer = self
                .buffer
                .write()
                .map_err(|_| DroidtailError::poisoned("display buffer"))?;
            buffer.clear();
        }

        if self.state() == SessionState::Running {
            self.counter.reset();
        }

        let mut results = self
            .search_results
            .lock()
            .map_err(|_| DroidtailError::poisoned("search results"))?;
        *results = None;

        let _ = self.event_tx.send(SessionEvent::Cleared);
        Ok(())
    }

    /// Change the display cap; takes effect on the next tick
    ///
    /// A cap that fails validation leaves the current parameters untouched.
    pub fn set_max_display_lines(&self, max_display_lines: usize) -> Result<()> {
        let mut params = self
            .params
            .write()
            .map_err(|_| DroidtailError::poisoned("adaptive params"))?;

        let candidate = params.clone().with_max_display_lines(max_display_lines);
        candidate.validate()?;
        *params = candidate;
        debug!(max_display_lines, "Display cap updated");
        Ok(())
    }

    /// Search the current buffer and keep the results for navigation
    pub fn search(
        &self,
        keyword: &str,
        case_sensitive: bool,
        use_regex: bool,
    ) -> Result<SearchResults> {
        let results = {
            let buffer = self
                .buffer
                .read()
                .map_err(|_| DroidtailError::poisoned("display buffer"))?;
            self.search_engine.search(&buffer, keyword, case_sensitive, use_regex)?
        };

        let mut stored = self
            .search_results
            .lock()
            .map_err(|_| DroidtailError::poisoned("search results"))?;
        *stored = Some(results.clone());
        Ok(results)
    }

    /// Next stored search hit, or `None` if there is none or it went stale
    pub fn find_next(&self) -> Result<Option<SearchResult>> {
        self.navigate(SearchResults::find_next)
    }

    /// Previous stored search hit, or `None` if there is none or it went stale
    pub fn find_previous(&self) -> Result<Option<SearchResult>> {
        self.navigate(SearchResults::find_previous)
    }

    fn navigate(
        &self,
        step: fn(&mut SearchResults) -> Option<SearchResult>,
    ) -> Result<Option<SearchResult>> {
        let generation = self.buffer_generation()?;
        let mut stored = self
            .search_results
            .lock()
            .map_err(|_| DroidtailError::poisoned("search results"))?;

        match stored.as_mut() {
            Some(results) if !results.is_stale_for(generation) => Ok(step(results)),
            Some(_) => {
                debug!("Search results are stale, run the search again");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn buffer_generation(&self) -> Result<u64> {
        let buffer = self
            .buffer
            .read()
            .map_err(|_| DroidtailError::poisoned("display buffer"))?;
        Ok(buffer.generation())
    }

    pub fn snapshot(&self) -> Result<PerformanceSnapshot> {
        self.monitor.snapshot()
    }

    pub fn snapshot_lines(&self) -> Result<Vec<DisplayLine>> {
        let buffer = self
            .buffer
            .read()
            .map_err(|_| DroidtailError::poisoned("display buffer"))?;
        Ok(buffer.snapshot())
    }

    /// Buffer content as newline-terminated text, the text search offsets refer to
    pub fn buffer_text(&self) -> Result<String> {
        let buffer = self
            .buffer
            .read()
            .map_err(|_| DroidtailError::poisoned("display buffer"))?;
        Ok(buffer.text())
    }
}

impl Default for FilteringSession {
    fn default() -> Self {
        Self::new(AdaptiveParams::default())
    }
}

/// Scheduler loop of one run; ends on stop request, producer EOF or tick failure
async fn run_pipeline(
    session_id: String,
    mut scheduler: AdaptiveScheduler,
    mut reader: StreamReader,
    queue: LineQueue,
    mut stop_rx: watch::Receiver<bool>,
    state_tx: Arc<watch::Sender<SessionState>>,
    event_tx: broadcast::Sender<SessionEvent>,
) {
    let reason = loop {
        let report = match scheduler.tick() {
            Ok(report) => report,
            Err(e) => {
                error!(session = %session_id, "Scheduler tick failed: {}", e);
                break StopReason::PipelineError;
            }
        };

        let removed = report.trim.removed();
        if removed > 0 {
            let _ = event_tx.send(SessionEvent::Trimmed { removed });
        }

        if !reader.is_active() && queue.is_empty() {
            break StopReason::ProducerExited;
        }

        tokio::select! {
            _ = stop_rx.changed() => break StopReason::Requested,
            _ = tokio::time::sleep(report.plan.interval()) => {}
        }
    };

    state_tx.send_replace(SessionState::Stopping);
    reader.stop().await;

    match scheduler.drain_remaining() {
        Ok(trim) => {
            let removed = trim.removed();
            if removed > 0 {
                let _ = event_tx.send(SessionEvent::Trimmed { removed });
            }
        }
        Err(e) => error!(session = %session_id, "Final drain failed: {}", e),
    }

    let status = reader.status();
    state_tx.send_replace(SessionState::Idle);
    let _ = event_tx.send(SessionEvent::Stopped {
        session_id: session_id.clone(),
        reason,
    });
    info!(
        session = %session_id,
        ?reason,
        lines_read = status.lines_read,
        "Filtering session stopped"
    );
}
