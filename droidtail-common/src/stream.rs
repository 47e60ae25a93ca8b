//! Log producer capture
//!
//! Spawns the external log command and pushes every stdout line onto the
//! line queue from a dedicated task. Invalid UTF-8 is replaced, never
//! reported as an error.

use crate::{DroidtailError, LineQueue, LogCommand, RawLine, Result};
use serde::Serialize;
use std::borrow::Cow;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// How long `stop` waits for the reader task before aborting it
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Reader counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreamStatus {
    pub is_active: bool,
    pub lines_read: u64,
    pub bytes_read: u64,
    /// Lines that contained invalid UTF-8 and were decoded with replacement
    pub lossy_lines: u64,
}

#[derive(Debug, Default)]
struct ReaderCounters {
    lines_read: AtomicU64,
    bytes_read: AtomicU64,
    lossy_lines: AtomicU64,
}

/// Handle to a running log producer and its reader task
#[derive(Debug)]
pub struct StreamReader {
    command: LogCommand,
    is_active: Arc<AtomicBool>,
    counters: Arc<ReaderCounters>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl StreamReader {
    /// Spawn the command and start reading its stdout into `queue`
    ///
    /// Fails with `ProcessSpawn` if the command cannot be started.
    pub fn start(command: &LogCommand, queue: LineQueue) -> Result<Self> {
        info!("Starting log producer: {}", command.display());

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DroidtailError::spawn(&command.program, e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DroidtailError::spawn(&command.program, "stdout was not captured"))?;

        let is_active = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(ReaderCounters::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(Self::read_loop(
            child,
            stdout,
            queue,
            shutdown_rx,
            is_active.clone(),
            counters.clone(),
        ));

        Ok(Self {
            command: command.clone(),
            is_active,
            counters,
            shutdown_tx,
            task: Some(task),
        })
    }

    async fn read_loop(
        mut child: Child,
        stdout: ChildStdout,
        queue: LineQueue,
        mut shutdown_rx: watch::Receiver<bool>,
        is_active: Arc<AtomicBool>,
        counters: Arc<ReaderCounters>,
    ) {
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::with_capacity(512);
        let mut ordinal = 0u64;

        loop {
            buf.clear();
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    debug!("Reader shutdown requested");
                    break;
                }
                read = reader.read_until(b'\n', &mut buf) => match read {
                    Ok(0) => {
                        debug!("Log producer closed stdout");
                        break;
                    }
                    Ok(n) => {
                        counters.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
                        let text = decode_line(&buf, &counters);
                        queue.push(RawLine::new(text, ordinal));
                        ordinal += 1;
                        counters.lines_read.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        warn!("Error reading log producer output: {}", e);
                        break;
                    }
                }
            }
        }

        // Clean up
        if let Err(e) = child.start_kill() {
            debug!("Log producer already gone: {}", e);
        }
        match timeout(STOP_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => debug!("Log producer exited: {}", status),
            Ok(Err(e)) => warn!("Failed to reap log producer: {}", e),
            Err(_) => warn!("Log producer did not exit within {:?}", STOP_TIMEOUT),
        }

        is_active.store(false, Ordering::Release);
        info!("Log reader ended after {} lines", ordinal);
    }

    /// False once the producer reached EOF or the reader was stopped
    pub fn is_active(&self) -> bool {
        self.is_active.load(Ordering::Acquire)
    }

    pub fn command(&self) -> &LogCommand {
        &self.command
    }

    pub fn status(&self) -> StreamStatus {
        StreamStatus {
            is_active: self.is_active(),
            lines_read: self.counters.lines_read.load(Ordering::Relaxed),
            bytes_read: self.counters.bytes_read.load(Ordering::Relaxed),
            lossy_lines: self.counters.lossy_lines.load(Ordering::Relaxed),
        }
    }

    /// Terminate the producer and wait for the reader task
    ///
    /// Safe to call more than once and after the producer already exited.
    pub async fn stop(&mut self) {
        let _ = self.shutdown_tx.send(true);

        if let Some(mut task) = self.task.take() {
            match timeout(STOP_TIMEOUT, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Log reader task failed: {}", e),
                Err(_) => {
                    warn!("Log reader did not stop within {:?}, aborting", STOP_TIMEOUT);
                    task.abort();
                    self.is_active.store(false, Ordering::Release);
                }
            }
        }
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Decode one line with replacement and strip its terminator
fn decode_line(buf: &[u8], counters: &ReaderCounters) -> String {
    let mut end = buf.len();
    if end > 0 && buf[end - 1] == b'\n' {
        end -= 1;
        if end > 0 && buf[end - 1] == b'\r' {
            end -= 1;
        }
    }

    match String::from_utf8_lossy(&buf[..end]) {
        Cow::Borrowed(text) => text.to_string(),
        Cow::Owned(text) => {
            counters.lossy_lines.fetch_add(1, Ordering::Relaxed);
            text
        }
    }
}
