//! Line queue between the stream reader and the scheduler
//!
//! The only structure touched by both the reader task and the scheduler.
//! Pushing never blocks and the queue has no element cap: overload is
//! handled by the scheduler's sampling policy, not by backpressure.

use crate::RawLine;
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};

/// Thread-safe FIFO of raw lines with non-blocking drain
///
/// Cloning yields another handle to the same queue.
#[derive(Debug, Clone)]
pub struct LineQueue {
    tx: Sender<RawLine>,
    rx: Receiver<RawLine>,
}

impl LineQueue {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Append a line; never blocks
    pub fn push(&self, line: RawLine) {
        // Both ends live in self, so the channel cannot be disconnected here
        let _ = self.tx.send(line);
    }

    /// Take the oldest line, or `None` if the queue is empty right now
    pub fn try_pop(&self) -> Option<RawLine> {
        match self.rx.try_recv() {
            Ok(line) => Some(line),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Take up to `max` lines in FIFO order, stopping early when empty
    pub fn drain_up_to(&self, max: usize) -> Vec<RawLine> {
        let mut batch = Vec::with_capacity(max.min(self.len()));
        while batch.len() < max {
            match self.try_pop() {
                Some(line) => batch.push(line),
                None => break,
            }
        }
        batch
    }

    /// Current queue depth
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Drop every queued line, returning how many were discarded
    pub fn clear(&self) -> usize {
        let mut discarded = 0;
        while self.try_pop().is_some() {
            discarded += 1;
        }
        discarded
    }
}

impl Default for LineQueue {
    fn default() -> Self {
        Self::new()
    }
}
