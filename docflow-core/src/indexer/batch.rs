//! Size- and time-bounded batch accumulation.

use std::time::{Duration, Instant};

use crate::indexer::sink::IndexRequest;

/// Accumulates index requests until capacity is reached or the batch ages
/// past its timeout.
#[derive(Debug)]
pub struct Batch {
    capacity: usize,
    timeout: Duration,
    items: Vec<IndexRequest>,
    started: Option<Instant>,
}

impl Batch {
    /// Creates a batch with the given capacity and age timeout.
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            timeout,
            items: Vec::new(),
            started: None,
        }
    }

    /// Adds a request, or records an idle poll with `None`.
    ///
    /// Returns the full batch when the capacity is reached. On an idle poll
    /// the current batch is returned iff it is non-empty and older than the
    /// timeout; this is how idle polling still makes progress.
    pub fn add(&mut self, item: Option<IndexRequest>) -> Vec<IndexRequest> {
        match item {
            Some(item) => {
                if self.items.is_empty() {
                    self.started = Some(Instant::now());
                }
                self.items.push(item);
                if self.items.len() >= self.capacity {
                    self.take()
                } else {
                    Vec::new()
                }
            }
            None => {
                let expired = self
                    .started
                    .map(|started| started.elapsed() >= self.timeout)
                    .unwrap_or(false);
                if !self.items.is_empty() && expired {
                    self.take()
                } else {
                    Vec::new()
                }
            }
        }
    }

    /// Unconditionally returns and clears the current batch.
    pub fn flush(&mut self) -> Vec<IndexRequest> {
        self.take()
    }

    /// Number of requests currently buffered.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn take(&mut self) -> Vec<IndexRequest> {
        self.started = None;
        std::mem::take(&mut self.items)
    }
}
