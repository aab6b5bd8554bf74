//! Throughput accounting for workers and indexers.
//!
//! A [`PipelineMetrics`] tracks a cumulative document count and derives a
//! documents/second rate; a periodic logger task reports both.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::info;

/// Thread-safe document throughput counter.
#[derive(Debug)]
pub struct PipelineMetrics {
    component: &'static str,
    processed: AtomicU64,
    started: Instant,
}

impl PipelineMetrics {
    /// Creates a counter labeled with the owning component.
    pub fn new(component: &'static str) -> Self {
        Self {
            component,
            processed: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    /// Records one processed document.
    pub fn mark(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records `n` processed documents.
    pub fn mark_many(&self, n: u64) {
        self.processed.fetch_add(n, Ordering::Relaxed);
    }

    /// Cumulative processed-document count.
    pub fn count(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Average documents/second since creation.
    pub fn rate(&self) -> f64 {
        let secs = self.started.elapsed().as_secs_f64().max(f64::EPSILON);
        self.count() as f64 / secs
    }

    /// Emits a progress log line.
    pub fn log_progress(&self) {
        info!(
            component = self.component,
            processed = self.count(),
            rate_per_sec = format_args!("{:.2}", self.rate()),
            "processing progress"
        );
    }

    /// Spawns a task logging progress on the given interval.
    ///
    /// The caller aborts the handle on shutdown.
    pub fn spawn_logger(metrics: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                metrics.log_progress();
            }
        })
    }
}
