//! Retry tracking for redelivered documents.
//!
//! The worker treats the counter as an opaque capability: production
//! deployments back it with a coordination service, tests and local runs use
//! [`MemoryRetryCounter`]. Implementations serialize their own access.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::document::Document;

/// Tracks delivery attempts per document.
pub trait RetryCounter: Send + Sync {
    /// Records a delivery of `doc`.
    ///
    /// Returns true when the configured threshold is now exceeded and the
    /// document should be routed to the dead-letter destination.
    fn add(&self, doc: &Document) -> bool;

    /// Clears the counter entry for `doc` after it reaches a terminal state.
    fn remove(&self, doc: &Document);
}

/// Process-local retry counter keyed by document id.
#[derive(Debug)]
pub struct MemoryRetryCounter {
    max_retries: u32,
    counts: Mutex<HashMap<String, u32>>,
}

impl MemoryRetryCounter {
    /// Creates a counter that trips after `max_retries` deliveries.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            counts: Mutex::new(HashMap::new()),
        }
    }
}

impl RetryCounter for MemoryRetryCounter {
    fn add(&self, doc: &Document) -> bool {
        let mut counts = self.counts.lock();
        let count = counts.entry(doc.id().to_string()).or_insert(0);
        *count += 1;
        *count > self.max_retries
    }

    fn remove(&self, doc: &Document) {
        self.counts.lock().remove(doc.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_after_threshold() {
        let counter = MemoryRetryCounter::new(2);
        let doc = Document::new("doc1").unwrap();
        assert!(!counter.add(&doc));
        assert!(!counter.add(&doc));
        assert!(counter.add(&doc));
    }

    #[test]
    fn remove_resets_the_count() {
        let counter = MemoryRetryCounter::new(1);
        let doc = Document::new("doc1").unwrap();
        assert!(!counter.add(&doc));
        counter.remove(&doc);
        assert!(!counter.add(&doc));
    }

    #[test]
    fn documents_are_tracked_independently() {
        let counter = MemoryRetryCounter::new(1);
        let a = Document::new("a").unwrap();
        let b = Document::new("b").unwrap();
        assert!(!counter.add(&a));
        assert!(!counter.add(&b));
        assert!(counter.add(&a));
    }
}
