//! The search-sink seam.
//!
//! Concrete search-engine clients live outside the core; the indexer talks
//! to a [`IndexSink`] trait object. [`MemorySink`] backs tests and local
//! runs, with injectable transport and per-document failures.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::{DocflowError, Result};
use crate::document::Document;

/// One document headed for the sink, with optional routing and versioning.
#[derive(Debug, Clone)]
pub struct IndexRequest {
    /// The document to index.
    pub doc: Document,
    /// Sink routing key, taken from the configured routing field.
    pub routing: Option<String>,
    /// External monotonic version (the source-transport offset), letting the
    /// sink reject out-of-order overwrites.
    pub version: Option<u64>,
}

impl IndexRequest {
    /// Wraps a document with no routing or versioning.
    pub fn new(doc: Document) -> Self {
        Self {
            doc,
            routing: None,
            version: None,
        }
    }
}

/// Per-document result of a bulk call.
#[derive(Debug, Clone)]
pub struct IndexOutcome {
    /// Id of the document the outcome concerns.
    pub doc_id: String,
    /// Sink-reported error, when the document was rejected.
    pub error: Option<String>,
}

impl IndexOutcome {
    /// A successful outcome.
    pub fn ok(doc_id: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            error: None,
        }
    }

    /// A per-document failure.
    pub fn failed(doc_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            error: Some(error.into()),
        }
    }

    /// True when the sink accepted the document.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// A destination search engine.
#[async_trait]
pub trait IndexSink: Send + Sync {
    /// Checks that the sink is reachable. Called before processing begins.
    async fn validate_connection(&self) -> Result<()>;

    /// Ships a batch in a single bulk call.
    ///
    /// `Err` signals a transport-level failure for the whole batch. `Ok`
    /// carries one outcome per request, in request order; individual
    /// rejections are reported there.
    async fn bulk_index(&self, requests: &[IndexRequest]) -> Result<Vec<IndexOutcome>>;
}

#[derive(Default)]
struct MemorySinkState {
    indexed: Mutex<Vec<IndexRequest>>,
    fail_doc_ids: Mutex<HashSet<String>>,
    fail_transport: AtomicBool,
    connection_failures: AtomicU32,
    bulk_calls: AtomicU64,
}

/// In-memory sink for tests and local runs.
///
/// Clone-cheap: all handles observe the same captured requests.
#[derive(Clone, Default)]
pub struct MemorySink {
    state: Arc<MemorySinkState>,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request accepted so far, in arrival order.
    pub fn indexed_requests(&self) -> Vec<IndexRequest> {
        self.state.indexed.lock().clone()
    }

    /// Ids of every accepted document, in arrival order.
    pub fn indexed_ids(&self) -> Vec<String> {
        self.state
            .indexed
            .lock()
            .iter()
            .map(|r| r.doc.id().to_string())
            .collect()
    }

    /// Number of bulk calls received.
    pub fn bulk_calls(&self) -> u64 {
        self.state.bulk_calls.load(Ordering::Relaxed)
    }

    /// Makes every bulk call fail at the transport level.
    pub fn set_transport_failure(&self, fail: bool) {
        self.state.fail_transport.store(fail, Ordering::Relaxed);
    }

    /// Makes the sink reject the given document id.
    pub fn fail_document(&self, doc_id: impl Into<String>) {
        self.state.fail_doc_ids.lock().insert(doc_id.into());
    }

    /// Makes the next `n` connection validations fail.
    pub fn set_connection_failures(&self, n: u32) {
        self.state.connection_failures.store(n, Ordering::Relaxed);
    }
}

#[async_trait]
impl IndexSink for MemorySink {
    async fn validate_connection(&self) -> Result<()> {
        let remaining = self.state.connection_failures.load(Ordering::Relaxed);
        if remaining > 0 {
            self.state
                .connection_failures
                .store(remaining - 1, Ordering::Relaxed);
            return Err(DocflowError::indexer("sink connection refused"));
        }
        Ok(())
    }

    async fn bulk_index(&self, requests: &[IndexRequest]) -> Result<Vec<IndexOutcome>> {
        self.state.bulk_calls.fetch_add(1, Ordering::Relaxed);
        if self.state.fail_transport.load(Ordering::Relaxed) {
            return Err(DocflowError::indexer("sink unavailable"));
        }
        let fail_ids = self.state.fail_doc_ids.lock();
        let mut outcomes = Vec::with_capacity(requests.len());
        let mut accepted = self.state.indexed.lock();
        for request in requests {
            let id = request.doc.id();
            if fail_ids.contains(id) {
                outcomes.push(IndexOutcome::failed(id, format!("sink rejected '{id}'")));
            } else {
                accepted.push(request.clone());
                outcomes.push(IndexOutcome::ok(id));
            }
        }
        Ok(outcomes)
    }
}
