//! In-memory loopback transport.
//!
//! [`LocalBroker`] stands in for the queue system during tests and
//! single-process runs: a source topic, a completed-documents topic, a
//! per-run event topic and a dead-letter store, all living in process memory.
//! Offsets are assigned per topic and exposed so the indexer can use them as
//! external versions.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::core::{DocflowError, Result};
use crate::document::Document;
use crate::event::Event;
use crate::message::{IndexerMessenger, PublisherMessenger, WorkerMessenger};

/// Default timeout applied to document and event polls.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// A notify-backed queue shared between producers and timed consumers.
struct Queue<T> {
    items: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> Queue<T> {
    fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    fn push(&self, item: T) {
        self.items.lock().push_back(item);
        self.notify.notify_one();
    }

    fn try_pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    async fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            let notified = self.notify.notified();
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_pop();
            }
        }
    }

    fn len(&self) -> usize {
        self.items.lock().len()
    }
}

struct Record {
    offset: u64,
    doc: Document,
}

struct BrokerState {
    pipeline_name: String,
    source: Queue<Record>,
    completed: Queue<Record>,
    dead_letter: Mutex<Vec<Document>>,
    events: Mutex<HashMap<String, Arc<Queue<Event>>>>,
    next_source_offset: AtomicU64,
    next_completed_offset: AtomicU64,
    poll_timeout: Duration,
}

impl BrokerState {
    fn event_queue(&self, run_id: &str) -> Arc<Queue<Event>> {
        let mut events = self.events.lock();
        events
            .entry(run_id.to_string())
            .or_insert_with(|| Arc::new(Queue::new()))
            .clone()
    }
}

/// The in-memory queue system backing a single pipeline.
///
/// Clone-cheap: all handles share the same topics.
#[derive(Clone)]
pub struct LocalBroker {
    state: Arc<BrokerState>,
}

impl LocalBroker {
    /// Creates a broker for the named pipeline with the default poll timeout.
    pub fn new(pipeline_name: impl Into<String>) -> Self {
        Self::with_poll_timeout(pipeline_name, DEFAULT_POLL_TIMEOUT)
    }

    /// Creates a broker with a custom poll timeout.
    pub fn with_poll_timeout(pipeline_name: impl Into<String>, poll_timeout: Duration) -> Self {
        Self {
            state: Arc::new(BrokerState {
                pipeline_name: pipeline_name.into(),
                source: Queue::new(),
                completed: Queue::new(),
                dead_letter: Mutex::new(Vec::new()),
                events: Mutex::new(HashMap::new()),
                next_source_offset: AtomicU64::new(0),
                next_completed_offset: AtomicU64::new(0),
                poll_timeout,
            }),
        }
    }

    /// The pipeline this broker serves.
    pub fn pipeline_name(&self) -> &str {
        &self.state.pipeline_name
    }

    /// Hands out a worker-side transport handle.
    pub fn worker_messenger(&self) -> LocalWorkerMessenger {
        LocalWorkerMessenger {
            state: Arc::clone(&self.state),
            uncommitted_offsets: Vec::new(),
        }
    }

    /// Hands out an indexer-side transport handle.
    pub fn indexer_messenger(&self) -> LocalIndexerMessenger {
        LocalIndexerMessenger {
            state: Arc::clone(&self.state),
            last_offset: None,
        }
    }

    /// Hands out a publisher-side transport handle.
    pub fn publisher_messenger(&self) -> LocalPublisherMessenger {
        LocalPublisherMessenger {
            state: Arc::clone(&self.state),
            run_id: None,
        }
    }

    /// Documents routed to the dead-letter destination so far.
    pub fn dead_letter_documents(&self) -> Vec<Document> {
        self.state.dead_letter.lock().clone()
    }

    /// True while undelivered events remain queued for the given run.
    pub fn events_in_flight(&self, run_id: &str) -> bool {
        self.state
            .events
            .lock()
            .get(run_id)
            .map(|q| q.len() > 0)
            .unwrap_or(false)
    }

    /// Number of documents waiting on the source topic.
    pub fn source_backlog(&self) -> usize {
        self.state.source.len()
    }

    /// Number of documents waiting on the completed topic.
    pub fn completed_backlog(&self) -> usize {
        self.state.completed.len()
    }
}

/// Worker-side handle onto a [`LocalBroker`].
pub struct LocalWorkerMessenger {
    state: Arc<BrokerState>,
    uncommitted_offsets: Vec<u64>,
}

#[async_trait]
impl WorkerMessenger for LocalWorkerMessenger {
    async fn poll_doc_to_process(&mut self) -> Result<Option<Document>> {
        match self.state.source.pop_timeout(self.state.poll_timeout).await {
            Some(record) => {
                self.uncommitted_offsets.push(record.offset);
                Ok(Some(record.doc))
            }
            None => Ok(None),
        }
    }

    async fn send_completed(&mut self, doc: &Document) -> Result<()> {
        let offset = self.state.next_completed_offset.fetch_add(1, Ordering::Relaxed);
        self.state.completed.push(Record {
            offset,
            doc: doc.clone(),
        });
        Ok(())
    }

    async fn send_event(&mut self, event: Event) -> Result<()> {
        self.state.event_queue(&event.run_id).push(event);
        Ok(())
    }

    async fn send_failed(&mut self, doc: &Document) -> Result<()> {
        self.state.dead_letter.lock().push(doc.clone());
        Ok(())
    }

    async fn commit_pending_doc_offsets(&mut self) -> Result<()> {
        // The loopback redelivers nothing, so committing is pure bookkeeping.
        self.uncommitted_offsets.clear();
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Indexer-side handle onto a [`LocalBroker`].
pub struct LocalIndexerMessenger {
    state: Arc<BrokerState>,
    last_offset: Option<u64>,
}

#[async_trait]
impl IndexerMessenger for LocalIndexerMessenger {
    async fn poll_completed(&mut self) -> Result<Option<Document>> {
        match self.state.completed.pop_timeout(self.state.poll_timeout).await {
            Some(record) => {
                self.last_offset = Some(record.offset);
                Ok(Some(record.doc))
            }
            None => Ok(None),
        }
    }

    fn last_offset(&self) -> Option<u64> {
        self.last_offset
    }

    async fn send_event(&mut self, event: Event) -> Result<()> {
        self.state.event_queue(&event.run_id).push(event);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Publisher-side handle onto a [`LocalBroker`].
pub struct LocalPublisherMessenger {
    state: Arc<BrokerState>,
    run_id: Option<String>,
}

#[async_trait]
impl PublisherMessenger for LocalPublisherMessenger {
    async fn initialize(&mut self, run_id: &str, pipeline_name: &str) -> Result<()> {
        if self.run_id.is_some() {
            return Err(DocflowError::messenger(
                "publisher messenger already initialized",
            ));
        }
        if pipeline_name != self.state.pipeline_name {
            return Err(DocflowError::messenger(format!(
                "broker serves pipeline '{}', not '{pipeline_name}'",
                self.state.pipeline_name
            )));
        }
        self.state.event_queue(run_id);
        self.run_id = Some(run_id.to_string());
        Ok(())
    }

    fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    async fn send_for_processing(&mut self, doc: &Document) -> Result<()> {
        let offset = self.state.next_source_offset.fetch_add(1, Ordering::Relaxed);
        self.state.source.push(Record {
            offset,
            doc: doc.clone(),
        });
        Ok(())
    }

    async fn poll_event(&mut self) -> Result<Option<Event>> {
        let run_id = self
            .run_id
            .as_deref()
            .ok_or_else(|| DocflowError::messenger("publisher messenger not initialized"))?;
        let queue = self.state.event_queue(run_id);
        Ok(queue.pop_timeout(self.state.poll_timeout).await)
    }

    async fn has_events_in_flight(&self) -> Result<bool> {
        let run_id = self
            .run_id
            .as_deref()
            .ok_or_else(|| DocflowError::messenger("publisher messenger not initialized"))?;
        Ok(self
            .state
            .events
            .lock()
            .get(run_id)
            .map(|q| q.len() > 0)
            .unwrap_or(false))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
