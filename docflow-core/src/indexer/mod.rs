//! The indexer: batches completed documents toward the search sink.
//!
//! One indexer task runs per pipeline. It polls the completed-documents
//! topic, accumulates a [`Batch`], ships it to the [`IndexSink`] in bulk
//! calls, and emits a terminal FINISH or FAIL event for every document. The
//! indexer never retries a batch: redelivery is the retry counter's job
//! upstream.

mod batch;
mod sink;

pub use batch::Batch;
pub use sink::{IndexOutcome, IndexRequest, IndexSink, MemorySink};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::IndexerSettings;
use crate::core::{DocflowError, Result};
use crate::event::{Event, EventType};
use crate::message::IndexerMessenger;
use crate::metrics::PipelineMetrics;

const VALIDATE_ATTEMPTS: u32 = 3;
const VALIDATE_RETRY_DELAY: Duration = Duration::from_millis(100);

enum Cycle {
    Continue,
    Stop,
}

/// Consumes completed documents and ships them to the sink in batches.
pub struct Indexer<M: IndexerMessenger, S: IndexSink> {
    messenger: M,
    sink: S,
    batch: Batch,
    running: Arc<AtomicBool>,
    routing_field: Option<String>,
    versioning: bool,
    metrics: Arc<PipelineMetrics>,
}

impl<M: IndexerMessenger, S: IndexSink> Indexer<M, S> {
    /// Creates an indexer from its transport handle, sink and settings.
    pub fn new(messenger: M, sink: S, settings: &IndexerSettings) -> Self {
        Self {
            messenger,
            sink,
            batch: Batch::new(
                settings.batch_size,
                Duration::from_millis(settings.batch_timeout),
            ),
            running: Arc::new(AtomicBool::new(true)),
            routing_field: settings.routing_field.clone(),
            versioning: settings.versioning,
            metrics: Arc::new(PipelineMetrics::new("indexer")),
        }
    }

    /// Shares a stop flag with the surrounding run.
    pub fn with_shared_stop(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = running;
        self
    }

    /// Throughput counter for this indexer.
    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Requests termination; the current batch is flushed on the way out.
    pub fn terminate(&self) {
        info!("indexer terminate requested");
        self.running.store(false, Ordering::Release);
    }

    /// Checks sink reachability, retrying a few times.
    ///
    /// Repeated failures are terminal: the error propagates and the indexer
    /// never starts processing.
    pub async fn validate_connection(&self) -> Result<()> {
        let mut last_error = None;
        for attempt in 1..=VALIDATE_ATTEMPTS {
            match self.sink.validate_connection().await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(attempt, error = %err, "sink connection validation failed");
                    last_error = Some(err);
                }
            }
            if attempt < VALIDATE_ATTEMPTS {
                tokio::time::sleep(VALIDATE_RETRY_DELAY).await;
            }
        }
        Err(last_error
            .unwrap_or_else(|| DocflowError::indexer("sink connection validation failed")))
    }

    /// Runs until [`Self::terminate`] is called.
    pub async fn run(&mut self) -> Result<()> {
        self.validate_connection().await?;
        while self.running.load(Ordering::Acquire) {
            if let Cycle::Stop = self.check_for_doc().await {
                break;
            }
        }
        self.drain().await;
        Ok(())
    }

    /// Processes exactly `n` poll cycles, then flushes and closes. Test hook.
    pub async fn run_cycles(&mut self, n: usize) -> Result<()> {
        for _ in 0..n {
            if let Cycle::Stop = self.check_for_doc().await {
                break;
            }
        }
        self.drain().await;
        Ok(())
    }

    async fn drain(&mut self) {
        let remainder = self.batch.flush();
        if let Err(err) = self.send_batch(remainder).await {
            error!(error = %err, "error flushing final batch");
        }
        if let Err(err) = self.messenger.close().await {
            error!(error = %err, "error closing indexer messenger");
        }
        info!("indexer exiting");
    }

    async fn check_for_doc(&mut self) -> Cycle {
        let doc = match self.messenger.poll_completed().await {
            Ok(doc) => doc,
            Err(err) => {
                warn!(error = %err, "poll interrupted, terminating indexer");
                return Cycle::Stop;
            }
        };

        let ready = match doc {
            None => self.batch.add(None),
            Some(doc) => {
                if doc.run_id().is_none() {
                    // Not part of a run: nothing to reconcile, nothing to ship.
                    return Cycle::Continue;
                }
                let mut request = IndexRequest::new(doc);
                if let Some(field) = &self.routing_field {
                    request.routing = request.doc.get_string(field);
                }
                if self.versioning {
                    request.version = self.messenger.last_offset();
                }
                self.batch.add(Some(request))
            }
        };

        if let Err(err) = self.send_batch(ready).await {
            error!(error = %err, "batch indexing reported failures");
        }
        Cycle::Continue
    }

    /// Ships one batch and emits a terminal event per document.
    ///
    /// Transport failure fails the whole batch; per-document rejections fail
    /// individually and surface as an indexer error carrying the first cause.
    async fn send_batch(&mut self, requests: Vec<IndexRequest>) -> Result<()> {
        if requests.is_empty() {
            return Ok(());
        }

        let outcomes = match self.sink.bulk_index(&requests).await {
            Ok(outcomes) => outcomes,
            Err(err) => {
                error!(batch_size = requests.len(), error = %err, "bulk call failed");
                for request in &requests {
                    let event = Event::new(
                        request.doc.id(),
                        request.doc.run_id().unwrap_or_default(),
                        EventType::Fail,
                    )
                    .with_message(format!("FAILED: {err}"));
                    if let Err(err2) = self.messenger.send_event(event).await {
                        error!(doc_id = %request.doc.id(), error = %err2, "failed to send failure event");
                    }
                }
                return Ok(());
            }
        };

        let mut first_error: Option<String> = None;
        for (request, outcome) in requests.iter().zip(outcomes) {
            let run_id = request.doc.run_id().unwrap_or_default();
            let event = match outcome.error {
                Some(cause) => {
                    if first_error.is_none() {
                        first_error = Some(cause.clone());
                    }
                    Event::new(request.doc.id(), run_id, EventType::Fail).with_message(cause)
                }
                None => {
                    self.metrics.mark();
                    Event::new(request.doc.id(), run_id, EventType::Finish)
                        .with_message("SUCCEEDED")
                }
            };
            if let Err(err) = self.messenger.send_event(event).await {
                error!(doc_id = %request.doc.id(), error = %err, "failed to send completion event");
            }
        }

        match first_error {
            Some(cause) => Err(DocflowError::indexer(cause)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::message::{LocalBroker, PublisherMessenger, WorkerMessenger};

    fn settings(batch_size: usize, batch_timeout: u64) -> IndexerSettings {
        IndexerSettings {
            batch_size,
            batch_timeout,
            ..IndexerSettings::default()
        }
    }

    async fn send_completed(broker: &LocalBroker, ids: &[&str]) {
        let mut worker = broker.worker_messenger();
        for id in ids {
            let doc = Document::new_with_run_id(*id, "run1").unwrap();
            worker.send_completed(&doc).await.unwrap();
        }
    }

    async fn drain_events(broker: &LocalBroker) -> Vec<Event> {
        let mut publisher = broker.publisher_messenger();
        publisher.initialize("run1", broker.pipeline_name()).await.unwrap();
        let mut events = Vec::new();
        while let Some(event) = publisher.poll_event().await.unwrap() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn indexes_and_emits_finish_per_document() {
        let broker = LocalBroker::new("p");
        send_completed(&broker, &["doc1", "doc2"]).await;

        let sink = MemorySink::new();
        let mut indexer = Indexer::new(broker.indexer_messenger(), sink.clone(), &settings(2, 100));
        indexer.run_cycles(2).await.unwrap();

        assert_eq!(sink.indexed_ids(), vec!["doc1", "doc2"]);
        let events = drain_events(&broker).await;
        assert_eq!(events.len(), 2);
        for (i, event) in events.iter().enumerate() {
            assert_eq!(event.document_id, format!("doc{}", i + 1));
            assert_eq!(event.event_type, EventType::Finish);
        }
    }

    #[tokio::test]
    async fn transport_failure_fails_every_document_without_retry() {
        let broker = LocalBroker::new("p");
        send_completed(&broker, &["doc1", "doc2"]).await;

        let sink = MemorySink::new();
        sink.set_transport_failure(true);
        let mut indexer = Indexer::new(broker.indexer_messenger(), sink.clone(), &settings(2, 100));
        indexer.run_cycles(2).await.unwrap();

        assert_eq!(sink.bulk_calls(), 1);
        let events = drain_events(&broker).await;
        assert_eq!(events.len(), 2);
        for event in &events {
            assert_eq!(event.event_type, EventType::Fail);
            assert!(event.message.as_deref().unwrap().starts_with("FAILED"));
        }
    }

    #[tokio::test]
    async fn partial_failure_splits_outcomes() {
        let broker = LocalBroker::new("p");
        send_completed(&broker, &["good", "bad"]).await;

        let sink = MemorySink::new();
        sink.fail_document("bad");
        let mut indexer = Indexer::new(broker.indexer_messenger(), sink.clone(), &settings(2, 100));
        indexer.run_cycles(2).await.unwrap();

        assert_eq!(sink.indexed_ids(), vec!["good"]);
        let events = drain_events(&broker).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].document_id, "good");
        assert_eq!(events[0].event_type, EventType::Finish);
        assert_eq!(events[1].document_id, "bad");
        assert_eq!(events[1].event_type, EventType::Fail);
    }

    #[tokio::test]
    async fn documents_without_run_id_are_skipped() {
        let broker = LocalBroker::new("p");
        let mut worker = broker.worker_messenger();
        worker
            .send_completed(&Document::new("orphan").unwrap())
            .await
            .unwrap();

        let sink = MemorySink::new();
        let mut indexer = Indexer::new(broker.indexer_messenger(), sink.clone(), &settings(1, 100));
        indexer.run_cycles(1).await.unwrap();

        assert!(sink.indexed_ids().is_empty());
        assert!(!broker.events_in_flight("run1"));
    }

    #[tokio::test]
    async fn routing_field_becomes_the_routing_key() {
        let broker = LocalBroker::new("p");
        let mut worker = broker.worker_messenger();
        let mut doc = Document::new_with_run_id("doc1", "run1").unwrap();
        doc.set_field("tenant", "acme").unwrap();
        worker.send_completed(&doc).await.unwrap();

        let sink = MemorySink::new();
        let mut indexer_settings = settings(1, 100);
        indexer_settings.routing_field = Some("tenant".to_string());
        let mut indexer = Indexer::new(
            broker.indexer_messenger(),
            sink.clone(),
            &indexer_settings,
        );
        indexer.run_cycles(1).await.unwrap();

        let requests = sink.indexed_requests();
        assert_eq!(requests[0].routing.as_deref(), Some("acme"));
    }

    #[tokio::test]
    async fn versioning_attaches_monotonic_offsets() {
        let broker = LocalBroker::new("p");
        send_completed(&broker, &["doc1", "doc2"]).await;

        let sink = MemorySink::new();
        let mut indexer_settings = settings(1, 100);
        indexer_settings.versioning = true;
        let mut indexer = Indexer::new(
            broker.indexer_messenger(),
            sink.clone(),
            &indexer_settings,
        );
        indexer.run_cycles(2).await.unwrap();

        let requests = sink.indexed_requests();
        let versions: Vec<u64> = requests.iter().map(|r| r.version.unwrap()).collect();
        assert_eq!(versions.len(), 2);
        assert!(versions[1] > versions[0]);
    }

    #[tokio::test]
    async fn repeated_validation_failures_are_terminal() {
        let broker = LocalBroker::new("p");
        let sink = MemorySink::new();
        sink.set_connection_failures(10);
        let mut indexer = Indexer::new(broker.indexer_messenger(), sink, &settings(1, 100));
        assert!(indexer.run().await.is_err());
    }

    #[tokio::test]
    async fn shutdown_flushes_the_partial_batch() {
        let broker = LocalBroker::new("p");
        send_completed(&broker, &["doc1"]).await;

        let sink = MemorySink::new();
        // Capacity 100: the document sits in the batch until shutdown.
        let mut indexer = Indexer::new(broker.indexer_messenger(), sink.clone(), &settings(100, 60_000));
        indexer.run_cycles(1).await.unwrap();

        assert_eq!(sink.indexed_ids(), vec!["doc1"]);
    }
}
