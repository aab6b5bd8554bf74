//! Workers: drain the source topic, run the pipeline, emit results.
//!
//! Each [`Worker`] owns its transport handle and its own [`Pipeline`]
//! instance; the retry counter is the only resource shared across a pool.
//! Per-document ordering contract: CREATE events for children are sent
//! *before* the parent (or any sibling) is forwarded to the completed topic,
//! so the publisher can never observe a parent's terminal event without
//! already knowing about its children.

mod retry;

pub use retry::{MemoryRetryCounter, RetryCounter};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::core::{DocflowError, Result};
use crate::document::Document;
use crate::event::{Event, EventType};
use crate::message::WorkerMessenger;
use crate::metrics::PipelineMetrics;
use crate::pipeline::Pipeline;

/// Message attached to the FAIL event of a dead-lettered document.
pub const SENT_TO_DLQ: &str = "SENT_TO_DLQ";
/// Message attached to the FINISH event of a dropped document.
pub const DROPPED: &str = "DROPPED";

const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(5);

enum Cycle {
    Continue,
    Stop,
}

/// Consumes source documents and drives them through the stage pipeline.
pub struct Worker<M: WorkerMessenger> {
    messenger: M,
    pipeline: Pipeline,
    running: Arc<AtomicBool>,
    retry_counter: Option<Arc<dyn RetryCounter>>,
    metrics: Arc<PipelineMetrics>,
    last_poll: Arc<Mutex<Instant>>,
}

impl<M: WorkerMessenger> Worker<M> {
    /// Creates a worker over its transport handle and pipeline instance.
    pub fn new(messenger: M, pipeline: Pipeline) -> Self {
        Self {
            messenger,
            pipeline,
            running: Arc::new(AtomicBool::new(true)),
            retry_counter: None,
            metrics: Arc::new(PipelineMetrics::new("worker")),
            last_poll: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Shares a stop flag with other workers in a pool.
    pub fn with_shared_stop(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = running;
        self
    }

    /// Enables retry tracking through the given counter.
    pub fn with_retry_counter(mut self, counter: Arc<dyn RetryCounter>) -> Self {
        self.retry_counter = Some(counter);
        self
    }

    /// Throughput counter for this worker.
    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Timestamp of the most recent poll, watched by the watchdog.
    pub fn last_poll_handle(&self) -> Arc<Mutex<Instant>> {
        Arc::clone(&self.last_poll)
    }

    /// Requests termination; the current document is allowed to finish.
    pub fn terminate(&self) {
        info!("worker terminate requested");
        self.running.store(false, Ordering::Release);
    }

    /// Runs until [`Self::terminate`] is called or a fatal condition stops
    /// this worker.
    pub async fn run(&mut self) -> Result<()> {
        let logger = PipelineMetrics::spawn_logger(self.metrics(), PROGRESS_LOG_INTERVAL);
        while self.running.load(Ordering::Acquire) {
            if let Cycle::Stop = self.cycle().await {
                break;
            }
        }
        logger.abort();
        self.shutdown().await;
        Ok(())
    }

    /// Processes exactly `n` poll cycles, then shuts down. Test hook.
    pub async fn run_cycles(&mut self, n: usize) -> Result<()> {
        for _ in 0..n {
            if let Cycle::Stop = self.cycle().await {
                break;
            }
        }
        self.shutdown().await;
        Ok(())
    }

    async fn cycle(&mut self) -> Cycle {
        *self.last_poll.lock() = Instant::now();
        let doc = match self.messenger.poll_doc_to_process().await {
            Ok(doc) => doc,
            Err(err) => {
                warn!(error = %err, "poll interrupted, terminating worker");
                return Cycle::Stop;
            }
        };
        let Some(mut doc) = doc else {
            return Cycle::Continue;
        };

        if let Some(counter) = self.retry_counter.clone() {
            if counter.add(&doc) {
                info!(doc_id = %doc.id(), "retry count exceeded, sending to dead-letter destination");
                if let Err(err) = self.messenger.send_failed(&doc).await {
                    error!(doc_id = %doc.id(), error = %err, "failed to send document to dead-letter destination");
                }
                let event = Event::new(doc.id(), doc.run_id().unwrap_or_default(), EventType::Fail)
                    .with_message(SENT_TO_DLQ);
                if let Err(err) = self.messenger.send_event(event).await {
                    error!(doc_id = %doc.id(), error = %err, "failed to send dead-letter event");
                }
                self.commit_and_clear(&doc).await;
                return Cycle::Continue;
            }
        }

        let children = match self.pipeline.process_document(&mut doc) {
            Ok(children) => {
                self.metrics.mark();
                children
            }
            Err(err) => {
                error!(doc_id = %doc.id(), error = %err, "error processing document");
                let event = Event::new(doc.id(), doc.run_id().unwrap_or_default(), EventType::Fail)
                    .with_message(err.to_string());
                if let Err(err2) = self.messenger.send_event(event).await {
                    error!(doc_id = %doc.id(), error = %err2, "failed to send failure event");
                }
                // Offsets are committed but the retry count is kept: if the
                // transport redelivers this document, the counter is what
                // eventually routes it to the dead-letter destination.
                self.commit_offsets().await;
                // The run continues via other workers; this one has crashed.
                return Cycle::Stop;
            }
        };

        if let Err(err) = self.forward_results(&doc, children).await {
            error!(doc_id = %doc.id(), error = %err, "messaging error after processing document");
        }

        self.commit_and_clear(&doc).await;
        Cycle::Continue
    }

    /// Announces children, then forwards the parent and children onward.
    async fn forward_results(&mut self, doc: &Document, mut children: Vec<Document>) -> Result<()> {
        let run_id = doc.run_id().unwrap_or_default().to_string();

        // CREATE for each child first: the publisher must know about children
        // before the parent can reach a terminal state. Children inherit the
        // parent's run association, or the indexer could never resolve them.
        for child in &mut children {
            if child.id() != doc.id() {
                self.messenger
                    .send_event(Event::new(child.id(), &run_id, EventType::Create))
                    .await?;
            }
            if child.run_id().is_none() && !run_id.is_empty() {
                child.initialize_run_id(&run_id)?;
            }
        }

        for result in std::iter::once(doc).chain(children.iter()) {
            if result.is_dropped() {
                // Dropped documents never reach the indexer, so their FINISH
                // is emitted here to keep the publisher's accounting sound.
                self.messenger
                    .send_event(
                        Event::new(result.id(), &run_id, EventType::Finish).with_message(DROPPED),
                    )
                    .await?;
            } else {
                self.messenger.send_completed(result).await?;
            }
        }
        Ok(())
    }

    async fn commit_offsets(&mut self) {
        if let Err(err) = self.messenger.commit_pending_doc_offsets().await {
            error!(error = %err, "error committing offsets for pending documents");
        }
    }

    async fn commit_and_clear(&mut self, doc: &Document) {
        self.commit_offsets().await;
        if let Some(counter) = &self.retry_counter {
            counter.remove(doc);
        }
    }

    async fn shutdown(&mut self) {
        if let Err(err) = self.messenger.close().await {
            error!(error = %err, "error closing worker messenger");
        }
        if let Err(err) = self.pipeline.stop_stages() {
            error!(error = %err, "error stopping pipeline stages");
        }
        info!("worker exiting");
    }
}

/// Force-exits the process when the time since the last poll exceeds
/// `max_between_polls`, the signature of a stuck stage.
pub fn spawn_watchdog(
    last_poll: Arc<Mutex<Instant>>,
    max_between_polls: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            let elapsed = last_poll.lock().elapsed();
            if elapsed > max_between_polls {
                error!(
                    elapsed_secs = elapsed.as_secs(),
                    "maximum allowed time between polls exceeded, shutting down"
                );
                std::process::exit(1);
            }
        }
    })
}

/// A set of workers sharing one stop flag and one retry counter.
pub struct WorkerPool {
    running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<Result<()>>>,
}

impl WorkerPool {
    /// Starts `num_workers` workers produced by `make_worker`.
    ///
    /// The factory receives the shared stop flag and returns a ready-to-run
    /// worker (transport handle plus its own pipeline instance).
    pub fn start<M, F>(num_workers: usize, mut make_worker: F) -> Result<Self>
    where
        M: WorkerMessenger + 'static,
        F: FnMut(Arc<AtomicBool>) -> Result<Worker<M>>,
    {
        let running = Arc::new(AtomicBool::new(true));
        let mut handles = Vec::with_capacity(num_workers);
        for _ in 0..num_workers {
            let mut worker = make_worker(Arc::clone(&running))?;
            handles.push(tokio::spawn(async move { worker.run().await }));
        }
        info!(workers = num_workers, "worker pool started");
        Ok(Self { running, handles })
    }

    /// Signals every worker to stop after its current document.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Awaits every worker task.
    pub async fn join(self) -> Result<()> {
        for handle in self.handles {
            match handle.await {
                Ok(result) => result?,
                Err(err) => {
                    return Err(DocflowError::Pipeline {
                        message: format!("worker task panicked: {err}"),
                    })
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{IndexerMessenger, LocalBroker, PublisherMessenger};
    use crate::stage::{ConfiguredStage, Stage, StageError};

    struct EmitChild {
        child_id: String,
    }

    impl Stage for EmitChild {
        fn name(&self) -> &str {
            "emit-child"
        }

        fn process_document(
            &mut self,
            _doc: &mut Document,
        ) -> std::result::Result<Vec<Document>, StageError> {
            Ok(vec![Document::new(self.child_id.clone())
                .map_err(|e| StageError::new("emit-child", e.to_string()))?])
        }
    }

    struct AlwaysFail;

    impl Stage for AlwaysFail {
        fn name(&self) -> &str {
            "always-fail"
        }

        fn process_document(
            &mut self,
            _doc: &mut Document,
        ) -> std::result::Result<Vec<Document>, StageError> {
            Err(StageError::new("always-fail", "boom"))
        }
    }

    struct MarkDropped;

    impl Stage for MarkDropped {
        fn name(&self) -> &str {
            "drop"
        }

        fn process_document(
            &mut self,
            doc: &mut Document,
        ) -> std::result::Result<Vec<Document>, StageError> {
            doc.set_dropped(true);
            Ok(Vec::new())
        }
    }

    fn pipeline_with(stage: impl Stage + 'static) -> Pipeline {
        let mut pipeline = Pipeline::new("test");
        pipeline.add_stage(ConfiguredStage::new(Box::new(stage), Vec::new()));
        pipeline
    }

    async fn publish(broker: &LocalBroker, run_id: &str, doc: Document) {
        let mut publisher = broker.publisher_messenger();
        publisher.initialize(run_id, broker.pipeline_name()).await.unwrap();
        let mut doc = doc;
        doc.initialize_run_id(run_id).unwrap();
        publisher.send_for_processing(&doc).await.unwrap();
    }

    async fn drain_events(broker: &LocalBroker, run_id: &str) -> Vec<Event> {
        let mut publisher = broker.publisher_messenger();
        // A fresh messenger for the same run shares the queue.
        let state_run = run_id.to_string();
        publisher.initialize(&state_run, broker.pipeline_name()).await.ok();
        let mut events = Vec::new();
        while let Some(event) = publisher.poll_event().await.unwrap() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn happy_path_forwards_to_completed_topic() {
        let broker = LocalBroker::new("p");
        publish(&broker, "run1", Document::new("doc1").unwrap()).await;

        let mut worker = Worker::new(broker.worker_messenger(), Pipeline::new("p"));
        worker.run_cycles(1).await.unwrap();

        assert_eq!(broker.completed_backlog(), 1);
        let mut indexer = broker.indexer_messenger();
        let forwarded = indexer.poll_completed().await.unwrap().unwrap();
        assert_eq!(forwarded.id(), "doc1");
        assert_eq!(forwarded.run_id(), Some("run1"));
        assert_eq!(worker.metrics().count(), 1);
    }

    #[tokio::test]
    async fn children_are_announced_before_completion() {
        let broker = LocalBroker::new("p");
        publish(&broker, "run1", Document::new("parent").unwrap()).await;

        let mut worker = Worker::new(
            broker.worker_messenger(),
            pipeline_with(EmitChild {
                child_id: "child1".into(),
            }),
        );
        worker.run_cycles(1).await.unwrap();

        // CREATE(child1) must already be queued...
        let events = drain_events(&broker, "run1").await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Create);
        assert_eq!(events[0].document_id, "child1");

        // ...and both parent and child reached the completed topic.
        assert_eq!(broker.completed_backlog(), 2);
    }

    #[tokio::test]
    async fn dropped_documents_finish_without_forwarding() {
        let broker = LocalBroker::new("p");
        publish(&broker, "run1", Document::new("doc1").unwrap()).await;

        let mut worker = Worker::new(broker.worker_messenger(), pipeline_with(MarkDropped));
        worker.run_cycles(1).await.unwrap();

        assert_eq!(broker.completed_backlog(), 0);
        let events = drain_events(&broker, "run1").await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Finish);
        assert_eq!(events[0].message.as_deref(), Some(DROPPED));
    }

    #[tokio::test]
    async fn stage_failure_emits_fail_and_stops_the_worker() {
        let broker = LocalBroker::new("p");
        publish(&broker, "run1", Document::new("doc1").unwrap()).await;
        publish(&broker, "run1", Document::new("doc2").unwrap()).await;

        let mut worker = Worker::new(broker.worker_messenger(), pipeline_with(AlwaysFail));
        // Ask for two cycles; the first failure must stop the worker early.
        worker.run_cycles(2).await.unwrap();

        let events = drain_events(&broker, "run1").await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Fail);
        assert_eq!(events[0].document_id, "doc1");
        // The second document was never polled.
        assert_eq!(broker.source_backlog(), 1);
    }

    #[tokio::test]
    async fn retry_exhaustion_routes_to_dead_letter_once() {
        let broker = LocalBroker::new("p");
        let counter: Arc<dyn RetryCounter> = Arc::new(MemoryRetryCounter::new(2));

        // The same document delivered three times: two processing attempts
        // (each crashing a worker), then dead-letter on the third delivery.
        for _ in 0..3 {
            publish(&broker, "run1", Document::new("poison").unwrap()).await;
        }
        for _ in 0..3 {
            let mut worker = Worker::new(broker.worker_messenger(), pipeline_with(AlwaysFail))
                .with_retry_counter(Arc::clone(&counter));
            worker.run_cycles(1).await.unwrap();
        }

        let dead = broker.dead_letter_documents();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].id(), "poison");

        let events = drain_events(&broker, "run1").await;
        let dlq_fails: Vec<_> = events
            .iter()
            .filter(|e| {
                e.event_type == EventType::Fail
                    && e.message.as_deref().is_some_and(|m| m.contains(SENT_TO_DLQ))
            })
            .collect();
        assert_eq!(dlq_fails.len(), 1);
    }

    #[tokio::test]
    async fn worker_pool_stops_and_joins() {
        let broker = LocalBroker::new("p");
        publish(&broker, "run1", Document::new("doc1").unwrap()).await;

        let pool = WorkerPool::start(2, |running| {
            Ok(Worker::new(broker.worker_messenger(), Pipeline::new("p"))
                .with_shared_stop(running))
        })
        .unwrap();

        // Give the pool a moment to drain the source topic.
        tokio::time::sleep(Duration::from_millis(100)).await;
        pool.stop();
        pool.join().await.unwrap();
        assert_eq!(broker.completed_backlog(), 1);
    }
}
