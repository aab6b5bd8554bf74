//! The runner: executes connectors and waits for the run to reconcile.
//!
//! A run is a sequential execution of one or more connectors under a single
//! generated run id. Each connector's work, every document it emitted plus
//! every child discovered mid-flight, must reach a terminal state before the
//! next connector begins. A run is complete iff the connector has finished
//! emitting, the publisher's pending counters are all resolved, and the
//! transport reports no more events for the run. All three are required: a
//! connector may still be publishing while `pending` is transiently zero,
//! and a counter can sit at zero between a publish and the delivery of the
//! corresponding CREATE.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{error, info};
use uuid::Uuid;

use crate::config::Settings;
use crate::connector::{Connector, DocumentFeed};
use crate::core::{DocflowError, Result};
use crate::indexer::{IndexSink, Indexer};
use crate::message::{LocalBroker, PublisherMessenger};
use crate::pipeline::Pipeline;
use crate::publisher::Publisher;
use crate::worker::{MemoryRetryCounter, RetryCounter, Worker, WorkerPool};

const CONNECTOR_CHANNEL_CAPACITY: usize = 128;

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// The generated run id.
    pub run_id: String,
    /// Documents published by connectors.
    pub num_published: u64,
    /// Documents that reached FINISH.
    pub num_succeeded: u64,
    /// Documents that reached FAIL.
    pub num_failed: u64,
    /// Failures reported by connectors themselves.
    pub connector_errors: Vec<String>,
}

impl RunResult {
    /// True when any document failed or any connector errored.
    ///
    /// The CLI maps this to a non-zero exit code.
    pub fn has_failures(&self) -> bool {
        self.num_failed > 0 || !self.connector_errors.is_empty()
    }
}

/// Coordinates a single run. Not reusable across runs.
pub struct Runner {
    run_id: String,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    /// Creates a runner with a freshly generated run id.
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
        }
    }

    /// Creates a runner with a fixed run id. Test hook.
    pub fn with_run_id(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
        }
    }

    /// The id of the current run.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Runs every connector in order, waiting for full reconciliation of
    /// each before starting the next, and returns the aggregated result.
    pub async fn run_connectors<M: PublisherMessenger>(
        &self,
        connectors: Vec<Box<dyn Connector>>,
        messenger: M,
        pipeline_name: &str,
    ) -> Result<RunResult> {
        let mut publisher = Publisher::start(messenger, &self.run_id, pipeline_name).await?;
        let mut connector_errors = Vec::new();

        for connector in connectors {
            let name = connector.name().to_string();
            info!(run_id = %self.run_id, connector = %name, "running connector");
            if let Some(failure) = self.run_connector(&mut publisher, connector).await? {
                error!(connector = %name, error = %failure, "connector failed");
                connector_errors.push(format!("{name}: {failure}"));
            }
        }

        publisher.close().await?;
        let result = RunResult {
            run_id: self.run_id.clone(),
            num_published: publisher.num_published(),
            num_succeeded: publisher.num_succeeded(),
            num_failed: publisher.num_failed(),
            connector_errors,
        };
        info!(
            run_id = %result.run_id,
            published = result.num_published,
            succeeded = result.num_succeeded,
            failed = result.num_failed,
            "run complete"
        );
        Ok(result)
    }

    /// Drives one connector to completion and reconciliation.
    ///
    /// Returns the connector's own failure, if any; documents it managed to
    /// emit before failing are still reconciled.
    async fn run_connector<M: PublisherMessenger>(
        &self,
        publisher: &mut Publisher<M>,
        mut connector: Box<dyn Connector>,
    ) -> Result<Option<String>> {
        let (tx, mut rx) = mpsc::channel(CONNECTOR_CHANNEL_CAPACITY);
        let handle = tokio::spawn(async move {
            let feed = DocumentFeed::new(tx);
            connector.feed(&feed).await
        });

        let mut connector_done = false;
        loop {
            loop {
                match rx.try_recv() {
                    Ok(doc) => publisher.publish(doc).await?,
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        connector_done = true;
                        break;
                    }
                }
            }

            if connector_done
                && publisher.is_reconciled()
                && !publisher.has_events_in_flight().await?
            {
                break;
            }

            if let Some(event) = publisher.poll_event().await? {
                publisher.handle_event(&event);
            }
        }

        match handle.await {
            Ok(Ok(())) => Ok(None),
            Ok(Err(err)) => Ok(Some(err.to_string())),
            Err(err) => Ok(Some(format!("connector task panicked: {err}"))),
        }
    }
}

/// Executes a full run in-process over the loopback transport.
///
/// Starts a worker pool and an indexer against a fresh [`LocalBroker`], runs
/// the connectors, then stops both once the run reconciles.
pub async fn run_local<S>(
    settings: &Settings,
    connectors: Vec<Box<dyn Connector>>,
    sink: S,
) -> Result<RunResult>
where
    S: IndexSink + 'static,
{
    let pipeline_name = settings
        .worker
        .pipeline
        .clone()
        .ok_or_else(|| DocflowError::config("worker.pipeline is required"))?;

    let broker = LocalBroker::new(&pipeline_name);
    let retry_counter: Option<Arc<dyn RetryCounter>> = settings
        .worker
        .max_retries
        .map(|max| Arc::new(MemoryRetryCounter::new(max)) as Arc<dyn RetryCounter>);

    let pool = WorkerPool::start(settings.worker.threads, |running| {
        let pipeline = Pipeline::from_config(settings, &pipeline_name)?;
        let mut worker =
            Worker::new(broker.worker_messenger(), pipeline).with_shared_stop(running);
        if let Some(counter) = &retry_counter {
            worker = worker.with_retry_counter(Arc::clone(counter));
        }
        Ok(worker)
    })?;

    let indexer_running = Arc::new(AtomicBool::new(true));
    let mut indexer = Indexer::new(broker.indexer_messenger(), sink, &settings.indexer)
        .with_shared_stop(Arc::clone(&indexer_running));
    let indexer_handle = tokio::spawn(async move { indexer.run().await });

    let runner = Runner::new();
    let run_result = runner
        .run_connectors(connectors, broker.publisher_messenger(), &pipeline_name)
        .await;

    pool.stop();
    pool.join().await?;
    indexer_running.store(false, Ordering::Release);
    match indexer_handle.await {
        Ok(result) => result?,
        Err(err) => {
            return Err(DocflowError::Pipeline {
                message: format!("indexer task panicked: {err}"),
            })
        }
    }

    run_result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::DocumentFeed;
    use crate::document::Document;
    use crate::indexer::MemorySink;
    use async_trait::async_trait;

    struct StaticConnector {
        docs: Vec<Document>,
    }

    #[async_trait]
    impl Connector for StaticConnector {
        fn name(&self) -> &str {
            "static"
        }

        async fn feed(&mut self, feed: &DocumentFeed) -> Result<()> {
            for doc in self.docs.drain(..) {
                feed.accept(doc).await?;
            }
            Ok(())
        }
    }

    struct FailingConnector;

    #[async_trait]
    impl Connector for FailingConnector {
        fn name(&self) -> &str {
            "failing"
        }

        async fn feed(&mut self, _feed: &DocumentFeed) -> Result<()> {
            Err(DocflowError::Connector {
                name: "failing".into(),
                message: "source unavailable".into(),
            })
        }
    }

    fn settings() -> Settings {
        Settings::from_toml_str(
            r#"
            [worker]
            pipeline = "passthrough"

            [[pipelines]]
            name = "passthrough"
            "#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn empty_run_reconciles_immediately() {
        let result = run_local(&settings(), Vec::new(), MemorySink::new())
            .await
            .unwrap();
        assert_eq!(result.num_published, 0);
        assert!(!result.has_failures());
    }

    #[tokio::test]
    async fn documents_flow_end_to_end() {
        let sink = MemorySink::new();
        let connector = StaticConnector {
            docs: vec![
                Document::new("doc1").unwrap(),
                Document::new("doc2").unwrap(),
            ],
        };
        let result = run_local(&settings(), vec![Box::new(connector)], sink.clone())
            .await
            .unwrap();

        assert_eq!(result.num_published, 2);
        assert_eq!(result.num_succeeded, 2);
        assert_eq!(result.num_failed, 0);
        assert!(!result.has_failures());
        let mut indexed = sink.indexed_ids();
        indexed.sort();
        assert_eq!(indexed, vec!["doc1", "doc2"]);
    }

    #[tokio::test]
    async fn connector_failure_marks_the_run() {
        let result = run_local(
            &settings(),
            vec![Box::new(FailingConnector)],
            MemorySink::new(),
        )
        .await
        .unwrap();
        assert!(result.has_failures());
        assert_eq!(result.connector_errors.len(), 1);
        assert!(result.connector_errors[0].contains("source unavailable"));
    }

    #[tokio::test]
    async fn connectors_run_sequentially_under_one_run_id() {
        let sink = MemorySink::new();
        let first = StaticConnector {
            docs: vec![Document::new("a").unwrap()],
        };
        let second = StaticConnector {
            docs: vec![Document::new("b").unwrap()],
        };
        let result = run_local(
            &settings(),
            vec![Box::new(first), Box::new(second)],
            sink.clone(),
        )
        .await
        .unwrap();

        assert_eq!(result.num_published, 2);
        assert_eq!(result.num_succeeded, 2);
        let requests = sink.indexed_requests();
        for request in requests {
            assert_eq!(request.doc.run_id(), Some(result.run_id.as_str()));
        }
    }
}
