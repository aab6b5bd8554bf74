//! Abstract transport between pipeline components.
//!
//! Three capability sets cover the three sides of the data flow: workers
//! consume source documents and emit completed documents plus events,
//! indexers consume completed documents and emit events, publishers submit
//! source documents and consume events. All of them may be backed by the
//! same queue system; [`local::LocalBroker`] provides an in-memory loopback
//! used by tests and single-process runs.
//!
//! The transport is assumed to provide at-least-once delivery and
//! per-partition ordering; the core does not require cross-partition
//! ordering.

pub mod local;

pub use local::LocalBroker;

use async_trait::async_trait;

use crate::core::Result;
use crate::document::Document;
use crate::event::Event;

/// Transport capabilities required by a [`crate::worker::Worker`].
#[async_trait]
pub trait WorkerMessenger: Send {
    /// Retrieves the next document waiting to be processed.
    ///
    /// Blocks up to the transport's poll timeout; `None` means the poll timed
    /// out with nothing available.
    async fn poll_doc_to_process(&mut self) -> Result<Option<Document>>;

    /// Forwards a processed document to the completed-documents destination.
    async fn send_completed(&mut self, doc: &Document) -> Result<()>;

    /// Sends a lifecycle event toward the publisher.
    async fn send_event(&mut self, event: Event) -> Result<()>;

    /// Routes a document to the dead-letter destination.
    async fn send_failed(&mut self, doc: &Document) -> Result<()>;

    /// Commits offsets for the documents polled since the last commit.
    async fn commit_pending_doc_offsets(&mut self) -> Result<()>;

    /// Releases transport resources.
    async fn close(&mut self) -> Result<()>;
}

/// Transport capabilities required by an [`crate::indexer::Indexer`].
#[async_trait]
pub trait IndexerMessenger: Send {
    /// Retrieves the next pipeline-completed document waiting to be indexed.
    async fn poll_completed(&mut self) -> Result<Option<Document>>;

    /// Transport offset of the most recently polled document.
    ///
    /// Used as the external monotonic version when document versioning is
    /// enabled.
    fn last_offset(&self) -> Option<u64>;

    /// Sends a lifecycle event toward the publisher.
    async fn send_event(&mut self, event: Event) -> Result<()>;

    /// Releases transport resources.
    async fn close(&mut self) -> Result<()>;
}

/// Transport capabilities required by a [`crate::publisher::Publisher`].
#[async_trait]
pub trait PublisherMessenger: Send {
    /// Binds this messenger to a run and pipeline. Called exactly once.
    async fn initialize(&mut self, run_id: &str, pipeline_name: &str) -> Result<()>;

    /// The run this messenger participates in, once initialized.
    fn run_id(&self) -> Option<&str>;

    /// Submits a document for processing by the configured pipeline.
    async fn send_for_processing(&mut self, doc: &Document) -> Result<()>;

    /// Retrieves the next event for this run, blocking up to the poll
    /// timeout. `None` means the poll timed out with nothing available.
    async fn poll_event(&mut self) -> Result<Option<Event>>;

    /// True while the transport still holds undelivered events for this run.
    async fn has_events_in_flight(&self) -> Result<bool>;

    /// Releases transport resources.
    async fn close(&mut self) -> Result<()>;
}
