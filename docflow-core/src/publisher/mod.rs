//! The publisher: the authoritative view of outstanding work for one run.
//!
//! A [`Publisher`] stamps documents with the run id, submits them for
//! processing, and folds lifecycle events into a per-id pending counter:
//!
//! ```text
//! pending[id] = publishes(id) + CREATEs(id) − FINISHes(id) − FAILs(id)
//! ```
//!
//! The run is reconciled when every counter is at or below zero. Workers
//! announce children with CREATE *before* the parent completes, so the
//! counters can never spuriously reach all-zeros while children remain
//! uncounted.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::core::Result;
use crate::document::Document;
use crate::event::{Event, EventType};
use crate::message::PublisherMessenger;

/// Publishes documents for one run and reconciles their terminal events.
pub struct Publisher<M: PublisherMessenger> {
    run_id: String,
    messenger: M,
    pending: HashMap<String, i64>,
    num_published: u64,
    num_succeeded: u64,
    num_failed: u64,
    has_errors: bool,
}

impl<M: PublisherMessenger> Publisher<M> {
    /// Binds a messenger to the run and pipeline, returning the publisher.
    pub async fn start(mut messenger: M, run_id: impl Into<String>, pipeline_name: &str) -> Result<Self> {
        let run_id = run_id.into();
        messenger.initialize(&run_id, pipeline_name).await?;
        info!(run_id = %run_id, pipeline = pipeline_name, "publisher initialized");
        Ok(Self {
            run_id,
            messenger,
            pending: HashMap::new(),
            num_published: 0,
            num_succeeded: 0,
            num_failed: 0,
            has_errors: false,
        })
    }

    /// The run this publisher coordinates.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Stamps the document with the run id and submits it for processing.
    pub async fn publish(&mut self, mut doc: Document) -> Result<()> {
        doc.initialize_run_id(&self.run_id)?;
        self.messenger.send_for_processing(&doc).await?;
        *self.pending.entry(doc.id().to_string()).or_insert(0) += 1;
        self.num_published += 1;
        debug!(doc_id = %doc.id(), run_id = %self.run_id, "document published");
        Ok(())
    }

    /// Folds one lifecycle event into the pending accounting.
    pub fn handle_event(&mut self, event: &Event) {
        let counter = self.pending.entry(event.document_id.clone()).or_insert(0);
        match event.event_type {
            EventType::Create => *counter += 1,
            EventType::Finish => {
                *counter -= 1;
                self.num_succeeded += 1;
            }
            EventType::Fail => {
                *counter -= 1;
                self.num_failed += 1;
                self.has_errors = true;
            }
        }
        debug!(
            doc_id = %event.document_id,
            event = ?event.event_type,
            pending = *counter,
            "event handled"
        );
    }

    /// True when every published document (and every announced child) has
    /// reached a terminal event.
    pub fn is_reconciled(&self) -> bool {
        self.pending.values().all(|&count| count <= 0)
    }

    /// Retrieves the next event for this run, if one arrives within the
    /// transport's poll timeout.
    pub async fn poll_event(&mut self) -> Result<Option<Event>> {
        self.messenger.poll_event().await
    }

    /// True while the transport still holds undelivered events for this run.
    pub async fn has_events_in_flight(&self) -> Result<bool> {
        self.messenger.has_events_in_flight().await
    }

    /// Releases transport resources.
    pub async fn close(&mut self) -> Result<()> {
        self.messenger.close().await
    }

    /// Documents published so far.
    pub fn num_published(&self) -> u64 {
        self.num_published
    }

    /// FINISH events observed so far.
    pub fn num_succeeded(&self) -> u64 {
        self.num_succeeded
    }

    /// FAIL events observed so far.
    pub fn num_failed(&self) -> u64 {
        self.num_failed
    }

    /// True once any FAIL has been observed.
    pub fn has_errors(&self) -> bool {
        self.has_errors
    }
}
