//! # docflow-core
//!
//! Core library for the docflow document-enrichment pipeline: connectors
//! publish semi-structured [`Document`]s into a source topic, workers run
//! them through a configurable chain of [`stage::Stage`]s, and an indexer
//! batches terminal documents toward a search sink. A run-scoped
//! [`publisher::Publisher`] tracks every in-flight document, including
//! children discovered mid-pipeline, and the [`runner::Runner`] declares the
//! run complete exactly when all of them have been indexed or failed.
//!
//! ## Architecture
//!
//! ```text
//! Connector → (source topic) → Worker → pipeline → (completed topic) → Indexer → sink
//!                  ▲                │ CREATE / FINISH            │ FINISH / FAIL
//!                  │                ▼                            ▼
//!              Publisher ◀───── (event topic, per run) ◀─────────┘
//! ```
//!
//! Transport is abstract: the [`message`] traits can be backed by a real
//! queue system or by the in-memory [`message::LocalBroker`] used in tests
//! and single-process runs.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Typed configuration loading.
pub mod config;
/// Connector seam and bundled connectors.
pub mod connector;
/// Unified error handling.
pub mod core;
/// The document value type and its mutation contract.
pub mod document;
/// Lifecycle events.
pub mod event;
/// The indexer, its batch accumulator and the sink seam.
pub mod indexer;
/// Abstract transport between components.
pub mod message;
/// Throughput accounting.
pub mod metrics;
/// Ordered stage composition.
pub mod pipeline;
/// The run coordinator.
pub mod publisher;
/// Run execution and reconciliation.
pub mod runner;
/// Stages and the bundled stage set.
pub mod stage;
/// Workers and retry tracking.
pub mod worker;

pub use crate::core::{DocflowError, Result};
pub use config::Settings;
pub use document::{Document, UpdateMode};
pub use event::{Event, EventType};
pub use message::LocalBroker;
pub use pipeline::Pipeline;
pub use publisher::Publisher;
pub use runner::{run_local, RunResult, Runner};
