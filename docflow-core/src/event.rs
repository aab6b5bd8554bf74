//! Lifecycle events exchanged between workers, indexers and the publisher.
//!
//! An [`Event`] announces that a document was created mid-run (a child
//! discovered by a stage), finished successfully, or failed terminally. The
//! publisher folds these into its pending-document accounting.

use serde::{Deserialize, Serialize};

/// The kind of lifecycle transition an event announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    /// A child document was discovered mid-pipeline.
    Create,
    /// A document was indexed successfully.
    Finish,
    /// A document reached a terminal failure.
    Fail,
}

/// An immutable lifecycle notification for a single document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Id of the document the event concerns.
    pub document_id: String,
    /// Run the document belongs to.
    pub run_id: String,
    /// Lifecycle transition being announced.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Optional human-readable detail (e.g. `SENT_TO_DLQ`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Event {
    /// Creates an event without a message.
    pub fn new(
        document_id: impl Into<String>,
        run_id: impl Into<String>,
        event_type: EventType,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            run_id: run_id.into(),
            event_type,
            message: None,
        }
    }

    /// Attaches a detail message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// True for FINISH and FAIL, the terminal transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self.event_type, EventType::Finish | EventType::Fail)
    }

    /// Parses an event from its JSON wire form.
    pub fn from_json_str(json: &str) -> crate::core::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rendered = serde_json::to_string(self).map_err(|_| std::fmt::Error)?;
        f.write_str(&rendered)
    }
}
