//! Unified error handling for the docflow pipeline.
//!
//! Every subsystem folds its failures into [`DocflowError`]; component code
//! propagates with `?` and the crate-wide [`Result`] alias. Validation errors
//! (reserved-field mutation, bad document ids) are raised synchronously to the
//! caller and never travel through the event transport.

use thiserror::Error;

/// Main error type for the docflow pipeline.
#[derive(Error, Debug)]
pub enum DocflowError {
    /// A document failed a structural validation (missing, empty, or
    /// non-textual id; malformed wire payload).
    #[error("invalid document: {message}")]
    InvalidDocument {
        /// What was wrong with the document.
        message: String,
    },

    /// A user-facing mutator touched a reserved field.
    ///
    /// Reserved fields are `id`, `run_id` and `.children`; `errors` is
    /// writable only through `Document::log_error`.
    #[error("field '{field}' is reserved and cannot be modified")]
    ReservedField {
        /// Name of the rejected field.
        field: String,
    },

    /// `run_id` was initialized a second time on the same document.
    #[error("run_id has already been set on this document")]
    RunIdAlreadySet,

    /// A pipeline stage failed while processing a document.
    #[error("stage '{stage}' failed: {message}")]
    Stage {
        /// Name of the failing stage.
        stage: String,
        /// Failure description.
        message: String,
    },

    /// Pipeline assembly or lifecycle failure.
    #[error("pipeline error: {message}")]
    Pipeline {
        /// Failure description.
        message: String,
    },

    /// Transport failure while exchanging documents or events.
    #[error("messenger error: {message}")]
    Messenger {
        /// Failure description.
        message: String,
    },

    /// Failure while shipping a batch to the search sink.
    #[error("indexer error: {message}")]
    Indexer {
        /// Failure description, carrying the first sink-reported cause.
        message: String,
    },

    /// A connector failed while emitting source documents.
    #[error("connector '{name}' failed: {message}")]
    Connector {
        /// Name of the failing connector.
        name: String,
        /// Failure description.
        message: String,
    },

    /// Configuration loading or validation failure.
    #[error("configuration error: {message}")]
    Config {
        /// Failure description.
        message: String,
    },

    /// I/O failure from file operations.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DocflowError {
    /// Short category label used in log fields.
    pub fn category(&self) -> &'static str {
        match self {
            DocflowError::InvalidDocument { .. } => "document",
            DocflowError::ReservedField { .. } => "document",
            DocflowError::RunIdAlreadySet => "document",
            DocflowError::Stage { .. } => "stage",
            DocflowError::Pipeline { .. } => "pipeline",
            DocflowError::Messenger { .. } => "messenger",
            DocflowError::Indexer { .. } => "indexer",
            DocflowError::Connector { .. } => "connector",
            DocflowError::Config { .. } => "config",
            DocflowError::Io(_) => "io",
            DocflowError::Json(_) => "json",
        }
    }

    /// Builds a [`DocflowError::Config`] from anything displayable.
    pub fn config(message: impl Into<String>) -> Self {
        DocflowError::Config {
            message: message.into(),
        }
    }

    /// Builds a [`DocflowError::Messenger`] from anything displayable.
    pub fn messenger(message: impl Into<String>) -> Self {
        DocflowError::Messenger {
            message: message.into(),
        }
    }

    /// Builds a [`DocflowError::Indexer`] from anything displayable.
    pub fn indexer(message: impl Into<String>) -> Self {
        DocflowError::Indexer {
            message: message.into(),
        }
    }
}

/// Convenient Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DocflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_field_display_names_the_field() {
        let err = DocflowError::ReservedField {
            field: ".children".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "field '.children' is reserved and cannot be modified"
        );
        assert_eq!(err.category(), "document");
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: DocflowError = io.into();
        assert_eq!(err.category(), "io");
    }
}
