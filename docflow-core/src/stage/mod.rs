//! Stages: in-place document transformations composed into pipelines.
//!
//! A [`Stage`] has the lifecycle `start → process_document* → stop`.
//! `process_document` mutates the input document in place and returns any
//! child documents generated as a side effect. Conditional execution wraps
//! every stage: when a stage's conditions reject a document,
//! [`ConfiguredStage::process_conditional`] returns `None` without invoking
//! the stage.

mod drop_document;
mod extract_terms;
mod remove_empty_fields;
mod rename_fields;

pub use drop_document::DropDocument;
pub use extract_terms::ExtractTerms;
pub use remove_empty_fields::RemoveEmptyFields;
pub use rename_fields::RenameFields;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{ConditionConfig, ConditionOperator, StageConfig};
use crate::core::{DocflowError, Result};
use crate::document::Document;

/// Error raised by a stage while starting, stopping or processing.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("[{stage}] {message}")]
pub struct StageError {
    /// Name of the stage that failed.
    pub stage: String,
    /// Failure description.
    pub message: String,
}

impl StageError {
    /// Creates a stage error.
    pub fn new(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

impl From<StageError> for DocflowError {
    fn from(err: StageError) -> Self {
        DocflowError::Stage {
            stage: err.stage,
            message: err.message,
        }
    }
}

/// An operation applied to documents flowing through a pipeline.
///
/// Implementations mutate the document in place and may emit child documents.
/// Stages are owned by a single worker's pipeline instance and are never
/// shared across workers.
pub trait Stage: Send {
    /// Instance name used in logs and error messages.
    fn name(&self) -> &str;

    /// One-time setup (open files, build lookup structures).
    fn start(&mut self) -> std::result::Result<(), StageError> {
        Ok(())
    }

    /// One-time teardown.
    fn stop(&mut self) -> std::result::Result<(), StageError> {
        Ok(())
    }

    /// Applies the operation to `doc` in place, returning generated children.
    fn process_document(
        &mut self,
        doc: &mut Document,
    ) -> std::result::Result<Vec<Document>, StageError>;
}

/// A conditional-execution predicate over documents.
///
/// A `must` condition passes when any configured field contains any of the
/// configured values (multi-valued fields are checked element-wise);
/// `must_not` is its negation. Fields absent from the document behave as if
/// present without matching values.
#[derive(Debug, Clone)]
pub struct Condition {
    fields: Vec<String>,
    values: Vec<String>,
    operator: ConditionOperator,
}

impl Condition {
    /// Builds a condition from its config descriptor.
    pub fn from_config(config: &ConditionConfig) -> Self {
        Self {
            fields: config.fields.clone(),
            values: config.values.clone(),
            operator: config.operator,
        }
    }

    /// Evaluates the predicate against a document.
    pub fn matches(&self, doc: &Document) -> bool {
        let hit = self.fields.iter().any(|field| {
            doc.get_string_list(field)
                .map(|values| values.iter().any(|v| self.values.contains(v)))
                .unwrap_or(false)
        });
        match self.operator {
            ConditionOperator::Must => hit,
            ConditionOperator::MustNot => !hit,
        }
    }
}

/// A stage bundled with its conditional-execution predicates.
pub struct ConfiguredStage {
    stage: Box<dyn Stage>,
    conditions: Vec<Condition>,
}

impl ConfiguredStage {
    /// Wraps a stage with its conditions.
    pub fn new(stage: Box<dyn Stage>, conditions: Vec<Condition>) -> Self {
        Self { stage, conditions }
    }

    /// Builds the stage selected by `config.class` along with its conditions.
    pub fn from_config(config: &StageConfig) -> Result<Self> {
        let stage = build_stage(config)?;
        let conditions = config.conditions.iter().map(Condition::from_config).collect();
        Ok(Self::new(stage, conditions))
    }

    /// The wrapped stage's name.
    pub fn name(&self) -> &str {
        self.stage.name()
    }

    /// Starts the wrapped stage.
    pub fn start(&mut self) -> std::result::Result<(), StageError> {
        self.stage.start()
    }

    /// Stops the wrapped stage.
    pub fn stop(&mut self) -> std::result::Result<(), StageError> {
        self.stage.stop()
    }

    /// True when every condition accepts the document.
    pub fn should_process(&self, doc: &Document) -> bool {
        self.conditions.iter().all(|c| c.matches(doc))
    }

    /// Processes the document iff the conditions accept it.
    ///
    /// Returns `None` when the stage was skipped.
    pub fn process_conditional(
        &mut self,
        doc: &mut Document,
    ) -> std::result::Result<Option<Vec<Document>>, StageError> {
        if self.should_process(doc) {
            self.stage.process_document(doc).map(Some)
        } else {
            Ok(None)
        }
    }
}

impl std::fmt::Debug for ConfiguredStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfiguredStage")
            .field("name", &self.name())
            .field("conditions", &self.conditions.len())
            .finish()
    }
}

/// Instantiates the bundled stage selected by `config.class`.
pub fn build_stage(config: &StageConfig) -> Result<Box<dyn Stage>> {
    match config.class.as_str() {
        "ExtractTerms" => Ok(Box::new(ExtractTerms::from_config(config)?)),
        "DropDocument" => Ok(Box::new(DropDocument::from_config(config))),
        "RemoveEmptyFields" => Ok(Box::new(RemoveEmptyFields::from_config(config))),
        "RenameFields" => Ok(Box::new(RenameFields::from_config(config)?)),
        other => Err(DocflowError::config(format!(
            "unknown stage class '{other}'"
        ))),
    }
}
