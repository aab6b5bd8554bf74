//! Ordered stage composition.
//!
//! A [`Pipeline`] runs each of its stages in order on a document. Children
//! produced by stage *k* are collected as-is and are NOT run through stages
//! *k+1..n*. A stage failure aborts the pipeline for that document; the
//! partially-mutated document is surfaced to the worker as a processing
//! failure.

use tracing::debug;

use crate::config::Settings;
use crate::core::Result;
use crate::document::Document;
use crate::stage::ConfiguredStage;

/// An ordered list of configured stages executed per document.
#[derive(Debug)]
pub struct Pipeline {
    name: String,
    stages: Vec<ConfiguredStage>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Builds the named pipeline from settings and starts its stages.
    ///
    /// Each worker builds its own instance; stages are not shared.
    pub fn from_config(settings: &Settings, pipeline_name: &str) -> Result<Self> {
        let config = settings.find_pipeline(pipeline_name)?;
        let mut pipeline = Self::new(&config.name);
        for stage_config in &config.stages {
            pipeline.stages.push(ConfiguredStage::from_config(stage_config)?);
        }
        pipeline.start_stages()?;
        Ok(pipeline)
    }

    /// The pipeline name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends a stage.
    pub fn add_stage(&mut self, stage: ConfiguredStage) {
        self.stages.push(stage);
    }

    /// Starts every stage in order.
    pub fn start_stages(&mut self) -> Result<()> {
        for stage in &mut self.stages {
            debug!(pipeline = %self.name, stage = %stage.name(), "starting stage");
            stage.start()?;
        }
        Ok(())
    }

    /// Stops every stage in order.
    pub fn stop_stages(&mut self) -> Result<()> {
        for stage in &mut self.stages {
            stage.stop()?;
        }
        Ok(())
    }

    /// Runs the document through every stage, in order.
    ///
    /// The document is mutated in place; the returned vector holds the child
    /// documents in generation order. Dropped documents still travel the full
    /// pipeline; the worker decides what a drop means.
    pub fn process_document(&mut self, doc: &mut Document) -> Result<Vec<Document>> {
        let mut children = Vec::new();
        for stage in &mut self.stages {
            if let Some(mut produced) = stage.process_conditional(doc)? {
                children.append(&mut produced);
            }
        }
        Ok(children)
    }
}
