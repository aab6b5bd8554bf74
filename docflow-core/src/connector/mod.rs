//! Connectors: source-side producers of documents.
//!
//! Concrete source systems live outside the core; a [`Connector`] simply
//! feeds documents into the run through a [`DocumentFeed`]. The runner owns
//! the other end and publishes everything the connector emits.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::ConnectorConfig;
use crate::core::{DocflowError, Result};
use crate::document::Document;

/// The runner-provided outlet a connector emits documents into.
pub struct DocumentFeed {
    tx: mpsc::Sender<Document>,
}

impl DocumentFeed {
    /// Wraps the sending half of the runner's channel.
    pub fn new(tx: mpsc::Sender<Document>) -> Self {
        Self { tx }
    }

    /// Hands one document to the run.
    pub async fn accept(&self, doc: Document) -> Result<()> {
        self.tx
            .send(doc)
            .await
            .map_err(|_| DocflowError::messenger("run closed before connector finished"))
    }
}

/// A source-side producer of documents.
#[async_trait]
pub trait Connector: Send {
    /// Connector instance name, used in logs and failure reports.
    fn name(&self) -> &str;

    /// Emits every source document into `feed`, then returns.
    async fn feed(&mut self, feed: &DocumentFeed) -> Result<()>;
}

/// Reads one JSON document per line from a file.
pub struct JsonFileConnector {
    name: String,
    path: String,
}

impl JsonFileConnector {
    /// Creates a connector over the given JSON-lines file.
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Builds the connector from its config descriptor.
    pub fn from_config(config: &ConnectorConfig) -> Result<Self> {
        Ok(Self::new(config.display_name(), config.require_string("path")?))
    }
}

#[async_trait]
impl Connector for JsonFileConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn feed(&mut self, feed: &DocumentFeed) -> Result<()> {
        let raw = std::fs::read_to_string(&self.path).map_err(|e| DocflowError::Connector {
            name: self.name.clone(),
            message: format!("failed to read '{}': {e}", self.path),
        })?;
        let mut emitted = 0usize;
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let doc = Document::from_json_str(line).map_err(|e| DocflowError::Connector {
                name: self.name.clone(),
                message: format!("invalid document on line: {e}"),
            })?;
            feed.accept(doc).await?;
            emitted += 1;
        }
        debug!(connector = %self.name, emitted, "connector finished");
        Ok(())
    }
}

/// Instantiates the bundled connector selected by `config.class`.
pub fn build_connector(config: &ConnectorConfig) -> Result<Box<dyn Connector>> {
    match config.class.as_str() {
        "JsonFile" => Ok(Box::new(JsonFileConnector::from_config(config)?)),
        other => Err(DocflowError::config(format!(
            "unknown connector class '{other}'"
        ))),
    }
}
