//! Typed configuration for pipelines, workers and indexers.
//!
//! Settings are loaded from TOML and deserialized into the structs below.
//! Recognized option names follow the pipeline's wire conventions
//! (`indexer.batchSize`, `worker.maxRetries`, ...); defaults are provided by
//! the `Default` impls so a minimal file only names its pipelines.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::{DocflowError, Result};

/// Default indexer batch capacity.
pub const DEFAULT_BATCH_SIZE: usize = 100;
/// Default indexer batch timeout in milliseconds.
pub const DEFAULT_BATCH_TIMEOUT_MS: u64 = 100;

/// Top-level settings file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    /// Worker pool options.
    #[serde(default)]
    pub worker: WorkerSettings,
    /// Indexer options.
    #[serde(default)]
    pub indexer: IndexerSettings,
    /// Pipelines available to workers, by name.
    #[serde(default)]
    pub pipelines: Vec<PipelineConfig>,
    /// Connectors executed by a run, in order.
    #[serde(default)]
    pub connectors: Vec<ConnectorConfig>,
}

impl Settings {
    /// Loads settings from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Parses settings from TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| DocflowError::config(format!("invalid settings: {e}")))
    }

    /// Looks up a pipeline by name.
    pub fn find_pipeline(&self, name: &str) -> Result<&PipelineConfig> {
        self.pipelines
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| DocflowError::config(format!("no pipeline named '{name}'")))
    }
}

/// Options controlling worker behavior.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSettings {
    /// Name of the pipeline workers should execute.
    pub pipeline: Option<String>,
    /// When set, enables retry tracking with this maximum.
    pub max_retries: Option<u32>,
    /// Number of worker tasks in the pool.
    #[serde(default = "default_worker_threads")]
    pub threads: usize,
    /// Watchdog limit: maximum seconds between polls before force-exit.
    pub max_processing_secs: Option<u64>,
}

fn default_worker_threads() -> usize {
    1
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            pipeline: None,
            max_retries: None,
            threads: default_worker_threads(),
            max_processing_secs: None,
        }
    }
}

/// Options controlling indexer batching and sink behavior.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexerSettings {
    /// Batch capacity.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Batch timeout in milliseconds.
    #[serde(default = "default_batch_timeout")]
    pub batch_timeout: u64,
    /// When set, the value of this document field becomes the sink routing key.
    pub routing_field: Option<String>,
    /// When true, sink calls carry the source-transport offset as an external
    /// monotonic version.
    #[serde(default)]
    pub versioning: bool,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_batch_timeout() -> u64 {
    DEFAULT_BATCH_TIMEOUT_MS
}

impl Default for IndexerSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_timeout: DEFAULT_BATCH_TIMEOUT_MS,
            routing_field: None,
            versioning: false,
        }
    }
}

/// An ordered list of stage descriptors under a pipeline name.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Pipeline name, referenced by `worker.pipeline`.
    pub name: String,
    /// Stage descriptors, executed in order.
    #[serde(default)]
    pub stages: Vec<StageConfig>,
}

/// Descriptor for a single stage instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StageConfig {
    /// Stage implementation selector (e.g. `ExtractTerms`).
    pub class: String,
    /// Optional instance name; defaults to the class name.
    pub name: Option<String>,
    /// Conditional-execution predicates; all must pass.
    #[serde(default)]
    pub conditions: Vec<ConditionConfig>,
    /// Stage-specific parameters.
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl StageConfig {
    /// The effective stage name.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.class)
    }

    /// Reads an optional string parameter.
    pub fn param_string(&self, key: &str) -> Option<String> {
        self.params.get(key).and_then(Value::as_str).map(String::from)
    }

    /// Reads a required string parameter.
    pub fn require_string(&self, key: &str) -> Result<String> {
        self.param_string(key).ok_or_else(|| {
            DocflowError::config(format!(
                "stage '{}' requires parameter '{key}'",
                self.display_name()
            ))
        })
    }

    /// Reads a required list-of-strings parameter.
    pub fn require_string_list(&self, key: &str) -> Result<Vec<String>> {
        let value = self.params.get(key).ok_or_else(|| {
            DocflowError::config(format!(
                "stage '{}' requires parameter '{key}'",
                self.display_name()
            ))
        })?;
        let items = value.as_array().ok_or_else(|| {
            DocflowError::config(format!(
                "stage '{}': parameter '{key}' must be a list of strings",
                self.display_name()
            ))
        })?;
        items
            .iter()
            .map(|v| {
                v.as_str().map(String::from).ok_or_else(|| {
                    DocflowError::config(format!(
                        "stage '{}': parameter '{key}' must be a list of strings",
                        self.display_name()
                    ))
                })
            })
            .collect()
    }

    /// Reads an optional list-of-strings parameter.
    pub fn param_string_list(&self, key: &str) -> Result<Option<Vec<String>>> {
        if self.params.contains_key(key) {
            self.require_string_list(key).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Reads a boolean parameter with a default.
    pub fn param_bool(&self, key: &str, default: bool) -> bool {
        self.params
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }
}

/// Conditional-execution predicate descriptor.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConditionConfig {
    /// Fields inspected by the predicate.
    pub fields: Vec<String>,
    /// Values searched for in the fields.
    #[serde(default)]
    pub values: Vec<String>,
    /// `must` (default) or `must_not`.
    #[serde(default)]
    pub operator: ConditionOperator,
}

/// Polarity of a condition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    /// Process when any field contains any configured value.
    #[default]
    Must,
    /// Process when no field contains any configured value.
    MustNot,
}

/// Descriptor for a connector executed by a run.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectorConfig {
    /// Connector implementation selector (e.g. `JsonFile`).
    pub class: String,
    /// Optional instance name; defaults to the class name.
    pub name: Option<String>,
    /// Connector-specific parameters.
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl ConnectorConfig {
    /// The effective connector name.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.class)
    }

    /// Reads a required string parameter.
    pub fn require_string(&self, key: &str) -> Result<String> {
        self.params
            .get(key)
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| {
                DocflowError::config(format!(
                    "connector '{}' requires parameter '{key}'",
                    self.display_name()
                ))
            })
    }
}
