//! Renames payload fields according to a configured mapping.

use serde_json::Value;

use crate::config::StageConfig;
use crate::core::{DocflowError, Result};
use crate::document::{Document, UpdateMode};
use crate::stage::{Stage, StageError};

/// Renames fields via [`Document::rename_field`].
///
/// Config parameters:
/// - `field_mapping` (table) : source field name → target field name.
/// - `update_mode` (string, default `overwrite`) : merge behavior when the
///   target already exists (`overwrite`, `append`, or `skip`).
pub struct RenameFields {
    name: String,
    mapping: Vec<(String, String)>,
    mode: UpdateMode,
}

impl RenameFields {
    /// Builds the stage from its config descriptor.
    pub fn from_config(config: &StageConfig) -> Result<Self> {
        let raw = config.params.get("field_mapping").ok_or_else(|| {
            DocflowError::config(format!(
                "stage '{}' requires parameter 'field_mapping'",
                config.display_name()
            ))
        })?;
        let table = raw.as_object().ok_or_else(|| {
            DocflowError::config(format!(
                "stage '{}': 'field_mapping' must be a table of old -> new names",
                config.display_name()
            ))
        })?;
        let mut mapping = Vec::with_capacity(table.len());
        for (old, new) in table {
            match new {
                Value::String(new) => mapping.push((old.clone(), new.clone())),
                _ => {
                    return Err(DocflowError::config(format!(
                        "stage '{}': target for '{old}' must be a string",
                        config.display_name()
                    )))
                }
            }
        }
        let mode = match config.param_string("update_mode").as_deref() {
            None | Some("overwrite") => UpdateMode::Overwrite,
            Some("append") => UpdateMode::Append,
            Some("skip") => UpdateMode::Skip,
            Some(other) => {
                return Err(DocflowError::config(format!(
                    "stage '{}': unknown update_mode '{other}'",
                    config.display_name()
                )))
            }
        };
        Ok(Self {
            name: config.display_name().to_string(),
            mapping,
            mode,
        })
    }
}

impl Stage for RenameFields {
    fn name(&self) -> &str {
        &self.name
    }

    fn process_document(
        &mut self,
        doc: &mut Document,
    ) -> std::result::Result<Vec<Document>, StageError> {
        for (old, new) in &self.mapping {
            doc.rename_field(old, new, self.mode)
                .map_err(|e| StageError::new(&self.name, e.to_string()))?;
        }
        Ok(Vec::new())
    }
}
