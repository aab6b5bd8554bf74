//! Removes payload fields whose values are empty.

use crate::config::StageConfig;
use crate::document::{Document, CHILDREN_FIELD, ERROR_FIELD, ID_FIELD, RUNID_FIELD};
use crate::stage::{Stage, StageError};

/// Strips fields holding empty strings, nulls, or sequences with no
/// non-empty elements. Reserved fields and the error log are left alone.
pub struct RemoveEmptyFields {
    name: String,
}

impl RemoveEmptyFields {
    /// Builds the stage from its config descriptor.
    pub fn from_config(config: &StageConfig) -> Self {
        Self {
            name: config.display_name().to_string(),
        }
    }
}

impl Stage for RemoveEmptyFields {
    fn name(&self) -> &str {
        &self.name
    }

    fn process_document(
        &mut self,
        doc: &mut Document,
    ) -> std::result::Result<Vec<Document>, StageError> {
        let names: Vec<String> = doc
            .as_map()
            .keys()
            .filter(|name| {
                let name = name.as_str();
                name != ID_FIELD
                    && name != RUNID_FIELD
                    && name != CHILDREN_FIELD
                    && name != ERROR_FIELD
            })
            .cloned()
            .collect();

        let me = |e: crate::core::DocflowError| StageError::new(&self.name, e.to_string());

        for name in names {
            if doc.is_multi_valued(&name) {
                let values = doc.get_string_list(&name).unwrap_or_default();
                // Walk backwards so removals do not shift pending indices.
                for (index, value) in values.iter().enumerate().rev() {
                    if value.is_empty() {
                        doc.remove_from_array(&name, index).map_err(me)?;
                    }
                }
                if doc.get_string_list(&name).map_or(true, |v| v.is_empty()) {
                    doc.remove_field(&name).map_err(me)?;
                }
            } else if doc.get_string(&name).map_or(true, |v| v.is_empty()) {
                doc.remove_field(&name).map_err(me)?;
            }
        }
        Ok(Vec::new())
    }
}
