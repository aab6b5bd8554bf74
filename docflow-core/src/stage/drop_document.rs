//! Marks documents as dropped.

use crate::config::StageConfig;
use crate::document::Document;
use crate::stage::{Stage, StageError};

/// Sets the dropped flag on every document it processes.
///
/// Combined with conditional execution this acts as a filter: dropped
/// documents are acknowledged by the worker but never reach the indexer.
pub struct DropDocument {
    name: String,
}

impl DropDocument {
    /// Builds the stage from its config descriptor.
    pub fn from_config(config: &StageConfig) -> Self {
        Self {
            name: config.display_name().to_string(),
        }
    }
}

impl Stage for DropDocument {
    fn name(&self) -> &str {
        &self.name
    }

    fn process_document(
        &mut self,
        doc: &mut Document,
    ) -> std::result::Result<Vec<Document>, StageError> {
        doc.set_dropped(true);
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    #[test]
    fn sets_the_dropped_flag() {
        let settings = Settings::from_toml_str(
            r#"
            [[pipelines]]
            name = "p"
            [[pipelines.stages]]
            class = "DropDocument"
            "#,
        )
        .unwrap();
        let mut stage = DropDocument::from_config(&settings.pipelines[0].stages[0]);
        let mut doc = Document::new("doc").unwrap();
        assert!(!doc.is_dropped());
        stage.process_document(&mut doc).unwrap();
        assert!(doc.is_dropped());
    }
}
