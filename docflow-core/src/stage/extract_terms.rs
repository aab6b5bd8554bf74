//! Dictionary-based term extraction.
//!
//! Finds dictionary terms in the configured source fields and appends the
//! matched payloads to the destination field(s). The dictionary file carries
//! one term per line; a payload may be attached with the syntax
//! `term, payload`.

use std::io::BufRead;

use tracing::debug;

use crate::config::StageConfig;
use crate::core::Result;
use crate::document::Document;
use crate::stage::{Stage, StageError};

/// Extracts dictionary terms from source fields into destination fields.
///
/// Config parameters:
/// - `source` (list) : source field names.
/// - `dest` (list) : destination field names; either one per source or a
///   single destination shared by all sources.
/// - `dict_path` (string) : path of the dictionary file.
/// - `use_payloads` (bool, default true) : emit payloads rather than the
///   matched terms.
/// - `overwrite` (bool, default false) : replace the destination instead of
///   appending.
/// - `ignore_case` (bool, default false) : case-insensitive matching.
/// - `only_whole_words` (bool, default false) : suppress matches contained
///   within other words (e.g. "oman" inside "roman").
pub struct ExtractTerms {
    name: String,
    source_fields: Vec<String>,
    dest_fields: Vec<String>,
    dict_path: String,
    use_payloads: bool,
    overwrite: bool,
    ignore_case: bool,
    only_whole_words: bool,
    entries: Vec<DictEntry>,
}

struct DictEntry {
    /// Needle in match case (lowercased when `ignore_case`).
    needle: String,
    term: String,
    payload: String,
}

impl ExtractTerms {
    /// Builds the stage from its config descriptor.
    pub fn from_config(config: &StageConfig) -> Result<Self> {
        Ok(Self {
            name: config.display_name().to_string(),
            source_fields: config.require_string_list("source")?,
            dest_fields: config.require_string_list("dest")?,
            dict_path: config.require_string("dict_path")?,
            use_payloads: config.param_bool("use_payloads", true),
            overwrite: config.param_bool("overwrite", false),
            ignore_case: config.param_bool("ignore_case", false),
            only_whole_words: config.param_bool("only_whole_words", false),
            entries: Vec::new(),
        })
    }

    fn load_dictionary(&mut self) -> std::result::Result<(), StageError> {
        let file = std::fs::File::open(&self.dict_path).map_err(|e| {
            StageError::new(&self.name, format!("failed to open '{}': {e}", self.dict_path))
        })?;
        let reader = std::io::BufReader::new(file);
        for line in reader.lines() {
            let line = line.map_err(|e| {
                StageError::new(&self.name, format!("failed to read '{}': {e}", self.dict_path))
            })?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (term, payload) = match line.split_once(',') {
                Some((term, payload)) => (term.trim().to_string(), payload.trim().to_string()),
                None => (line.to_string(), line.to_string()),
            };
            let needle = if self.ignore_case {
                term.to_lowercase()
            } else {
                term.clone()
            };
            self.entries.push(DictEntry {
                needle,
                term,
                payload,
            });
        }
        debug!(stage = %self.name, terms = self.entries.len(), "dictionary loaded");
        Ok(())
    }

    /// Collects payloads for every dictionary hit in `text`, in text order.
    fn scan(&self, text: &str, out: &mut Vec<(usize, String)>) {
        let haystack = if self.ignore_case {
            text.to_lowercase()
        } else {
            text.to_string()
        };
        for entry in &self.entries {
            if entry.needle.is_empty() {
                continue;
            }
            let mut from = 0;
            while let Some(found) = haystack[from..].find(entry.needle.as_str()) {
                let at = from + found;
                if !self.only_whole_words || is_whole_word(&haystack, at, entry.needle.len()) {
                    let emit = if self.use_payloads {
                        entry.payload.clone()
                    } else {
                        entry.term.clone()
                    };
                    out.push((at, emit));
                }
                from = at + entry.needle.len();
            }
        }
    }
}

fn is_whole_word(text: &str, start: usize, len: usize) -> bool {
    let before_ok = text[..start]
        .chars()
        .next_back()
        .map(|c| !c.is_alphanumeric())
        .unwrap_or(true);
    let after_ok = text[start + len..]
        .chars()
        .next()
        .map(|c| !c.is_alphanumeric())
        .unwrap_or(true);
    before_ok && after_ok
}

impl Stage for ExtractTerms {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> std::result::Result<(), StageError> {
        if self.source_fields.is_empty() {
            return Err(StageError::new(&self.name, "source fields must not be empty"));
        }
        if self.dest_fields.is_empty() {
            return Err(StageError::new(&self.name, "dest fields must not be empty"));
        }
        if self.dest_fields.len() != 1 && self.dest_fields.len() != self.source_fields.len() {
            return Err(StageError::new(
                &self.name,
                "dest must have one field or one per source field",
            ));
        }
        self.load_dictionary()
    }

    fn process_document(
        &mut self,
        doc: &mut Document,
    ) -> std::result::Result<Vec<Document>, StageError> {
        for (i, source_field) in self.source_fields.iter().enumerate() {
            let dest_field = if self.dest_fields.len() == 1 {
                &self.dest_fields[0]
            } else {
                &self.dest_fields[i]
            };

            if !doc.has(source_field) {
                continue;
            }

            let mut hits: Vec<(usize, String)> = Vec::new();
            for value in doc.get_string_list(source_field).unwrap_or_default() {
                self.scan(&value, &mut hits);
            }
            if hits.is_empty() {
                continue;
            }
            hits.sort_by_key(|(at, _)| *at);
            let payloads: Vec<String> = hits.into_iter().map(|(_, p)| p).collect();

            doc.write_to_field(dest_field, self.overwrite, &payloads)
                .map_err(|e| StageError::new(&self.name, e.to_string()))?;
        }
        Ok(Vec::new())
    }
}
