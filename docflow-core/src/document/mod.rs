//! The [`Document`] value type and its mutation contract.
//!
//! A Document is a record from a source system to be passed through a
//! pipeline, enriched, and delivered to a destination system. It is backed by
//! a JSON object whose field insertion order is preserved. A small set of
//! fields is reserved for the run-coordination core:
//!
//! - `id`: non-empty textual identity, assigned at creation;
//! - `run_id`: run association, set at most once;
//! - `.children`: documents spawned by enrichment, owned by their parent;
//! - `errors`: append-only error log, writable only via [`Document::log_error`].
//!
//! User-facing mutators reject all of the above with
//! [`DocflowError::ReservedField`]. Equality is structural over the payload
//! tree; the transient dropped flag does not participate.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::core::{DocflowError, Result};

/// Reserved field holding the document identity.
pub const ID_FIELD: &str = "id";
/// Reserved field associating a document with a run.
pub const RUNID_FIELD: &str = "run_id";
/// Append-only error log field.
pub const ERROR_FIELD: &str = "errors";
/// Reserved field holding child documents.
pub const CHILDREN_FIELD: &str = ".children";

/// Fields that user-facing mutators may never touch.
pub const RESERVED_FIELDS: [&str; 3] = [ID_FIELD, RUNID_FIELD, CHILDREN_FIELD];

/// Merge behavior for [`Document::update`] and [`Document::rename_field`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    /// Replace any current value with the provided one(s).
    Overwrite,
    /// Convert the target to a sequence and append the provided value(s).
    Append,
    /// Leave an existing target untouched; populate it only if absent.
    Skip,
}

/// A payload value accepted by the typed Document setters.
///
/// The tagged representation is internal; callers pass plain Rust values and
/// read them back through the typed accessors.
pub trait IntoFieldValue {
    /// Converts the value into its wire representation.
    fn into_field_value(self) -> Value;
}

impl IntoFieldValue for &str {
    fn into_field_value(self) -> Value {
        Value::String(self.to_string())
    }
}

impl IntoFieldValue for String {
    fn into_field_value(self) -> Value {
        Value::String(self)
    }
}

impl IntoFieldValue for i64 {
    fn into_field_value(self) -> Value {
        Value::from(self)
    }
}

impl IntoFieldValue for i32 {
    fn into_field_value(self) -> Value {
        Value::from(self)
    }
}

impl IntoFieldValue for f64 {
    fn into_field_value(self) -> Value {
        Value::from(self)
    }
}

impl IntoFieldValue for bool {
    fn into_field_value(self) -> Value {
        Value::Bool(self)
    }
}

impl IntoFieldValue for DateTime<Utc> {
    /// Timestamps travel as ISO-8601 UTC strings.
    fn into_field_value(self) -> Value {
        Value::String(self.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

impl IntoFieldValue for Value {
    fn into_field_value(self) -> Value {
        self
    }
}

/// A mutable record flowing through the pipeline.
#[derive(Debug, Clone)]
pub struct Document {
    data: Map<String, Value>,
    dropped: bool,
}

impl Document {
    /// Creates a document with the given id.
    ///
    /// Fails with [`DocflowError::InvalidDocument`] when the id is empty.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(DocflowError::InvalidDocument {
                message: "id must be non-empty".to_string(),
            });
        }
        let mut data = Map::new();
        data.insert(ID_FIELD.to_string(), Value::String(id));
        Ok(Self {
            data,
            dropped: false,
        })
    }

    /// Creates a document with the given id and run association.
    pub fn new_with_run_id(id: impl Into<String>, run_id: impl Into<String>) -> Result<Self> {
        let mut doc = Self::new(id)?;
        doc.data
            .insert(RUNID_FIELD.to_string(), Value::String(run_id.into()));
        Ok(doc)
    }

    /// Builds a document from a parsed JSON value.
    ///
    /// The value must be an object carrying a non-empty textual `id`.
    pub fn from_json(value: Value) -> Result<Self> {
        let data = match value {
            Value::Object(map) => map,
            other => {
                return Err(DocflowError::InvalidDocument {
                    message: format!("expected a JSON object, got {other}"),
                })
            }
        };
        match data.get(ID_FIELD) {
            None | Some(Value::Null) => {
                return Err(DocflowError::InvalidDocument {
                    message: "id is missing".to_string(),
                })
            }
            Some(Value::String(id)) if !id.is_empty() => {}
            Some(_) => {
                return Err(DocflowError::InvalidDocument {
                    message: "id is present but empty or not a string".to_string(),
                })
            }
        }
        Ok(Self {
            data,
            dropped: false,
        })
    }

    /// Parses a document from its JSON wire form.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Self::from_json(serde_json::from_str(json)?)
    }

    /// Parses a document from JSON, rewriting the id through `id_updater`.
    pub fn from_json_str_with_id(
        json: &str,
        id_updater: impl FnOnce(&str) -> String,
    ) -> Result<Self> {
        let mut doc = Self::from_json_str(json)?;
        let new_id = id_updater(doc.id());
        if new_id.is_empty() {
            return Err(DocflowError::InvalidDocument {
                message: "rewritten id must be non-empty".to_string(),
            });
        }
        doc.data
            .insert(ID_FIELD.to_string(), Value::String(new_id));
        Ok(doc)
    }

    /// The document identity.
    pub fn id(&self) -> &str {
        match self.data.get(ID_FIELD) {
            Some(Value::String(id)) => id,
            // Construction guarantees a textual id.
            _ => "",
        }
    }

    /// The run this document belongs to, if it has been published.
    pub fn run_id(&self) -> Option<&str> {
        match self.data.get(RUNID_FIELD) {
            Some(Value::String(run_id)) => Some(run_id),
            _ => None,
        }
    }

    /// Associates the document with a run.
    ///
    /// Fails with [`DocflowError::RunIdAlreadySet`] if a run association is
    /// already present.
    pub fn initialize_run_id(&mut self, run_id: impl Into<String>) -> Result<()> {
        if self.data.contains_key(RUNID_FIELD) {
            return Err(DocflowError::RunIdAlreadySet);
        }
        self.data
            .insert(RUNID_FIELD.to_string(), Value::String(run_id.into()));
        Ok(())
    }

    /// Clears the run association, if any.
    pub fn clear_run_id(&mut self) {
        self.data.remove(RUNID_FIELD);
    }

    /// True when the field is present, even with a null value.
    pub fn has(&self, name: &str) -> bool {
        self.data.contains_key(name)
    }

    /// True when the field is present with a non-null value.
    pub fn has_non_null(&self, name: &str) -> bool {
        matches!(self.data.get(name), Some(v) if !v.is_null())
    }

    /// True when the field holds a sequence.
    pub fn is_multi_valued(&self, name: &str) -> bool {
        matches!(self.data.get(name), Some(Value::Array(_)))
    }

    fn guard(&self, name: &str) -> Result<()> {
        if RESERVED_FIELDS.contains(&name) || name == ERROR_FIELD {
            return Err(DocflowError::ReservedField {
                field: name.to_string(),
            });
        }
        Ok(())
    }

    /// Sets a field to a single value, replacing any current content.
    pub fn set_field<V: IntoFieldValue>(&mut self, name: &str, value: V) -> Result<()> {
        self.guard(name)?;
        self.data.insert(name.to_string(), value.into_field_value());
        Ok(())
    }

    /// Appends a value to a field, promoting it to a sequence if needed.
    ///
    /// A field promoted this way retains its prior scalar as element 0.
    pub fn add_to_field<V: IntoFieldValue>(&mut self, name: &str, value: V) -> Result<()> {
        self.guard(name)?;
        self.convert_to_list(name);
        if let Some(Value::Array(items)) = self.data.get_mut(name) {
            items.push(value.into_field_value());
        }
        Ok(())
    }

    /// Sets the field if absent, otherwise appends to it.
    ///
    /// Called once on an absent field this creates a single-valued field;
    /// repeated calls build up a sequence.
    pub fn set_or_add<V: IntoFieldValue>(&mut self, name: &str, value: V) -> Result<()> {
        if self.has(name) {
            self.add_to_field(name, value)
        } else {
            self.set_field(name, value)
        }
    }

    /// Splices a field from another document into this one.
    ///
    /// When the field is absent here it is copied as-is; on collision this
    /// field is promoted to a sequence and the other document's value(s) are
    /// appended (sequences are unpacked).
    pub fn set_or_add_from(&mut self, name: &str, other: &Document) -> Result<()> {
        self.guard(name)?;
        let Some(other_value) = other.data.get(name) else {
            return Ok(());
        };
        if !self.has(name) {
            self.data.insert(name.to_string(), other_value.clone());
            return Ok(());
        }
        self.convert_to_list(name);
        if let Some(Value::Array(items)) = self.data.get_mut(name) {
            match other_value {
                Value::Array(other_items) => items.extend(other_items.iter().cloned()),
                scalar => items.push(scalar.clone()),
            }
        }
        Ok(())
    }

    /// Splices every non-reserved field of `other` into this document.
    pub fn set_or_add_all(&mut self, other: &Document) -> Result<()> {
        let names: Vec<String> = other
            .data
            .keys()
            .filter(|name| !RESERVED_FIELDS.contains(&name.as_str()) && *name != ERROR_FIELD)
            .cloned()
            .collect();
        for name in names {
            self.set_or_add_from(&name, other)?;
        }
        Ok(())
    }

    /// Updates the field according to the provided [`UpdateMode`].
    ///
    /// OVERWRITE replaces current content with the first value and appends
    /// the rest; APPEND appends all values; SKIP changes nothing when the
    /// field already exists. The field is created if absent. An empty value
    /// slice is a no-op.
    pub fn update<V: IntoFieldValue + Clone>(
        &mut self,
        name: &str,
        mode: UpdateMode,
        values: &[V],
    ) -> Result<()> {
        self.guard(name)?;
        if values.is_empty() {
            return Ok(());
        }
        if self.has(name) && mode == UpdateMode::Skip {
            return Ok(());
        }
        let mut values = values.iter();
        if mode == UpdateMode::Overwrite {
            if let Some(first) = values.next() {
                self.set_field(name, first.clone())?;
            }
        }
        for value in values {
            self.set_or_add(name, value.clone())?;
        }
        Ok(())
    }

    /// Writes values to a field, replacing (`overwrite`) or appending.
    pub fn write_to_field<V: IntoFieldValue + Clone>(
        &mut self,
        name: &str,
        overwrite: bool,
        values: &[V],
    ) -> Result<()> {
        let mode = if overwrite {
            UpdateMode::Overwrite
        } else {
            UpdateMode::Append
        };
        self.update(name, mode, values)
    }

    /// Removes a field.
    pub fn remove_field(&mut self, name: &str) -> Result<()> {
        self.guard(name)?;
        self.data.remove(name);
        Ok(())
    }

    /// Removes the element at `index` from a multi-valued field.
    ///
    /// An out-of-range index, an absent field, or a single-valued field is a
    /// no-op.
    pub fn remove_from_array(&mut self, name: &str, index: usize) -> Result<()> {
        self.guard(name)?;
        if let Some(Value::Array(items)) = self.data.get_mut(name) {
            if index < items.len() {
                items.remove(index);
            }
        }
        Ok(())
    }

    /// Moves the content of `old_name` into `new_name`.
    ///
    /// When the target already exists: OVERWRITE replaces it, APPEND converts
    /// it to a sequence and appends the source value(s) (unpacking sequence
    /// sources), SKIP leaves it untouched. The source field is always removed.
    pub fn rename_field(&mut self, old_name: &str, new_name: &str, mode: UpdateMode) -> Result<()> {
        self.guard(old_name)?;
        self.guard(new_name)?;
        let Some(old_values) = self.data.remove(old_name) else {
            return Ok(());
        };
        if self.has(new_name) {
            match mode {
                UpdateMode::Skip => return Ok(()),
                UpdateMode::Append => {
                    self.convert_to_list(new_name);
                    if let Some(Value::Array(items)) = self.data.get_mut(new_name) {
                        match old_values {
                            Value::Array(old_items) => items.extend(old_items),
                            scalar => items.push(scalar),
                        }
                    }
                    return Ok(());
                }
                UpdateMode::Overwrite => {}
            }
        }
        self.data.insert(new_name.to_string(), old_values);
        Ok(())
    }

    /// Reads a field as a string.
    ///
    /// Returns `None` when the field is absent or null (call [`Self::has`] to
    /// distinguish). On a multi-valued field the first element is returned.
    /// Numeric and boolean scalars are coerced to their textual rendering.
    pub fn get_string(&self, name: &str) -> Option<String> {
        let node = self.first_value(name)?;
        coerce_string(node)
    }

    /// Reads a field as a list of strings.
    ///
    /// A single-valued field yields a one-element sequence. Returns `None`
    /// when the field is absent.
    pub fn get_string_list(&self, name: &str) -> Option<Vec<String>> {
        match self.data.get(name)? {
            Value::Array(items) => Some(
                items
                    .iter()
                    .map(|v| coerce_string(v).unwrap_or_default())
                    .collect(),
            ),
            single => Some(vec![coerce_string(single).unwrap_or_default()]),
        }
    }

    /// Reads a field as a boolean, coerce-or-`None`.
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.first_value(name)?.as_bool()
    }

    /// Reads a field as a signed integer, coerce-or-`None`.
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.first_value(name)?.as_i64()
    }

    /// Reads a field as a float, coerce-or-`None`.
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.first_value(name)?.as_f64()
    }

    /// Reads a field as an ISO-8601 UTC timestamp, coerce-or-`None`.
    pub fn get_timestamp(&self, name: &str) -> Option<DateTime<Utc>> {
        let text = self.get_string(name)?;
        DateTime::parse_from_rfc3339(&text)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    fn first_value(&self, name: &str) -> Option<&Value> {
        match self.data.get(name)? {
            Value::Array(items) => items.first(),
            single => Some(single),
        }
    }

    fn convert_to_list(&mut self, name: &str) {
        match self.data.get(name) {
            None => {
                self.data.insert(name.to_string(), Value::Array(Vec::new()));
            }
            Some(Value::Array(_)) => {}
            Some(_) => {
                if let Some(current) = self.data.remove(name) {
                    self.data
                        .insert(name.to_string(), Value::Array(vec![current]));
                }
            }
        }
    }

    /// Attaches a child document.
    ///
    /// Children are owned by their parent; the child's payload is moved in.
    pub fn add_child(&mut self, child: Document) {
        let children = self
            .data
            .entry(CHILDREN_FIELD.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(items) = children {
            items.push(Value::Object(child.data));
        }
    }

    /// True when the document carries child documents.
    pub fn has_children(&self) -> bool {
        matches!(self.data.get(CHILDREN_FIELD), Some(Value::Array(items)) if !items.is_empty())
    }

    /// Returns deep copies of the attached children.
    ///
    /// Copies prevent aliasing into the parent's payload tree. Elements that
    /// fail document validation are logged and skipped.
    pub fn get_children(&self) -> Vec<Document> {
        let Some(Value::Array(items)) = self.data.get(CHILDREN_FIELD) else {
            return Vec::new();
        };
        let mut children = Vec::with_capacity(items.len());
        for element in items {
            match Document::from_json(element.clone()) {
                Ok(child) => children.push(child),
                Err(err) => {
                    tracing::error!(error = %err, "unable to instantiate child document");
                }
            }
        }
        children
    }

    /// Appends a description to the document's error log.
    pub fn log_error(&mut self, description: impl Into<String>) {
        // Bypasses the reserved-field guard: this is the one sanctioned
        // writer of the errors field. A scalar errors value (from the wire)
        // is promoted to a sequence first.
        let entry = self
            .data
            .entry(ERROR_FIELD.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if !entry.is_array() {
            let prior = std::mem::replace(entry, Value::Array(Vec::new()));
            if let Value::Array(items) = entry {
                items.push(prior);
            }
        }
        if let Value::Array(items) = entry {
            items.push(Value::String(description.into()));
        }
    }

    /// The accumulated error log.
    pub fn errors(&self) -> Vec<String> {
        self.get_string_list(ERROR_FIELD).unwrap_or_default()
    }

    /// Marks the document as dropped.
    ///
    /// Dropped documents are acknowledged by the worker but not forwarded to
    /// the indexer. The flag is transient and does not serialize.
    pub fn set_dropped(&mut self, dropped: bool) {
        self.dropped = dropped;
    }

    /// True when a stage has dropped this document.
    pub fn is_dropped(&self) -> bool {
        self.dropped
    }

    /// Serializes the payload to a plain key-value tree.
    pub fn as_map(&self) -> Map<String, Value> {
        self.data.clone()
    }

    /// Clones the document under a new identity.
    pub fn clone_with_new_id(&self, new_id: impl Into<String>) -> Result<Self> {
        let new_id = new_id.into();
        if new_id.is_empty() {
            return Err(DocflowError::InvalidDocument {
                message: "id must be non-empty".to_string(),
            });
        }
        let mut doc = self.clone();
        doc.data
            .insert(ID_FIELD.to_string(), Value::String(new_id));
        Ok(doc)
    }
}

fn coerce_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

impl PartialEq for Document {
    /// Structural equality over the payload tree.
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl std::fmt::Display for Document {
    /// Canonical JSON rendering.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rendered = serde_json::to_string(&self.data).map_err(|_| std::fmt::Error)?;
        f.write_str(&rendered)
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.data.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Document::from_json(value).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn construction_requires_non_empty_id() {
        assert!(Document::new("").is_err());
        let doc = Document::new("doc1").unwrap();
        assert_eq!(doc.id(), "doc1");
        assert_eq!(doc.run_id(), None);
    }

    #[test]
    fn from_json_rejects_missing_or_bad_id() {
        assert!(Document::from_json_str(r#"{"field":"value"}"#).is_err());
        assert!(Document::from_json_str(r#"{"id":""}"#).is_err());
        assert!(Document::from_json_str(r#"{"id":5}"#).is_err());
        assert!(Document::from_json_str(r#"{"id":null}"#).is_err());
        assert!(Document::from_json_str(r#"["id"]"#).is_err());
        assert!(Document::from_json_str(r#"{"id":"doc1"}"#).is_ok());
    }

    #[test]
    fn from_json_with_id_rewrites() {
        let doc =
            Document::from_json_str_with_id(r#"{"id":"1"}"#, |id| format!("prefix-{id}")).unwrap();
        assert_eq!(doc.id(), "prefix-1");
    }

    #[test]
    fn reserved_fields_are_rejected() {
        let mut doc = Document::new("doc1").unwrap();
        for field in [ID_FIELD, RUNID_FIELD, CHILDREN_FIELD, ERROR_FIELD] {
            assert!(matches!(
                doc.set_field(field, "x"),
                Err(DocflowError::ReservedField { .. })
            ));
            assert!(doc.add_to_field(field, "x").is_err());
            assert!(doc.remove_field(field).is_err());
            assert!(doc.rename_field(field, "other", UpdateMode::Overwrite).is_err());
            assert!(doc.rename_field("other", field, UpdateMode::Overwrite).is_err());
        }
    }

    #[test]
    fn run_id_initializes_once() {
        let mut doc = Document::new("doc1").unwrap();
        doc.initialize_run_id("run1").unwrap();
        assert_eq!(doc.run_id(), Some("run1"));
        assert!(matches!(
            doc.initialize_run_id("run2"),
            Err(DocflowError::RunIdAlreadySet)
        ));
        doc.clear_run_id();
        assert_eq!(doc.run_id(), None);
        doc.initialize_run_id("run3").unwrap();
        assert_eq!(doc.run_id(), Some("run3"));
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut doc = Document::new("doc1").unwrap();
        doc.set_field("name", "Matt").unwrap();
        assert_eq!(doc.get_string("name").as_deref(), Some("Matt"));
        doc.set_field("count", 5i64).unwrap();
        assert_eq!(doc.get_i64("count"), Some(5));
        doc.set_field("score", 0.5f64).unwrap();
        assert_eq!(doc.get_f64("score"), Some(0.5));
        doc.set_field("flag", true).unwrap();
        assert_eq!(doc.get_bool("flag"), Some(true));
    }

    #[test]
    fn timestamps_serialize_as_iso8601_utc() {
        let mut doc = Document::new("doc1").unwrap();
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        doc.set_field("created", ts).unwrap();
        assert_eq!(
            doc.get_string("created").as_deref(),
            Some("2024-03-01T12:30:00.000Z")
        );
        assert_eq!(doc.get_timestamp("created"), Some(ts));
    }

    #[test]
    fn add_to_field_promotes_and_keeps_prior_scalar_first() {
        let mut doc = Document::new("doc1").unwrap();
        doc.set_field("field", "v1").unwrap();
        assert!(!doc.is_multi_valued("field"));
        doc.add_to_field("field", "v2").unwrap();
        assert!(doc.is_multi_valued("field"));
        assert_eq!(
            doc.get_string_list("field").unwrap(),
            vec!["v1".to_string(), "v2".to_string()]
        );
        // getString on a multi-valued field returns the first element.
        assert_eq!(doc.get_string("field").as_deref(), Some("v1"));
    }

    #[test]
    fn get_string_list_on_single_value_is_one_element() {
        let mut doc = Document::new("doc1").unwrap();
        doc.set_field("field", "only").unwrap();
        assert_eq!(doc.get_string_list("field").unwrap(), vec!["only"]);
        assert_eq!(doc.get_string_list("absent"), None);
    }

    #[test]
    fn set_or_add_applied_n_times_yields_length_n() {
        let mut doc = Document::new("doc1").unwrap();
        for i in 0..5i64 {
            doc.set_or_add("field", i).unwrap();
        }
        assert_eq!(doc.get_string_list("field").unwrap().len(), 5);
    }

    #[test]
    fn set_or_add_from_other_document() {
        let mut a = Document::new("a").unwrap();
        let mut b = Document::new("b").unwrap();
        b.set_field("field", "from-b").unwrap();

        // Absent here: copied as-is, stays single-valued.
        a.set_or_add_from("field", &b).unwrap();
        assert!(!a.is_multi_valued("field"));
        assert_eq!(a.get_string("field").as_deref(), Some("from-b"));

        // Collision: promoted to a sequence, other value appended.
        a.set_or_add_from("field", &b).unwrap();
        assert_eq!(
            a.get_string_list("field").unwrap(),
            vec!["from-b", "from-b"]
        );

        // Sequence sources are unpacked.
        b.add_to_field("field", "second").unwrap();
        a.set_or_add_from("field", &b).unwrap();
        assert_eq!(
            a.get_string_list("field").unwrap(),
            vec!["from-b", "from-b", "from-b", "second"]
        );

        // Absent on the other document: no-op.
        a.set_or_add_from("missing", &b).unwrap();
        assert!(!a.has("missing"));
    }

    #[test]
    fn set_or_add_all_skips_reserved_fields() {
        let mut a = Document::new("a").unwrap();
        let mut b = Document::new_with_run_id("b", "run1").unwrap();
        b.set_field("one", 1i64).unwrap();
        b.set_field("two", 2i64).unwrap();
        b.log_error("oops");
        a.set_or_add_all(&b).unwrap();
        assert_eq!(a.id(), "a");
        assert_eq!(a.run_id(), None);
        assert_eq!(a.get_i64("one"), Some(1));
        assert_eq!(a.get_i64("two"), Some(2));
        assert!(a.errors().is_empty());
    }

    #[test]
    fn update_modes() {
        let mut doc = Document::new("doc1").unwrap();
        doc.update("field", UpdateMode::Overwrite, &["a", "b"]).unwrap();
        assert_eq!(doc.get_string_list("field").unwrap(), vec!["a", "b"]);

        doc.update("field", UpdateMode::Overwrite, &["c"]).unwrap();
        assert_eq!(doc.get_string_list("field").unwrap(), vec!["c"]);

        doc.update("field", UpdateMode::Append, &["d"]).unwrap();
        assert_eq!(doc.get_string_list("field").unwrap(), vec!["c", "d"]);

        doc.update("field", UpdateMode::Skip, &["e"]).unwrap();
        assert_eq!(doc.get_string_list("field").unwrap(), vec!["c", "d"]);

        // SKIP on an absent field still populates it.
        doc.update("fresh", UpdateMode::Skip, &["x"]).unwrap();
        assert_eq!(doc.get_string("fresh").as_deref(), Some("x"));

        // Empty value slice is a no-op.
        doc.update("fresh", UpdateMode::Overwrite, &[] as &[&str]).unwrap();
        assert_eq!(doc.get_string("fresh").as_deref(), Some("x"));
    }

    #[test]
    fn write_to_field_is_overwrite_or_append_sugar() {
        let mut doc = Document::new("doc1").unwrap();
        doc.write_to_field("field", false, &["a"]).unwrap();
        doc.write_to_field("field", false, &["b"]).unwrap();
        assert_eq!(doc.get_string_list("field").unwrap(), vec!["a", "b"]);
        doc.write_to_field("field", true, &["c"]).unwrap();
        assert_eq!(doc.get_string_list("field").unwrap(), vec!["c"]);
    }

    #[test]
    fn rename_append_unpacks_sequences() {
        // {a:["x"], b:["y"]} -> rename(a, b, APPEND) -> {b:["y","x"]}
        let mut doc = Document::new("doc1").unwrap();
        doc.add_to_field("a", "x").unwrap();
        doc.add_to_field("b", "y").unwrap();
        doc.rename_field("a", "b", UpdateMode::Append).unwrap();
        assert!(!doc.has("a"));
        assert_eq!(doc.get_string_list("b").unwrap(), vec!["y", "x"]);
    }

    #[test]
    fn rename_overwrite_round_trips() {
        let mut doc = Document::new("doc1").unwrap();
        doc.set_field("a", "value").unwrap();
        let original = doc.clone();
        doc.rename_field("a", "b", UpdateMode::Overwrite).unwrap();
        assert!(!doc.has("a"));
        doc.rename_field("b", "a", UpdateMode::Overwrite).unwrap();
        assert_eq!(doc, original);
    }

    #[test]
    fn rename_skip_drops_the_source() {
        let mut doc = Document::new("doc1").unwrap();
        doc.set_field("a", "x").unwrap();
        doc.set_field("b", "y").unwrap();
        doc.rename_field("a", "b", UpdateMode::Skip).unwrap();
        assert!(!doc.has("a"));
        assert_eq!(doc.get_string("b").as_deref(), Some("y"));
    }

    #[test]
    fn remove_from_array_out_of_range_is_noop() {
        let mut doc = Document::new("doc1").unwrap();
        doc.add_to_field("field", "a").unwrap();
        doc.add_to_field("field", "b").unwrap();
        doc.remove_from_array("field", 7).unwrap();
        assert_eq!(doc.get_string_list("field").unwrap(), vec!["a", "b"]);
        doc.remove_from_array("field", 0).unwrap();
        assert_eq!(doc.get_string_list("field").unwrap(), vec!["b"]);
    }

    #[test]
    fn children_are_deep_copied() {
        let mut parent = Document::new("parent").unwrap();
        let mut child = Document::new("child").unwrap();
        child.set_field("field", "original").unwrap();
        parent.add_child(child);
        assert!(parent.has_children());

        let mut fetched = parent.get_children();
        assert_eq!(fetched.len(), 1);
        fetched[0].set_field("field", "mutated").unwrap();

        // Mutating the copy must not reach back into the parent.
        let refetched = parent.get_children();
        assert_eq!(refetched[0].get_string("field").as_deref(), Some("original"));
    }

    #[test]
    fn clone_is_deep_and_independent() {
        let mut doc = Document::new("doc1").unwrap();
        doc.set_field("field", "value").unwrap();
        doc.add_child(Document::new("child").unwrap());
        let clone = doc.clone();
        assert_eq!(clone, doc);

        let mut mutated = clone.clone();
        mutated.set_field("field", "other").unwrap();
        assert_ne!(mutated, doc);
        assert_eq!(doc.get_string("field").as_deref(), Some("value"));
    }

    #[test]
    fn clone_with_new_id_changes_identity_only() {
        let mut doc = Document::new("doc1").unwrap();
        doc.set_field("field", "value").unwrap();
        let renamed = doc.clone_with_new_id("doc2").unwrap();
        assert_eq!(renamed.id(), "doc2");
        assert_eq!(renamed.get_string("field").as_deref(), Some("value"));
        assert!(doc.clone_with_new_id("").is_err());
    }

    #[test]
    fn log_error_appends() {
        let mut doc = Document::new("doc1").unwrap();
        doc.log_error("first");
        doc.log_error("second");
        assert_eq!(doc.errors(), vec!["first", "second"]);
    }

    #[test]
    fn dropped_flag_is_transient() {
        let mut doc = Document::new("doc1").unwrap();
        doc.set_dropped(true);
        assert!(doc.is_dropped());
        let wire = doc.to_string();
        let restored = Document::from_json_str(&wire).unwrap();
        assert!(!restored.is_dropped());
        // The flag does not participate in equality.
        assert_eq!(restored, doc);
    }

    #[test]
    fn wire_round_trip_preserves_payload() {
        let mut doc = Document::new_with_run_id("doc1", "run1").unwrap();
        doc.set_field("name", "Matt").unwrap();
        doc.add_to_field("tags", "a").unwrap();
        doc.add_to_field("tags", "b").unwrap();
        doc.add_child(Document::new("child").unwrap());
        let restored = Document::from_json_str(&doc.to_string()).unwrap();
        assert_eq!(restored, doc);
        assert_eq!(restored.get_children().len(), 1);
    }

    #[test]
    fn as_map_reflects_payload() {
        let mut doc = Document::new("doc1").unwrap();
        doc.set_field("field", "value").unwrap();
        let map = doc.as_map();
        assert_eq!(map.get("id"), Some(&Value::String("doc1".into())));
        assert_eq!(map.get("field"), Some(&Value::String("value".into())));
    }
}
