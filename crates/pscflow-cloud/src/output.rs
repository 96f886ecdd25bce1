//! Parsing of `terraform output -json` into a typed record
//!
//! Missing keys are filled from per-folder defaults and unparseable output
//! degrades to a fallback record, so a successful apply is never reported as
//! failed just because output retrieval went wrong.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// How a missing output key is filled in
#[derive(Debug, Clone, PartialEq)]
pub enum OutputDefault {
    /// Empty string
    Empty,
    /// A fixed placeholder value
    Literal(Value),
    /// Echo a caller-known input, or empty string when unknown
    Input(String),
    /// Caller-known input with a suffix appended (e.g. `<region>-a`)
    InputWithSuffix(String, String),
}

impl OutputDefault {
    pub fn text(value: impl Into<String>) -> Self {
        OutputDefault::Literal(Value::String(value.into()))
    }

    fn resolve(&self, known: &BTreeMap<String, String>) -> Value {
        match self {
            OutputDefault::Empty => Value::String(String::new()),
            OutputDefault::Literal(v) => v.clone(),
            OutputDefault::Input(key) => {
                Value::String(known.get(key).cloned().unwrap_or_default())
            }
            OutputDefault::InputWithSuffix(key, suffix) => match known.get(key) {
                Some(v) if !v.is_empty() => Value::String(format!("{v}{suffix}")),
                _ => Value::String(String::new()),
            },
        }
    }
}

/// Expected key and its default
#[derive(Debug, Clone, PartialEq)]
pub struct OutputField {
    pub key: String,
    pub default: OutputDefault,
}

/// The keys one resource folder is expected to output
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputSchema {
    fields: Vec<OutputField>,
}

impl OutputSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, key: impl Into<String>, default: OutputDefault) -> Self {
        self.fields.push(OutputField {
            key: key.into(),
            default,
        });
        self
    }

    /// Shorthand for a key defaulting to the empty string
    pub fn text(self, key: impl Into<String>) -> Self {
        self.field(key, OutputDefault::Empty)
    }

    pub fn fields(&self) -> &[OutputField] {
        &self.fields
    }
}

/// Flat key/value result of a successful apply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub values: BTreeMap<String, Value>,

    /// True when the raw output could not be parsed and only caller inputs were echoed
    #[serde(default)]
    pub fallback: bool,
}

impl OutputRecord {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// String value, treating an empty string as absent
    pub fn non_empty(&self, key: &str) -> Option<&str> {
        self.get_str(key).filter(|s| !s.is_empty())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Extract the `{key: {value}}` map from raw output, `None` when it is not a JSON object
pub fn raw_outputs(raw: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw.trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Parse raw terraform output against `schema`.
///
/// `known` holds inputs the caller already has (project, region); they feed
/// defaults and make up the whole record when the output is unparseable.
pub fn parse(raw: &str, schema: &OutputSchema, known: &BTreeMap<String, String>) -> OutputRecord {
    let Some(outputs) = raw_outputs(raw) else {
        tracing::warn!("Terraform output is not valid JSON; returning fallback record");
        return fallback(known);
    };

    let mut values = BTreeMap::new();

    for (key, entry) in &outputs {
        let value = match entry {
            Value::Object(obj) => obj.get("value").cloned().unwrap_or(Value::Null),
            other => other.clone(),
        };
        values.insert(key.clone(), value);
    }

    for field in schema.fields() {
        let missing = values.get(&field.key).is_none_or(Value::is_null);
        if missing {
            values.insert(field.key.clone(), field.default.resolve(known));
        }
    }

    OutputRecord {
        values,
        fallback: false,
    }
}

/// Minimal record echoing only the caller-known inputs
pub fn fallback(known: &BTreeMap<String, String>) -> OutputRecord {
    OutputRecord {
        values: known
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
        fallback: true,
    }
}
