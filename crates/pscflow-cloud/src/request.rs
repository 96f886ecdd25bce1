//! Apply requests submitted by the calling layer

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A terraform variable value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VarValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<String>),
}

impl VarValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            VarValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for VarValue {
    fn from(value: &str) -> Self {
        VarValue::String(value.to_string())
    }
}

impl From<String> for VarValue {
    fn from(value: String) -> Self {
        VarValue::String(value)
    }
}

impl From<bool> for VarValue {
    fn from(value: bool) -> Self {
        VarValue::Bool(value)
    }
}

impl From<i64> for VarValue {
    fn from(value: i64) -> Self {
        VarValue::Int(value)
    }
}

impl From<u32> for VarValue {
    fn from(value: u32) -> Self {
        VarValue::Int(i64::from(value))
    }
}

impl From<Vec<String>> for VarValue {
    fn from(value: Vec<String>) -> Self {
        VarValue::List(value)
    }
}

/// Variables keyed by terraform variable name, ordered for stable output
pub type Variables = BTreeMap<String, VarValue>;

/// A deploy request for one resource folder.
///
/// Built once by the caller and never mutated afterwards; every retry reuses
/// the same variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyRequest {
    resource_folder: String,
    variables: Variables,
    capabilities_already_enabled: bool,
}

impl ApplyRequest {
    pub fn new(resource_folder: impl Into<String>) -> Self {
        Self {
            resource_folder: resource_folder.into(),
            variables: Variables::new(),
            capabilities_already_enabled: false,
        }
    }

    pub fn var(mut self, key: impl Into<String>, value: impl Into<VarValue>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    /// Set `key` only when `value` is present
    pub fn var_opt<V: Into<VarValue>>(self, key: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(v) => self.var(key, v),
            None => self,
        }
    }

    pub fn vars(mut self, variables: Variables) -> Self {
        self.variables.extend(variables);
        self
    }

    pub fn capabilities_already_enabled(mut self, enabled: bool) -> Self {
        self.capabilities_already_enabled = enabled;
        self
    }

    pub fn resource_folder(&self) -> &str {
        &self.resource_folder
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn are_capabilities_enabled(&self) -> bool {
        self.capabilities_already_enabled
    }

    pub fn string_var(&self, key: &str) -> Option<&str> {
        self.variables.get(key).and_then(VarValue::as_str)
    }

    /// Project the request targets (`project_id`, or `producer_project_id` for SQL)
    pub fn project_id(&self) -> Option<&str> {
        self.string_var("project_id")
            .or_else(|| self.string_var("producer_project_id"))
    }

    pub fn region(&self) -> Option<&str> {
        self.string_var("region")
    }

    /// Variables rendered as the contents of `terraform.tfvars.json`
    pub fn tfvars_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.variables)
    }
}
