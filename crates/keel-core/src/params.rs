use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::secret::Secret;

/// A declared manifest input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Secret parameters are sealed on binding and never logged or echoed.
    #[serde(default)]
    pub secret: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    Plain(Value),
    Secret(Secret),
}

/// Raw values supplied by the caller, before matching against declarations.
#[derive(Debug, Clone, Default)]
pub struct ParameterValues {
    values: BTreeMap<String, Value>,
}

impl ParameterValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    /// Set only when no value was supplied yet.
    pub fn set_default(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.entry(name.into()).or_insert_with(|| value.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

/// Parameter values matched to their declarations, secrets already sealed.
#[derive(Debug, Clone, Default)]
pub struct BoundParameters {
    pub(crate) values: BTreeMap<String, ParameterValue>,
    pub(crate) missing: BTreeSet<String>,
}

impl BoundParameters {
    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.values.get(name)
    }

    /// Declared parameters that have neither a supplied value nor a default.
    pub fn missing(&self) -> impl Iterator<Item = &str> {
        self.missing.iter().map(String::as_str)
    }

    pub fn is_missing(&self, name: &str) -> bool {
        self.missing.contains(name)
    }

    pub fn secrets(&self) -> impl Iterator<Item = &Secret> {
        self.values.values().filter_map(|v| match v {
            ParameterValue::Secret(s) => Some(s),
            ParameterValue::Plain(_) => None,
        })
    }
}

pub(crate) fn seal(value: Value) -> Secret {
    match value {
        Value::String(s) => Secret::new(s),
        other => Secret::new(other.to_string()),
    }
}
