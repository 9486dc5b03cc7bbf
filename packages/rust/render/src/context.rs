//! Merge context handed to the renderer.

use std::collections::HashMap;

use auditdoc_shared::{AuditDocError, Result};
use serde::Serialize;
use serde_json::{Map, Value};

/// A helper callable from a template as `{{ name(arg) }}`.
pub type Helper = fn(&Value) -> Result<Value>;

/// Values and helpers visible to a template.
///
/// Built from a typed, serializable context struct; the struct's keys are
/// the only names a template may reference.
#[derive(Debug, Clone, Default)]
pub struct MergeContext {
    values: Map<String, Value>,
    helpers: HashMap<&'static str, Helper>,
}

impl MergeContext {
    pub fn new(values: Map<String, Value>) -> Self {
        Self {
            values,
            helpers: HashMap::new(),
        }
    }

    /// Serialize `context` into merge values. It must serialize to an object.
    pub fn from_serializable<T: Serialize>(context: &T) -> Result<Self> {
        match serde_json::to_value(context) {
            Ok(Value::Object(values)) => Ok(Self::new(values)),
            Ok(other) => Err(AuditDocError::rendering(format!(
                "merge context must be an object, got {}",
                kind_of(&other)
            ))),
            Err(e) => Err(AuditDocError::rendering(format!(
                "merge context does not serialize: {e}"
            ))),
        }
    }

    /// Register a helper under `name`.
    pub fn with_helper(mut self, name: &'static str, helper: Helper) -> Self {
        self.helpers.insert(name, helper);
        self
    }

    /// Override or add a single value.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub(crate) fn helper(&self, name: &str) -> Option<Helper> {
        self.helpers.get(name).copied()
    }
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}
