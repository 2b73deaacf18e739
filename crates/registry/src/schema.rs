//! Parameter schemas for operation declarations
//!
//! A schema is the typed description of the arguments an operation accepts.
//! It is advertised to the model as JSON Schema and enforced against the
//! model's arguments right before the handler runs.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::OperationError;

/// Accepted value type for a single parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    /// String restricted to a fixed set of values
    StringEnum(Vec<String>),
    /// Array of strings
    StringArray,
}

impl ParamKind {
    /// JSON Schema fragment for this kind
    fn to_json(&self, description: &str) -> Value {
        match self {
            ParamKind::String => json!({ "type": "string", "description": description }),
            ParamKind::Integer => json!({ "type": "integer", "description": description }),
            ParamKind::Number => json!({ "type": "number", "description": description }),
            ParamKind::Boolean => json!({ "type": "boolean", "description": description }),
            ParamKind::StringEnum(values) => json!({
                "type": "string",
                "description": description,
                "enum": values,
            }),
            ParamKind::StringArray => json!({
                "type": "array",
                "description": description,
                "items": { "type": "string" },
            }),
        }
    }

    /// Check a concrete value against this kind
    fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Number => value.is_number(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::StringEnum(values) => value
                .as_str()
                .map(|s| values.iter().any(|v| v == s))
                .unwrap_or(false),
            ParamKind::StringArray => value
                .as_array()
                .map(|items| items.iter().all(|i| i.is_string()))
                .unwrap_or(false),
        }
    }
}

/// One declared parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub description: String,
    pub kind: ParamKind,
    pub required: bool,
}

impl ParamSpec {
    pub fn required(
        name: impl Into<String>,
        description: impl Into<String>,
        kind: ParamKind,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind,
            required: true,
        }
    }

    pub fn optional(
        name: impl Into<String>,
        description: impl Into<String>,
        kind: ParamKind,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind,
            required: false,
        }
    }
}

/// Ordered parameter declarations for one operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamSchema {
    params: Vec<ParamSpec>,
}

impl ParamSchema {
    /// Schema for an operation that takes no arguments
    pub fn empty() -> Self {
        Self::default()
    }

    /// Append a parameter declaration
    pub fn with(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    /// JSON Schema object advertised to the model
    pub fn to_json_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();

        for param in &self.params {
            properties.insert(param.name.clone(), param.kind.to_json(&param.description));
            if param.required {
                required.push(Value::String(param.name.clone()));
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Validate concrete arguments against this schema.
    ///
    /// Unknown keys are tolerated (the model sometimes invents extras); the
    /// handler sees them but declared parameters are checked strictly.
    pub fn validate(&self, args: &Value) -> Result<(), OperationError> {
        let map = match args {
            Value::Object(map) => map,
            Value::Null => {
                if self.params.iter().any(|p| p.required) {
                    return Err(OperationError::Validation(
                        "arguments missing entirely".to_string(),
                    ));
                }
                return Ok(());
            }
            other => {
                return Err(OperationError::Validation(format!(
                    "arguments must be an object, got {}",
                    value_kind(other)
                )))
            }
        };

        for param in &self.params {
            match map.get(&param.name) {
                Some(value) => {
                    if !param.kind.accepts(value) {
                        return Err(OperationError::Validation(format!(
                            "parameter '{}' has wrong type or value",
                            param.name
                        )));
                    }
                }
                None if param.required => {
                    return Err(OperationError::Validation(format!(
                        "missing required parameter '{}'",
                        param.name
                    )))
                }
                None => {}
            }
        }

        Ok(())
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
