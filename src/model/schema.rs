//! Field schema data model: label type, allowed classes and attribute specs.

use serde::{Deserialize, Serialize};

use super::label::{AttributeValue, LabelType};
use crate::error::SessionError;

/// Kind of value an attribute accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    /// Free-form text
    #[default]
    Text,
    /// Integer number
    Int,
    /// Floating point number
    Float,
    /// Boolean flag
    Bool,
    /// One of the attribute's `values`
    Select,
    /// JSON list of primitives
    List,
}

/// Schema-defined attribute of a label field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSpec {
    /// Attribute name
    pub name: String,
    /// Accepted value kind
    #[serde(default)]
    pub kind: AttributeKind,
    /// Allowed values for `Select` attributes
    #[serde(default)]
    pub values: Vec<String>,
    /// Whether the attribute can be edited
    #[serde(default)]
    pub read_only: bool,
}

impl AttributeSpec {
    pub fn new(name: &str, kind: AttributeKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            values: Vec::new(),
            read_only: false,
        }
    }

    pub fn with_values(mut self, values: &[&str]) -> Self {
        self.values = values.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Parse raw user input into a value of this attribute's kind.
    ///
    /// Empty input clears the attribute to `Null`. Nothing returned as an
    /// error ever reaches a label's attributes.
    pub fn parse_input(&self, raw: &str) -> Result<AttributeValue, SessionError> {
        if self.read_only {
            return Err(SessionError::validation(&self.name, "attribute is read-only"));
        }

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(AttributeValue::Null);
        }

        match self.kind {
            AttributeKind::Text => Ok(AttributeValue::Text(raw.to_string())),
            AttributeKind::Int => trimmed
                .parse::<i64>()
                .map(AttributeValue::Int)
                .map_err(|e| SessionError::validation(&self.name, format!("not an integer: {}", e))),
            AttributeKind::Float => trimmed
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(AttributeValue::Float)
                .ok_or_else(|| SessionError::validation(&self.name, "not a finite number")),
            AttributeKind::Bool => match trimmed.to_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(AttributeValue::Bool(true)),
                "false" | "no" | "0" => Ok(AttributeValue::Bool(false)),
                _ => Err(SessionError::validation(&self.name, "expected true or false")),
            },
            AttributeKind::Select => {
                if self.values.iter().any(|v| v == trimmed) {
                    Ok(AttributeValue::Text(trimmed.to_string()))
                } else {
                    Err(SessionError::validation(
                        &self.name,
                        format!("'{}' is not one of {:?}", trimmed, self.values),
                    ))
                }
            }
            AttributeKind::List => {
                let json: serde_json::Value = serde_json::from_str(trimmed)
                    .map_err(|e| SessionError::validation(&self.name, format!("invalid JSON: {}", e)))?;
                match AttributeValue::from_json(&json) {
                    Some(value @ AttributeValue::List(_)) => Ok(value),
                    _ => Err(SessionError::validation(&self.name, "expected a list of primitives")),
                }
            }
        }
    }
}

/// Per-field configuration of label type, allowed classes and attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Type of label stored in the field
    #[serde(rename = "type")]
    pub kind: LabelType,
    /// Allowed class names, in declaration order
    #[serde(default)]
    pub classes: Vec<String>,
    /// Schema-defined attributes
    #[serde(default)]
    pub attributes: Vec<AttributeSpec>,
    /// Whether labels in the field may be edited
    #[serde(default)]
    pub read_only: bool,
    /// Whether the schema is active for annotation
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl FieldSchema {
    /// Create an active, writable schema for `kind` with the given classes.
    pub fn new(kind: LabelType, classes: &[&str]) -> Self {
        Self {
            kind,
            classes: classes.iter().map(|c| c.to_string()).collect(),
            attributes: Vec::new(),
            read_only: false,
            active: true,
        }
    }

    pub fn with_attribute(mut self, spec: AttributeSpec) -> Self {
        self.attributes.push(spec);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Look up an attribute spec by name.
    pub fn attribute(&self, name: &str) -> Option<&AttributeSpec> {
        self.attributes.iter().find(|spec| spec.name == name)
    }

    /// Spec used for `label` input: a select over `classes` when declared,
    /// free text otherwise.
    pub fn label_spec(&self) -> AttributeSpec {
        if self.classes.is_empty() {
            AttributeSpec::new(super::label::LABEL_ATTRIBUTE, AttributeKind::Text)
        } else {
            AttributeSpec {
                name: super::label::LABEL_ATTRIBUTE.to_string(),
                kind: AttributeKind::Select,
                values: self.classes.clone(),
                read_only: self.read_only,
            }
        }
    }
}
