//! Sample documents and hydration of their labels into the session.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::fields::FieldResolver;
use crate::model::{AttributeValue, Attributes, FieldPath, Label, LabelId, LabelType};

/// Identifier of a sample (one displayed item).
#[derive(Clone, Debug, Hash, PartialOrd, Ord, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct SampleId(String);

impl SampleId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SampleId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The sample currently displayed, as served by the query layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SampleDocument {
    /// Sample id
    pub id: SampleId,
    /// Media slice being displayed (grouped datasets), if any
    #[serde(default)]
    pub slice: Option<String>,
    /// Field values by field path
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl SampleDocument {
    pub fn new(id: &str) -> Self {
        Self {
            id: SampleId::from(id),
            ..Self::default()
        }
    }

    pub fn with_slice(mut self, slice: &str) -> Self {
        self.slice = Some(slice.to_string());
        self
    }

    pub fn with_field(mut self, path: &str, value: serde_json::Value) -> Self {
        self.fields.insert(path.to_string(), value);
        self
    }

    /// Whether switching from `self` to `other` requires a session reset.
    pub fn is_same_view(&self, other: &SampleDocument) -> bool {
        self.id == other.id && self.slice == other.slice
    }

    /// Build session labels for every field with a registered schema.
    pub fn labels(&self, resolver: &FieldResolver) -> Vec<Label> {
        let mut labels = Vec::new();
        for (path, value) in &self.fields {
            let field = FieldPath::from(path.as_str());
            let Some(kind) = resolver.field_type(&field) else {
                continue;
            };
            for doc in label_documents(kind, value) {
                match label_from_document(kind, &field, doc) {
                    Some(label) => labels.push(label),
                    None => log::warn!("Skipping malformed {} in field '{}'", kind.name(), field),
                }
            }
        }
        labels
    }
}

/// Individual label documents inside a field value.
fn label_documents(kind: LabelType, value: &serde_json::Value) -> Vec<&serde_json::Value> {
    let container = match kind {
        LabelType::Classification => None,
        LabelType::Detection => Some("detections"),
        LabelType::Polyline => Some("polylines"),
    };
    match (container.and_then(|key| value.get(key)), value) {
        (Some(serde_json::Value::Array(items)), _) => items.iter().collect(),
        (_, serde_json::Value::Null) => Vec::new(),
        (_, serde_json::Value::Object(_)) => vec![value],
        _ => Vec::new(),
    }
}

fn label_from_document(kind: LabelType, field: &FieldPath, doc: &serde_json::Value) -> Option<Label> {
    let object = doc.as_object()?;
    let id = object
        .get("_id")
        .or_else(|| object.get("id"))
        .and_then(|v| match v {
            serde_json::Value::String(s) => Some(s.clone()),
            // Extended JSON object ids
            serde_json::Value::Object(o) => o.get("$oid").and_then(|v| v.as_str()).map(str::to_string),
            _ => None,
        })?;

    let attributes: Attributes = object
        .iter()
        .filter(|(key, _)| !key.starts_with('_') && key.as_str() != "id")
        .filter_map(|(key, value)| AttributeValue::from_json(value).map(|v| (key.clone(), v)))
        .collect();

    Some(Label::persisted(LabelId::from(id), field.clone(), kind, attributes))
}
