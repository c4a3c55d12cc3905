//! Label types and data structures.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Attribute key holding the label's class name.
pub const LABEL_ATTRIBUTE: &str = "label";

/// Attribute key holding the label's id.
pub const ID_ATTRIBUTE: &str = "id";

/// Attribute key holding detection bounds as `[x, y, width, height]`.
pub const BOUNDING_BOX_ATTRIBUTE: &str = "bounding_box";

/// Attribute key holding polyline vertices as a list of shapes.
pub const POINTS_ATTRIBUTE: &str = "points";

/// Attribute keys owned by the renderer (geometry), never pushed back to it
/// as an "update label" command.
pub const GEOMETRY_ATTRIBUTES: &[&str] = &[BOUNDING_BOX_ATTRIBUTE, POINTS_ATTRIBUTE, "closed", "filled"];

/// Check whether an attribute key carries renderer-owned geometry.
pub fn is_geometry_attribute(key: &str) -> bool {
    GEOMETRY_ATTRIBUTES.contains(&key)
}

/// Unique identifier for a label within a sample.
///
/// Shared identically by the label's renderer overlay and its session record.
#[derive(Clone, Debug, Hash, PartialOrd, Ord, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelId(String);

impl LabelId {
    /// Generate a fresh, time-ordered id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LabelId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for LabelId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Dot-delimited path of the field owning a label (e.g. `predictions.detections`).
#[derive(Clone, Debug, Hash, PartialOrd, Ord, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldPath(String);

impl FieldPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FieldPath {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kinds of label the editing session can create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelType {
    /// Whole-sample class label
    Classification,
    /// Axis-aligned bounding box
    Detection,
    /// Open or closed polyline
    Polyline,
}

impl LabelType {
    /// Get the display name for this label type.
    pub fn name(&self) -> &'static str {
        match self {
            LabelType::Classification => "Classification",
            LabelType::Detection => "Detection",
            LabelType::Polyline => "Polyline",
        }
    }

    /// Get all label types.
    pub fn all() -> &'static [LabelType] {
        &[
            LabelType::Classification,
            LabelType::Detection,
            LabelType::Polyline,
        ]
    }

    /// Whether labels of this type carry renderer geometry.
    pub fn is_spatial(&self) -> bool {
        !matches!(self, LabelType::Classification)
    }
}

/// A primitive attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<AttributeValue>),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Float(v) => Some(*v),
            AttributeValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[AttributeValue]> {
        match self {
            AttributeValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Convert a JSON document value. Objects are not primitives and yield `None`.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        Some(match value {
            serde_json::Value::Null => AttributeValue::Null,
            serde_json::Value::Bool(b) => AttributeValue::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => AttributeValue::Int(i),
                None => AttributeValue::Float(n.as_f64()?),
            },
            serde_json::Value::String(s) => AttributeValue::Text(s.clone()),
            serde_json::Value::Array(items) => AttributeValue::List(
                items.iter().map(Self::from_json).collect::<Option<Vec<_>>>()?,
            ),
            serde_json::Value::Object(_) => return None,
        })
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

/// Ordered attribute map of a label.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// Relative bounding box (all coordinates in `[0, 1]`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// Top-left corner X coordinate
    pub x: f64,
    /// Top-left corner Y coordinate
    pub y: f64,
    /// Width of the box
    pub width: f64,
    /// Height of the box
    pub height: f64,
}

impl Bounds {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Create bounds from two corner points.
    pub fn from_corners(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            x: x1.min(x2),
            y: y1.min(y2),
            width: (x2 - x1).abs(),
            height: (y2 - y1).abs(),
        }
    }

    /// Encode as the `bounding_box` attribute value.
    pub fn to_attribute(&self) -> AttributeValue {
        AttributeValue::List(vec![
            AttributeValue::Float(self.x),
            AttributeValue::Float(self.y),
            AttributeValue::Float(self.width),
            AttributeValue::Float(self.height),
        ])
    }

    /// Decode from a `bounding_box` attribute value.
    pub fn from_attribute(value: &AttributeValue) -> Option<Self> {
        match value.as_list()? {
            [x, y, w, h] => Some(Self::new(x.as_f64()?, y.as_f64()?, w.as_f64()?, h.as_f64()?)),
            _ => None,
        }
    }
}

/// Renderer-owned geometry of a label, derived from its attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Geometry {
    /// No spatial extent (classifications, or a spatial label not drawn yet).
    None,
    /// Detection bounds.
    Bounds(Bounds),
    /// Polyline shapes, each a list of `[x, y]` vertices.
    Points {
        shapes: Vec<Vec<[f64; 2]>>,
        closed: bool,
        filled: bool,
    },
}

impl Geometry {
    /// Derive the geometry of a label of `kind` from its attributes.
    pub fn from_attributes(kind: LabelType, attributes: &Attributes) -> Self {
        match kind {
            LabelType::Classification => Geometry::None,
            LabelType::Detection => attributes
                .get(BOUNDING_BOX_ATTRIBUTE)
                .and_then(Bounds::from_attribute)
                .map(Geometry::Bounds)
                .unwrap_or(Geometry::None),
            LabelType::Polyline => {
                let Some(shapes) = attributes
                    .get(POINTS_ATTRIBUTE)
                    .and_then(decode_shapes)
                else {
                    return Geometry::None;
                };
                let flag = |key: &str| {
                    attributes
                        .get(key)
                        .and_then(AttributeValue::as_bool)
                        .unwrap_or(false)
                };
                Geometry::Points {
                    shapes,
                    closed: flag("closed"),
                    filled: flag("filled"),
                }
            }
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Geometry::None)
    }

    /// Encode back into geometry attributes.
    pub fn to_attributes(&self) -> Attributes {
        let mut attributes = Attributes::new();
        match self {
            Geometry::None => {}
            Geometry::Bounds(bounds) => {
                attributes.insert(BOUNDING_BOX_ATTRIBUTE.to_string(), bounds.to_attribute());
            }
            Geometry::Points {
                shapes,
                closed,
                filled,
            } => {
                let shapes = shapes
                    .iter()
                    .map(|shape| {
                        AttributeValue::List(
                            shape
                                .iter()
                                .map(|[x, y]| {
                                    AttributeValue::List(vec![
                                        AttributeValue::Float(*x),
                                        AttributeValue::Float(*y),
                                    ])
                                })
                                .collect(),
                        )
                    })
                    .collect();
                attributes.insert(POINTS_ATTRIBUTE.to_string(), AttributeValue::List(shapes));
                attributes.insert("closed".to_string(), AttributeValue::Bool(*closed));
                attributes.insert("filled".to_string(), AttributeValue::Bool(*filled));
            }
        }
        attributes
    }
}

fn decode_shapes(value: &AttributeValue) -> Option<Vec<Vec<[f64; 2]>>> {
    value
        .as_list()?
        .iter()
        .map(|shape| {
            shape
                .as_list()?
                .iter()
                .map(|vertex| match vertex.as_list()? {
                    [x, y] => Some([x.as_f64()?, y.as_f64()?]),
                    _ => None,
                })
                .collect()
        })
        .collect()
}

/// Opaque handle to a label's overlay inside the external renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OverlayRef {
    /// Scene generation the overlay was created in
    pub scene: u64,
}

/// Persistence state of a label relative to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    /// Created locally and never submitted.
    #[default]
    Local,
    /// Matches the last successful persistence (or was loaded as-is).
    Synced,
    /// A request for this label is in flight.
    Pending(u64),
    /// Local state is ahead of the backend (a request failed, or the label
    /// was restored by undo).
    Dirty,
}

impl SyncState {
    /// Whether an exit should discard the label as an abandoned creation.
    pub fn is_local(&self) -> bool {
        matches!(self, SyncState::Local)
    }
}

/// One annotation instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    /// Unique identifier, also stored under the `id` attribute.
    pub id: LabelId,
    /// Field owning this label.
    pub field: FieldPath,
    /// Label type.
    pub kind: LabelType,
    /// Attribute map (always contains `id`).
    pub attributes: Attributes,
    /// Handle into the renderer, once an overlay exists.
    pub overlay: Option<OverlayRef>,
    /// True until the first successful persistence.
    pub is_new: bool,
    /// Persistence state.
    pub sync: SyncState,
}

impl Label {
    /// Create a brand-new label with a fresh id.
    pub fn new(kind: LabelType, field: FieldPath) -> Self {
        let id = LabelId::generate();
        let mut attributes = Attributes::new();
        attributes.insert(ID_ATTRIBUTE.to_string(), AttributeValue::from(id.as_str()));
        Self {
            id,
            field,
            kind,
            attributes,
            overlay: None,
            is_new: true,
            sync: SyncState::Local,
        }
    }

    /// Build a label that already exists in the backend.
    pub fn persisted(id: LabelId, field: FieldPath, kind: LabelType, mut attributes: Attributes) -> Self {
        attributes.insert(ID_ATTRIBUTE.to_string(), AttributeValue::from(id.as_str()));
        Self {
            id,
            field,
            kind,
            attributes,
            overlay: None,
            is_new: false,
            sync: SyncState::Synced,
        }
    }

    /// Set the class name.
    pub fn with_label(mut self, value: impl Into<String>) -> Self {
        self.attributes
            .insert(LABEL_ATTRIBUTE.to_string(), AttributeValue::Text(value.into()));
        self
    }

    /// Class name, if set.
    pub fn label_value(&self) -> Option<&str> {
        self.attributes.get(LABEL_ATTRIBUTE).and_then(AttributeValue::as_str)
    }

    /// Current geometry derived from the attributes.
    pub fn geometry(&self) -> Geometry {
        Geometry::from_attributes(self.kind, &self.attributes)
    }

    /// Attributes excluding renderer-owned geometry.
    pub fn display_attributes(&self) -> Attributes {
        self.attributes
            .iter()
            .filter(|(key, _)| !is_geometry_attribute(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

/// Keys whose values differ between two attribute maps, with the new value
/// (`None` when the key was removed).
pub fn diff_attributes(before: &Attributes, after: &Attributes) -> BTreeMap<String, Option<AttributeValue>> {
    let mut diff = BTreeMap::new();
    for (key, value) in after {
        if before.get(key) != Some(value) {
            diff.insert(key.clone(), Some(value.clone()));
        }
    }
    for key in before.keys() {
        if !after.contains_key(key) {
            diff.insert(key.clone(), None);
        }
    }
    diff
}
