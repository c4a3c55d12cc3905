//! Data models for the label editing session.

mod label;
mod schema;

pub use label::{
    Attributes, AttributeValue, BOUNDING_BOX_ATTRIBUTE, Bounds, FieldPath, GEOMETRY_ATTRIBUTES,
    Geometry, ID_ATTRIBUTE, LABEL_ATTRIBUTE, Label, LabelId, LabelType, OverlayRef,
    POINTS_ATTRIBUTE, SyncState, diff_attributes, is_geometry_attribute,
};
pub use schema::{AttributeKind, AttributeSpec, FieldSchema};
