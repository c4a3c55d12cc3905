//! Read-only view over label fields: which exist, their types, and whether
//! they can receive new labels.

use std::collections::{BTreeMap, HashMap};

use crate::error::SessionError;
use crate::model::{FieldPath, FieldSchema, LabelType};

/// Registry of field schemas for the current dataset.
#[derive(Debug, Clone, Default)]
pub struct FieldResolver {
    /// Schemas by field path, in lexical order
    schemas: BTreeMap<FieldPath, FieldSchema>,
    /// Declared default field per label type
    defaults: HashMap<LabelType, FieldPath>,
}

impl FieldResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration, mainly for setup code and tests.
    pub fn with_field(mut self, path: &str, schema: FieldSchema) -> Self {
        self.insert(FieldPath::from(path), schema);
        self
    }

    /// Register or replace the schema of a field.
    pub fn insert(&mut self, path: FieldPath, schema: FieldSchema) {
        log::debug!("Registered {} field '{}'", schema.kind.name(), path);
        self.schemas.insert(path, schema);
    }

    /// Remove a field, dropping it as a default if it was one.
    pub fn remove(&mut self, path: &FieldPath) -> Option<FieldSchema> {
        self.defaults.retain(|_, default| default != path);
        self.schemas.remove(path)
    }

    /// Replace every schema at once (the result of listing schemas).
    pub fn replace_all(&mut self, schemas: impl IntoIterator<Item = (FieldPath, FieldSchema)>) {
        self.schemas = schemas.into_iter().collect();
        let schemas = &self.schemas;
        self.defaults.retain(|_, path| schemas.contains_key(path));
        log::debug!("Field schemas replaced ({} fields)", self.schemas.len());
    }

    pub fn get(&self, path: &FieldPath) -> Option<&FieldSchema> {
        self.schemas.get(path)
    }

    /// Schema of a field, or a resolution error when it has none.
    pub fn require(&self, path: &FieldPath) -> Result<&FieldSchema, SessionError> {
        self.schemas
            .get(path)
            .ok_or_else(|| SessionError::MissingSchema { field: path.clone() })
    }

    /// Label type stored in a field.
    pub fn field_type(&self, path: &FieldPath) -> Option<LabelType> {
        self.schemas.get(path).map(|schema| schema.kind)
    }

    pub fn is_read_only(&self, path: &FieldPath) -> bool {
        self.schemas.get(path).is_some_and(|schema| schema.read_only)
    }

    /// Whether a field can receive new labels of `kind`.
    pub fn is_eligible(&self, path: &FieldPath, kind: LabelType) -> bool {
        self.schemas
            .get(path)
            .is_some_and(|schema| schema.kind == kind && schema.active && !schema.read_only)
    }

    /// Fields that can receive new labels of `kind`, in lexical order.
    pub fn eligible_fields(&self, kind: LabelType) -> Vec<&FieldPath> {
        self.schemas
            .keys()
            .filter(|path| self.is_eligible(path, kind))
            .collect()
    }

    /// Declare the default field for a label type.
    pub fn set_default(&mut self, kind: LabelType, path: FieldPath) {
        self.defaults.insert(kind, path);
    }

    /// Default field for `kind`: the declared default when it is eligible,
    /// otherwise the first eligible field.
    pub fn default_field(&self, kind: LabelType) -> Option<&FieldPath> {
        self.defaults
            .get(&kind)
            .filter(|path| self.is_eligible(path, kind))
            .or_else(|| self.eligible_fields(kind).into_iter().next())
    }

    /// Mark a field's schema active. Returns false when the field is unknown.
    pub fn activate(&mut self, path: &FieldPath) -> bool {
        self.set_active(path, true)
    }

    /// Mark a field's schema inactive. Returns false when the field is unknown.
    pub fn deactivate(&mut self, path: &FieldPath) -> bool {
        self.set_active(path, false)
    }

    fn set_active(&mut self, path: &FieldPath, active: bool) -> bool {
        match self.schemas.get_mut(path) {
            Some(schema) => {
                schema.active = active;
                log::debug!("Field '{}' active = {}", path, active);
                true
            }
            None => false,
        }
    }

    /// All registered fields in lexical order.
    pub fn fields(&self) -> impl Iterator<Item = (&FieldPath, &FieldSchema)> {
        self.schemas.iter()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> FieldResolver {
        FieldResolver::new()
            .with_field("predictions", FieldSchema::new(LabelType::Detection, &["car"]))
            .with_field("ground_truth", FieldSchema::new(LabelType::Detection, &["person"]))
            .with_field("frozen", FieldSchema::new(LabelType::Detection, &[]).read_only())
            .with_field("hidden", FieldSchema::new(LabelType::Detection, &[]).inactive())
            .with_field("weather", FieldSchema::new(LabelType::Classification, &["sunny"]))
    }

    #[test]
    fn test_eligible_fields_filter_and_order() {
        let resolver = resolver();
        let fields: Vec<&str> = resolver
            .eligible_fields(LabelType::Detection)
            .into_iter()
            .map(FieldPath::as_str)
            .collect();
        assert_eq!(fields, vec!["ground_truth", "predictions"]);
        assert!(resolver.eligible_fields(LabelType::Polyline).is_empty());
    }

    #[test]
    fn test_default_field_prefers_declared() {
        let mut resolver = resolver();
        assert_eq!(
            resolver.default_field(LabelType::Detection),
            Some(&FieldPath::from("ground_truth"))
        );

        resolver.set_default(LabelType::Detection, FieldPath::from("predictions"));
        assert_eq!(
            resolver.default_field(LabelType::Detection),
            Some(&FieldPath::from("predictions"))
        );

        // An ineligible declared default falls back to the first eligible field
        resolver.set_default(LabelType::Detection, FieldPath::from("frozen"));
        assert_eq!(
            resolver.default_field(LabelType::Detection),
            Some(&FieldPath::from("ground_truth"))
        );
    }

    #[test]
    fn test_activate_and_deactivate() {
        let mut resolver = resolver();
        let hidden = FieldPath::from("hidden");
        assert!(!resolver.is_eligible(&hidden, LabelType::Detection));
        assert!(resolver.activate(&hidden));
        assert!(resolver.is_eligible(&hidden, LabelType::Detection));
        assert!(resolver.deactivate(&hidden));
        assert!(!resolver.activate(&FieldPath::from("missing")));
    }

    #[test]
    fn test_require_reports_missing_schema() {
        let resolver = resolver();
        assert!(resolver.require(&FieldPath::from("weather")).is_ok());
        assert_eq!(
            resolver.require(&FieldPath::from("nope")).unwrap_err(),
            SessionError::MissingSchema {
                field: FieldPath::from("nope")
            }
        );
    }

    #[test]
    fn test_remove_drops_default() {
        let mut resolver = resolver();
        resolver.set_default(LabelType::Classification, FieldPath::from("weather"));
        resolver.remove(&FieldPath::from("weather"));
        assert_eq!(resolver.default_field(LabelType::Classification), None);
        assert_eq!(resolver.field_type(&FieldPath::from("weather")), None);
    }
}
