//! Quick draw: back-to-back creation of same-type labels with the field and
//! class filled in automatically.
//!
//! Resolution order for the target field:
//! 1. While active, the field last used for the type
//! 2. The eligible field holding the most labels of the type (ties: lexical order)
//! 3. The resolver's default field for the type
//!
//! Resolution order for the class name:
//! 1. While active, the class last used in the field
//! 2. The most frequent class among session labels of the type (ties: first seen)
//! 3. The first class declared in the field's schema

use std::collections::{BTreeMap, HashMap};

use crate::fields::FieldResolver;
use crate::model::{FieldPath, Label, LabelType};

/// Auto-assignment policy and rapid-creation toggle.
#[derive(Debug, Clone, Default)]
pub struct QuickDraw {
    /// Type being chained while active
    active: Option<LabelType>,
    last_field_by_type: HashMap<LabelType, FieldPath>,
    last_label_by_field: HashMap<FieldPath, String>,
}

impl QuickDraw {
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn quick draw on for `kind`.
    pub fn enable(&mut self, kind: LabelType) {
        self.active = Some(kind);
        log::debug!("⚡ Quick draw enabled for {}", kind.name());
    }

    /// Turn quick draw off. Tracked entries are kept but no longer consulted.
    pub fn disable(&mut self) {
        if self.active.take().is_some() {
            log::debug!("⚡ Quick draw disabled");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// The type being chained, while active.
    pub fn mode(&self) -> Option<LabelType> {
        self.active
    }

    /// Pick the field a new label of `kind` goes into. `None` means no
    /// eligible field exists and a schema must be provisioned first.
    pub fn resolve_field(
        &self,
        kind: LabelType,
        labels: &[Label],
        resolver: &FieldResolver,
    ) -> Option<FieldPath> {
        if self.is_active() {
            if let Some(path) = self
                .last_field_by_type
                .get(&kind)
                .filter(|path| resolver.is_eligible(path, kind))
            {
                return Some(path.clone());
            }
        }

        let mut counts: BTreeMap<&FieldPath, usize> = BTreeMap::new();
        for label in labels
            .iter()
            .filter(|l| l.kind == kind && resolver.is_eligible(&l.field, kind))
        {
            *counts.entry(&label.field).or_default() += 1;
        }
        // BTreeMap iterates lexically; keep the first of equal counts
        let mut most: Option<(&FieldPath, usize)> = None;
        for (path, count) in counts {
            if most.is_none_or(|(_, best)| count > best) {
                most = Some((path, count));
            }
        }
        if let Some((path, _)) = most {
            return Some(path.clone());
        }

        resolver.default_field(kind).cloned()
    }

    /// Pick the class name for a new label of `kind` in `field`.
    pub fn resolve_label_value(
        &self,
        kind: LabelType,
        field: &FieldPath,
        labels: &[Label],
        resolver: &FieldResolver,
    ) -> Option<String> {
        if self.is_active() {
            if let Some(value) = self.last_label_by_field.get(field) {
                return Some(value.clone());
            }
        }

        // Counts in first-seen order so ties go to the earliest label
        let mut counts: Vec<(&str, usize)> = Vec::new();
        for value in labels
            .iter()
            .filter(|l| l.kind == kind)
            .filter_map(Label::label_value)
        {
            match counts.iter_mut().find(|(v, _)| *v == value) {
                Some((_, count)) => *count += 1,
                None => counts.push((value, 1)),
            }
        }
        let mut most: Option<(&str, usize)> = None;
        for (value, count) in counts {
            if most.is_none_or(|(_, best)| count > best) {
                most = Some((value, count));
            }
        }
        if let Some((value, _)) = most {
            return Some(value.to_string());
        }

        resolver
            .get(field)
            .and_then(|schema| schema.classes.first().cloned())
    }

    /// Remember the field and class of a successfully saved label.
    pub fn track(&mut self, kind: LabelType, field: &FieldPath, label_value: Option<&str>) {
        self.last_field_by_type.insert(kind, field.clone());
        if let Some(value) = label_value {
            self.last_label_by_field.insert(field.clone(), value.to_string());
        }
        log::trace!("Quick draw tracked {} -> {} ({:?})", kind.name(), field, label_value);
    }
}
