//! Editing session state machine.
//!
//! The session owns the label list of one sample and the single "currently
//! edited" slot. It never talks to the renderer or the backend itself: every
//! structural or attribute change is queued as a [`SessionEvent`] that the
//! caller drains and relays.

mod commands;

pub use commands::SessionCommand;

use std::collections::BTreeMap;

use crate::error::SessionError;
use crate::model::{
    Attributes, AttributeValue, FieldPath, Label, LabelId, LabelType, SyncState, diff_attributes,
    is_geometry_attribute,
};

/// What the session is currently editing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Editing {
    /// Nothing is being edited.
    #[default]
    Idle,
    /// A label of this type was requested but no field can hold it yet.
    AwaitingSchema(LabelType),
    /// The label with this id is being edited.
    Editing(LabelId),
}

impl Editing {
    /// Id of the label being edited, if any.
    pub fn label_id(&self) -> Option<&LabelId> {
        match self {
            Editing::Editing(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Editing::Idle)
    }
}

/// Change notifications queued for the renderer bridge and the persistence layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A label entered the list.
    LabelAdded(LabelId),
    /// A label left the list (carries the removed label).
    LabelRemoved(Label),
    /// A label's attributes changed.
    AttributesChanged(LabelId),
    /// The editing slot changed.
    EditingChanged {
        previous: Option<LabelId>,
        current: Option<LabelId>,
    },
}

/// Everything needed to persist the label under edit.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveRequest {
    pub id: LabelId,
    pub field: FieldPath,
    pub kind: LabelType,
    /// True when the label has never been persisted
    pub is_new: bool,
    /// Full attribute map at save time
    pub attributes: Attributes,
    /// Keys changed since the saved snapshot (`None` = removed)
    pub diff: BTreeMap<String, Option<AttributeValue>>,
    /// Snapshot prior to this save, restored if persistence fails
    pub previous_snapshot: Option<Attributes>,
}

/// The per-sample editing session.
#[derive(Debug, Default)]
pub struct EditingSession {
    /// Increments on every reset; used to tag async requests
    epoch: u64,
    labels: Vec<Label>,
    editing: Editing,
    saved_snapshot: Option<Attributes>,
    events: Vec<SessionEvent>,
}

impl EditingSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every label and return to idle, starting a new epoch.
    pub fn reset(&mut self) {
        for label in std::mem::take(&mut self.labels) {
            self.events.push(SessionEvent::LabelRemoved(label));
        }
        self.set_editing(Editing::Idle);
        self.saved_snapshot = None;
        self.epoch += 1;
        log::debug!("Session reset (epoch {})", self.epoch);
    }

    /// Load labels from a sample document.
    pub fn hydrate(&mut self, labels: impl IntoIterator<Item = Label>) {
        for label in labels {
            if let Err(e) = self.insert_label(label) {
                log::warn!("Skipping label while hydrating: {}", e);
            }
        }
        log::debug!("Session hydrated with {} labels", self.labels.len());
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn editing(&self) -> &Editing {
        &self.editing
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn label(&self, id: &LabelId) -> Option<&Label> {
        self.labels.iter().find(|l| &l.id == id)
    }

    pub fn contains(&self, id: &LabelId) -> bool {
        self.label(id).is_some()
    }

    /// The label being edited.
    pub fn current(&self) -> Option<&Label> {
        self.editing.label_id().and_then(|id| self.label(id))
    }

    pub fn saved_snapshot(&self) -> Option<&Attributes> {
        self.saved_snapshot.as_ref()
    }

    /// True iff a snapshot exists and differs from the current attributes.
    pub fn has_changes(&self) -> bool {
        match (&self.saved_snapshot, self.current()) {
            (Some(snapshot), Some(label)) => snapshot != &label.attributes,
            _ => false,
        }
    }

    /// Drain queued change notifications.
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    // ------------------------------------------------------------------
    // State transitions
    // ------------------------------------------------------------------

    /// Build a fresh label for `field`, pre-filled with `label_value`. The
    /// label is not inserted; record it through [`SessionCommand::CreateLabel`].
    pub fn new_label(kind: LabelType, field: FieldPath, label_value: Option<String>) -> Label {
        let label = Label::new(kind, field);
        match label_value {
            Some(value) => label.with_label(value),
            None => label,
        }
    }

    /// No eligible field exists for `kind`; wait for one to be provisioned.
    pub fn await_schema(&mut self, kind: LabelType) {
        log::debug!("⏳ Awaiting schema for {}", kind.name());
        self.set_editing(Editing::AwaitingSchema(kind));
        self.saved_snapshot = None;
    }

    /// Begin editing an existing label, capturing its attributes as the
    /// saved snapshot.
    pub fn select(&mut self, id: &LabelId) -> Result<(), SessionError> {
        let attributes = self
            .label(id)
            .map(|l| l.attributes.clone())
            .ok_or_else(|| SessionError::UnknownLabel { id: id.clone() })?;
        self.saved_snapshot = Some(attributes);
        self.set_editing(Editing::Editing(id.clone()));
        log::debug!("✏️ Editing label {}", id);
        Ok(())
    }

    /// Merge `partial` into the current label's attributes. The saved
    /// snapshot is left untouched.
    pub fn update_attributes(&mut self, partial: &Attributes) -> Result<(), SessionError> {
        let id = self.editing.label_id().cloned().ok_or(SessionError::NotEditing)?;
        let changes = partial
            .iter()
            .map(|(key, value)| (key.clone(), Some(value.clone())))
            .collect();
        self.apply_attributes(&id, &changes)
    }

    /// Set, replace or remove (`None`) attribute keys of any label.
    pub fn apply_attributes(
        &mut self,
        id: &LabelId,
        changes: &BTreeMap<String, Option<AttributeValue>>,
    ) -> Result<(), SessionError> {
        let label = self.label_mut(id)?;
        let mut changed = false;
        for (key, value) in changes {
            let previous = match value {
                Some(value) => label.attributes.insert(key.clone(), value.clone()),
                None => label.attributes.remove(key),
            };
            changed |= previous.as_ref() != value.as_ref();
        }
        if changed {
            self.events.push(SessionEvent::AttributesChanged(id.clone()));
        }
        Ok(())
    }

    /// Replace a label's renderer-owned geometry attributes.
    pub fn apply_geometry(&mut self, id: &LabelId, geometry: Attributes) -> Result<(), SessionError> {
        let label = self.label_mut(id)?;
        let mut changes: BTreeMap<String, Option<AttributeValue>> = label
            .attributes
            .keys()
            .filter(|key| is_geometry_attribute(key) && !geometry.contains_key(*key))
            .map(|key| (key.clone(), None))
            .collect();
        changes.extend(geometry.into_iter().map(|(key, value)| (key, Some(value))));
        self.apply_attributes(id, &changes)
    }

    /// Prepare persistence of the label under edit and mark it saved: the
    /// snapshot becomes the current attributes.
    pub fn prepare_save(&mut self) -> Result<SaveRequest, SessionError> {
        let label = self.current().ok_or(SessionError::NotEditing)?;
        let previous_snapshot = self.saved_snapshot.clone();
        let diff = match &previous_snapshot {
            Some(snapshot) if !label.is_new => diff_attributes(snapshot, &label.attributes),
            _ => diff_attributes(&Attributes::new(), &label.attributes),
        };
        let request = SaveRequest {
            id: label.id.clone(),
            field: label.field.clone(),
            kind: label.kind,
            is_new: label.is_new,
            attributes: label.attributes.clone(),
            diff,
            previous_snapshot,
        };
        self.saved_snapshot = Some(request.attributes.clone());
        Ok(request)
    }

    /// Restore the saved snapshot after a failed save of the label under edit.
    pub fn restore_snapshot(&mut self, id: &LabelId, snapshot: Option<Attributes>) {
        if self.editing.label_id() == Some(id) {
            self.saved_snapshot = snapshot;
        }
    }

    /// Revert the label under edit to its saved snapshot.
    pub fn revert(&mut self) -> Result<(), SessionError> {
        let id = self.editing.label_id().cloned().ok_or(SessionError::NotEditing)?;
        let Some(snapshot) = self.saved_snapshot.clone() else {
            return Ok(());
        };
        let label = self.label_mut(&id)?;
        if label.attributes != snapshot {
            label.attributes = snapshot;
            self.events.push(SessionEvent::AttributesChanged(id));
        }
        Ok(())
    }

    /// Leave the editing state. A label created in this session and never
    /// submitted is discarded. Returns the discarded label, if any.
    pub fn exit(&mut self) -> Option<Label> {
        let abandoned = self
            .current()
            .filter(|l| l.is_new && l.sync.is_local())
            .map(|l| l.id.clone());
        let discarded = abandoned.and_then(|id| self.remove_label(&id));
        self.set_editing(Editing::Idle);
        self.saved_snapshot = None;
        log::debug!("Session idle");
        discarded
    }

    // ------------------------------------------------------------------
    // Structural mutators
    // ------------------------------------------------------------------

    /// Add a label to the list.
    pub fn insert_label(&mut self, label: Label) -> Result<(), SessionError> {
        if self.contains(&label.id) {
            return Err(SessionError::validation(
                "id",
                format!("duplicate label id {}", label.id),
            ));
        }
        let id = label.id.clone();
        self.labels.push(label);
        self.events.push(SessionEvent::LabelAdded(id));
        Ok(())
    }

    /// Remove a label from the list, leaving the editing slot if it held it.
    pub fn remove_label(&mut self, id: &LabelId) -> Option<Label> {
        let index = self.labels.iter().position(|l| &l.id == id)?;
        if self.editing.label_id() == Some(id) {
            self.set_editing(Editing::Idle);
            self.saved_snapshot = None;
        }
        let label = self.labels.remove(index);
        self.events.push(SessionEvent::LabelRemoved(label.clone()));
        Some(label)
    }

    /// Update a label's persistence state.
    pub fn set_sync(&mut self, id: &LabelId, sync: SyncState) -> Result<(), SessionError> {
        self.label_mut(id)?.sync = sync;
        Ok(())
    }

    /// Record a successful persistence of a label.
    pub fn mark_persisted(&mut self, id: &LabelId) -> Result<(), SessionError> {
        let label = self.label_mut(id)?;
        label.is_new = false;
        label.sync = SyncState::Synced;
        Ok(())
    }

    /// Attach the renderer handle of a label's overlay.
    pub fn set_overlay(&mut self, id: &LabelId, overlay: Option<crate::model::OverlayRef>) {
        if let Ok(label) = self.label_mut(id) {
            label.overlay = overlay;
        }
    }

    fn label_mut(&mut self, id: &LabelId) -> Result<&mut Label, SessionError> {
        self.labels
            .iter_mut()
            .find(|l| &l.id == id)
            .ok_or_else(|| SessionError::UnknownLabel { id: id.clone() })
    }

    fn set_editing(&mut self, editing: Editing) {
        if self.editing == editing {
            return;
        }
        let previous = self.editing.label_id().cloned();
        self.editing = editing;
        let current = self.editing.label_id().cloned();
        if previous != current {
            self.events.push(SessionEvent::EditingChanged { previous, current });
        }
    }
}
