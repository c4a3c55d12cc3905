//! Reversible session operations recorded in the command history.
//!
//! Commands only go through the session's public mutators.

use std::collections::BTreeMap;

use super::{Editing, EditingSession};
use crate::history::Command;
use crate::model::{AttributeValue, Attributes, Label, LabelId};

/// A reversible edit of the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    /// Change attribute keys of a label
    UpdateAttributes {
        /// The label
        id: LabelId,
        /// Values of the touched keys before the edit (`None` = absent)
        before: BTreeMap<String, Option<AttributeValue>>,
        /// Values of the touched keys after the edit
        after: BTreeMap<String, Option<AttributeValue>>,
    },
    /// Add a new label and start editing it
    CreateLabel {
        /// The label that was created
        label: Label,
    },
    /// Remove a label
    DeleteLabel {
        /// The label as it should come back on undo
        label: Label,
    },
}

impl SessionCommand {
    /// Build an attribute update from the label's current state and a partial map.
    pub fn update(label: &Label, partial: &Attributes) -> Self {
        let before = partial
            .keys()
            .map(|key| (key.clone(), label.attributes.get(key).cloned()))
            .collect();
        let after = partial
            .iter()
            .map(|(key, value)| (key.clone(), Some(value.clone())))
            .collect();
        SessionCommand::UpdateAttributes {
            id: label.id.clone(),
            before,
            after,
        }
    }

    /// Whether the command would change nothing.
    pub fn is_noop(&self) -> bool {
        match self {
            SessionCommand::UpdateAttributes { before, after, .. } => before == after,
            _ => false,
        }
    }

    /// Id of the label the command touches.
    pub fn label_id(&self) -> &LabelId {
        match self {
            SessionCommand::UpdateAttributes { id, .. } => id,
            SessionCommand::CreateLabel { label } | SessionCommand::DeleteLabel { label } => {
                &label.id
            }
        }
    }
}

impl Command<EditingSession> for SessionCommand {
    fn execute(&self, session: &mut EditingSession) {
        match self {
            SessionCommand::UpdateAttributes { id, after, .. } => {
                if let Err(e) = session.apply_attributes(id, after) {
                    log::warn!("Skipping attribute update: {}", e);
                }
            }
            SessionCommand::CreateLabel { label } => {
                if let Err(e) = session.insert_label(label.clone()) {
                    log::warn!("Skipping label creation: {}", e);
                    return;
                }
                if session.editing().is_idle() || matches!(session.editing(), Editing::AwaitingSchema(_)) {
                    // Freshly inserted, so select cannot fail
                    let _ = session.select(&label.id);
                }
            }
            SessionCommand::DeleteLabel { label } => {
                session.remove_label(&label.id);
            }
        }
    }

    fn undo(&self, session: &mut EditingSession) {
        match self {
            SessionCommand::UpdateAttributes { id, before, .. } => {
                if let Err(e) = session.apply_attributes(id, before) {
                    log::warn!("Skipping attribute undo: {}", e);
                }
            }
            SessionCommand::CreateLabel { label } => {
                session.remove_label(&label.id);
            }
            SessionCommand::DeleteLabel { label } => {
                if let Err(e) = session.insert_label(label.clone()) {
                    log::warn!("Skipping label restore: {}", e);
                }
            }
        }
    }

    fn description(&self) -> String {
        match self {
            SessionCommand::UpdateAttributes { after, .. } => {
                let keys: Vec<&str> = after.keys().map(String::as_str).collect();
                format!("Edit {}", keys.join(", "))
            }
            SessionCommand::CreateLabel { label } => format!("Create {}", label.kind.name()),
            SessionCommand::DeleteLabel { label } => format!("Delete {}", label.kind.name()),
        }
    }
}
