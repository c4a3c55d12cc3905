//! Error types for the editing session.

use thiserror::Error;

use crate::model::{FieldPath, LabelId};

/// Errors that can occur while editing labels.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// Malformed attribute input, rejected before reaching the label
    #[error("Invalid value for '{attribute}': {message}")]
    Validation {
        /// Attribute the input was meant for
        attribute: String,
        /// Description of the problem
        message: String,
    },

    /// The field has no registered schema
    #[error("No schema for field '{field}'")]
    MissingSchema {
        /// The field path
        field: FieldPath,
    },

    /// The field's schema forbids edits
    #[error("Field '{field}' is read-only")]
    ReadOnlyField {
        /// The field path
        field: FieldPath,
    },

    /// No label with this id exists in the session
    #[error("Unknown label: {id}")]
    UnknownLabel {
        /// The missing label id
        id: LabelId,
    },

    /// A renderer event referenced an overlay that no longer exists
    #[error("Stale overlay: {id}")]
    StaleOverlay {
        /// The overlay id
        id: LabelId,
    },

    /// A persistence request failed
    #[error("Failed to {operation}: {message}")]
    Persistence {
        /// Operation that failed (e.g. "save label")
        operation: String,
        /// Backend error message
        message: String,
    },

    /// A mutation was attempted with no active editing target
    #[error("No label is being edited")]
    NotEditing,

    /// The operation would discard unsaved changes
    #[error("The label being edited has unsaved changes")]
    UnsavedChanges,
}

impl SessionError {
    /// Create a validation error for an attribute.
    pub fn validation(attribute: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            attribute: attribute.into(),
            message: message.into(),
        }
    }

    /// Create a persistence error.
    pub fn persistence(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Persistence {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Whether the error is a programming-contract violation rather than
    /// something the user can act on.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::NotEditing)
    }
}
