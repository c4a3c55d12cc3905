//! Label Session - annotation editing core
//!
//! Creation, selection, editing, undo/redo and deletion of one in-progress
//! label overlaid on a displayed sample, kept in sync with an external
//! renderer and a remote persistence backend.

pub mod annotator;
pub mod bridge;
pub mod config;
pub mod confirm;
pub mod error;
pub mod fields;
pub mod history;
pub mod model;
pub mod navigator;
pub mod notify;
pub mod persistence;
pub mod quick_draw;
pub mod sample;
pub mod scene;
pub mod session;

#[cfg(test)]
mod tests;

pub use annotator::Annotator;
pub use config::SessionConfig;
pub use error::SessionError;
pub use session::{Editing, EditingSession};
