//! Confirmation gates for destructive or discarding transitions.
//!
//! The dialogs themselves belong to the embedding UI and are reached
//! through [`Prompt`]. The durable "ask before delete" flag lives behind
//! [`PreferenceStore`].

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::rc::Rc;

use crate::config::{ConfigError, SessionConfig};

/// Answer to the delete confirmation dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteDecision {
    /// Delete, optionally turning further confirmations off
    Confirm { dont_ask_again: bool },
    Cancel,
}

/// Answer to the "unsaved changes" dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitChoice {
    /// Stay in the editing state
    Cancel,
    /// Drop the unsaved changes and continue
    Discard,
    /// Save, then continue
    Save,
}

/// Blocking dialogs shown by the embedding UI.
pub trait Prompt {
    fn confirm_delete(&mut self) -> DeleteDecision;

    fn confirm_unsaved(&mut self) -> ExitChoice;
}

/// Durable storage of the "ask before delete" preference.
pub trait PreferenceStore {
    fn ask_before_delete(&self) -> bool;

    fn set_ask_before_delete(&mut self, ask: bool) -> Result<(), ConfigError>;
}

// ============================================================================
// Gates
// ============================================================================

/// Outcome of the exit gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitGate {
    /// Nothing unsaved, continue
    Proceed,
    /// Revert to the saved snapshot, then continue
    Discard,
    /// Save, then continue
    SaveFirst,
    /// Abort the transition
    Cancel,
}

/// Gates transitions behind user confirmation.
pub struct ConfirmWorkflow {
    prompt: Box<dyn Prompt>,
    preferences: Box<dyn PreferenceStore>,
}

impl std::fmt::Debug for ConfirmWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfirmWorkflow")
            .field("ask_before_delete", &self.preferences.ask_before_delete())
            .finish_non_exhaustive()
    }
}

impl ConfirmWorkflow {
    pub fn new(prompt: Box<dyn Prompt>, preferences: Box<dyn PreferenceStore>) -> Self {
        Self { prompt, preferences }
    }

    /// Whether a delete may go ahead.
    pub fn gate_delete(&mut self) -> bool {
        if !self.preferences.ask_before_delete() {
            return true;
        }
        match self.prompt.confirm_delete() {
            DeleteDecision::Confirm { dont_ask_again } => {
                if dont_ask_again {
                    if let Err(e) = self.preferences.set_ask_before_delete(false) {
                        log::warn!("Failed to store delete preference: {}", e);
                    }
                }
                true
            }
            DeleteDecision::Cancel => {
                log::debug!("Delete cancelled");
                false
            }
        }
    }

    /// Decide how to leave the editing state.
    pub fn gate_exit(&mut self, has_changes: bool) -> ExitGate {
        if !has_changes {
            return ExitGate::Proceed;
        }
        match self.prompt.confirm_unsaved() {
            ExitChoice::Cancel => ExitGate::Cancel,
            ExitChoice::Discard => ExitGate::Discard,
            ExitChoice::Save => ExitGate::SaveFirst,
        }
    }

    pub fn ask_before_delete(&self) -> bool {
        self.preferences.ask_before_delete()
    }
}

// ============================================================================
// Preference stores
// ============================================================================

/// Preferences kept in memory only.
#[derive(Debug, Clone)]
pub struct MemoryPreferences {
    ask_before_delete: bool,
}

impl MemoryPreferences {
    pub fn new(ask_before_delete: bool) -> Self {
        Self { ask_before_delete }
    }
}

impl Default for MemoryPreferences {
    fn default() -> Self {
        Self::new(true)
    }
}

impl PreferenceStore for MemoryPreferences {
    fn ask_before_delete(&self) -> bool {
        self.ask_before_delete
    }

    fn set_ask_before_delete(&mut self, ask: bool) -> Result<(), ConfigError> {
        self.ask_before_delete = ask;
        Ok(())
    }
}

/// Preferences written through to a configuration file.
#[derive(Debug)]
pub struct FilePreferences {
    path: PathBuf,
    config: SessionConfig,
}

impl FilePreferences {
    /// Open the config file at `path`, starting from defaults when it is missing or unreadable.
    pub fn open(path: PathBuf) -> Self {
        let config = match SessionConfig::load_from_path(&path) {
            Ok(config) => config,
            Err(e) => {
                log::debug!("Using default preferences ({:?}: {})", path, e);
                SessionConfig::default()
            }
        };
        Self { path, config }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

impl PreferenceStore for FilePreferences {
    fn ask_before_delete(&self) -> bool {
        self.config.preferences.ask_before_delete
    }

    fn set_ask_before_delete(&mut self, ask: bool) -> Result<(), ConfigError> {
        self.config.preferences.ask_before_delete = ask;
        self.config.save_to_path(&self.path)
    }
}

// ============================================================================
// Scripted prompt
// ============================================================================

#[derive(Debug, Default)]
struct Script {
    deletes: VecDeque<DeleteDecision>,
    exits: VecDeque<ExitChoice>,
    delete_prompts: usize,
    exit_prompts: usize,
}

/// A prompt answering from queued decisions. Clones share the same script,
/// so a handle kept outside the workflow can inspect what was asked.
///
/// With nothing queued every dialog is cancelled.
#[derive(Debug, Clone, Default)]
pub struct ScriptedPrompt {
    script: Rc<RefCell<Script>>,
}

impl ScriptedPrompt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer_delete(&self, decision: DeleteDecision) -> &Self {
        self.script.borrow_mut().deletes.push_back(decision);
        self
    }

    pub fn answer_exit(&self, choice: ExitChoice) -> &Self {
        self.script.borrow_mut().exits.push_back(choice);
        self
    }

    /// Number of delete confirmations shown.
    pub fn delete_prompts(&self) -> usize {
        self.script.borrow().delete_prompts
    }

    /// Number of unsaved-changes dialogs shown.
    pub fn exit_prompts(&self) -> usize {
        self.script.borrow().exit_prompts
    }
}

impl Prompt for ScriptedPrompt {
    fn confirm_delete(&mut self) -> DeleteDecision {
        let mut script = self.script.borrow_mut();
        script.delete_prompts += 1;
        script.deletes.pop_front().unwrap_or(DeleteDecision::Cancel)
    }

    fn confirm_unsaved(&mut self) -> ExitChoice {
        let mut script = self.script.borrow_mut();
        script.exit_prompts += 1;
        script.exits.pop_front().unwrap_or(ExitChoice::Cancel)
    }
}
