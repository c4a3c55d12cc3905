//! Undo/Redo system for editing operations.
//!
//! This module implements the Command pattern: each undoable action is a
//! [`Command`] that knows how to apply and reverse itself against a target.
//! Histories are scoped by context id (e.g. `"modal-annotate"`) so unrelated
//! surfaces never undo each other's work.

use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Command Types
// ============================================================================

/// A reversible unit of work applied to a target of type `T`.
///
/// `undo` after `execute` must restore the target state exactly as it was
/// before `execute`.
pub trait Command<T>: fmt::Debug {
    /// Apply the command.
    fn execute(&self, target: &mut T);

    /// Reverse the effect of `execute`.
    fn undo(&self, target: &mut T);

    /// Human-readable description for undo/redo affordances.
    fn description(&self) -> String;
}

/// Logical scope of a command history.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextId(String);

impl ContextId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A command recorded in a history, tagged with its id and context.
#[derive(Debug)]
pub struct Entry<C> {
    /// Unique id within the owning history
    pub id: u64,
    /// Context the command was executed in
    pub context: ContextId,
    /// The command
    pub command: C,
}

// ============================================================================
// Command Stack
// ============================================================================

/// Configuration for the undo stack
#[derive(Debug, Clone)]
pub struct UndoConfig {
    /// Maximum number of commands to keep in history
    pub max_history: usize,
}

impl Default for UndoConfig {
    fn default() -> Self {
        Self { max_history: 100 }
    }
}

/// The undo/redo history of one context.
///
/// Maintains two stacks:
/// - `past`: Commands that can be undone (most recent at the end)
/// - `future`: Commands that can be redone (most recent at the end)
///
/// Executing a new command pushes it to `past` and clears `future`.
#[derive(Debug)]
pub struct CommandStack<C> {
    past: Vec<Entry<C>>,
    future: Vec<Entry<C>>,
    config: UndoConfig,
}

impl<C> Default for CommandStack<C> {
    fn default() -> Self {
        Self::with_config(UndoConfig::default())
    }
}

impl<C> CommandStack<C> {
    /// Create a new empty stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with custom configuration
    pub fn with_config(config: UndoConfig) -> Self {
        Self {
            past: Vec::new(),
            future: Vec::new(),
            config,
        }
    }

    /// Run `entry`'s command, record it and invalidate redo history.
    pub fn execute<T>(&mut self, entry: Entry<C>, target: &mut T)
    where
        C: Command<T>,
    {
        entry.command.execute(target);
        log::debug!("📝 [{}] executed '{}'", entry.context, entry.command.description());
        self.past.push(entry);
        self.future.clear();

        // Limit history size
        while self.past.len() > self.config.max_history {
            self.past.remove(0);
        }
    }

    /// Undo the most recent command. Returns false if there was nothing to undo.
    pub fn undo<T>(&mut self, target: &mut T) -> bool
    where
        C: Command<T>,
    {
        let Some(entry) = self.past.pop() else {
            return false;
        };
        entry.command.undo(target);
        log::debug!("⏪ [{}] undid '{}'", entry.context, entry.command.description());
        self.future.push(entry);
        true
    }

    /// Redo the most recently undone command. Returns false if there was nothing to redo.
    pub fn redo<T>(&mut self, target: &mut T) -> bool
    where
        C: Command<T>,
    {
        let Some(entry) = self.future.pop() else {
            return false;
        };
        entry.command.execute(target);
        log::debug!("⏩ [{}] redid '{}'", entry.context, entry.command.description());
        self.past.push(entry);
        true
    }

    /// Check if undo is available
    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    /// Check if redo is available
    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    /// The command that would be undone next.
    pub fn peek_undo(&self) -> Option<&C> {
        self.past.last().map(|e| &e.command)
    }

    /// The command that would be redone next.
    pub fn peek_redo(&self) -> Option<&C> {
        self.future.last().map(|e| &e.command)
    }

    /// Get the number of commands in undo history
    pub fn undo_count(&self) -> usize {
        self.past.len()
    }

    /// Get the number of commands in redo history
    pub fn redo_count(&self) -> usize {
        self.future.len()
    }

    /// Clear all history
    pub fn clear(&mut self) {
        self.past.clear();
        self.future.clear();
    }
}

/// Enabled state of the undo/redo affordances, for binding buttons and shortcuts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UndoAvailability {
    pub undo: bool,
    pub redo: bool,
}

// ============================================================================
// Context Registry
// ============================================================================

/// Command histories keyed by context.
#[derive(Debug)]
pub struct CommandHistory<C> {
    stacks: HashMap<ContextId, CommandStack<C>>,
    config: UndoConfig,
    next_id: u64,
}

impl<C> Default for CommandHistory<C> {
    fn default() -> Self {
        Self::with_config(UndoConfig::default())
    }
}

impl<C> CommandHistory<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: UndoConfig) -> Self {
        Self {
            stacks: HashMap::new(),
            config,
            next_id: 1,
        }
    }

    /// Execute `command` in `context`, returning its id.
    pub fn execute<T>(&mut self, context: &ContextId, command: C, target: &mut T) -> u64
    where
        C: Command<T>,
    {
        let id = self.next_id;
        self.next_id += 1;
        let config = self.config.clone();
        self.stacks
            .entry(context.clone())
            .or_insert_with(|| CommandStack::with_config(config))
            .execute(
                Entry {
                    id,
                    context: context.clone(),
                    command,
                },
                target,
            );
        id
    }

    /// Undo in `context`. No-op (returns false) when the context has no history.
    pub fn undo<T>(&mut self, context: &ContextId, target: &mut T) -> bool
    where
        C: Command<T>,
    {
        self.stacks
            .get_mut(context)
            .is_some_and(|stack| stack.undo(target))
    }

    /// Redo in `context`. No-op (returns false) when nothing was undone.
    pub fn redo<T>(&mut self, context: &ContextId, target: &mut T) -> bool
    where
        C: Command<T>,
    {
        self.stacks
            .get_mut(context)
            .is_some_and(|stack| stack.redo(target))
    }

    pub fn can_undo(&self, context: &ContextId) -> bool {
        self.stacks.get(context).is_some_and(CommandStack::can_undo)
    }

    pub fn can_redo(&self, context: &ContextId) -> bool {
        self.stacks.get(context).is_some_and(CommandStack::can_redo)
    }

    /// Undo/redo enabled flags for `context`.
    pub fn availability(&self, context: &ContextId) -> UndoAvailability {
        UndoAvailability {
            undo: self.can_undo(context),
            redo: self.can_redo(context),
        }
    }

    /// The stack of a context, if it has ever executed a command.
    pub fn stack(&self, context: &ContextId) -> Option<&CommandStack<C>> {
        self.stacks.get(context)
    }

    /// Clear the history of one context.
    pub fn clear(&mut self, context: &ContextId) {
        if let Some(stack) = self.stacks.get_mut(context) {
            stack.clear();
            log::debug!("🗑️ [{}] history cleared", context);
        }
    }

    /// Clear every context.
    pub fn clear_all(&mut self) {
        for stack in self.stacks.values_mut() {
            stack.clear();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
