#![forbid(unsafe_code)]

//! Bounded undo/redo history.
//!
//! [`HistoryStore`] owns the two stacks and the memory estimate. It does not
//! run effects; the executor checks a command out, runs it, and hands it back
//! with the outcome.
//!
//! # Invariants
//!
//! 1. `estimated_memory_usage` equals the sum of `size_bytes()` over both stacks
//!    after every mutation.
//! 2. After `push_executed`, the undo stack is within `max_history` and
//!    `max_memory_bytes` unless only one entry remains.
//! 3. The redo stack is empty after every `push_executed`.
//! 4. A checkout taken before `clear()` is dropped when recorded.
//!
//! ```text
//! push_executed(c5)
//! ┌───────────────────────────────────────────────┐
//! │ Undo Stack: [c1, c2, c3, c4, c5]               │
//! │ Redo Stack: []                                 │
//! └───────────────────────────────────────────────┘
//!
//! take_undo + record_undo(success) x2
//! ┌───────────────────────────────────────────────┐
//! │ Undo Stack: [c1, c2, c3]                       │
//! │ Redo Stack: [c5, c4]                           │
//! └───────────────────────────────────────────────┘
//!
//! push_executed(c6)  <-- clears redo
//! ┌───────────────────────────────────────────────┐
//! │ Undo Stack: [c1, c2, c3, c6]                   │
//! │ Redo Stack: []                                 │
//! └───────────────────────────────────────────────┘
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::command::{CommandCategory, CommandInfo, CommandLifecycle, UndoableCmd};

/// Limits for the history store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Maximum number of commands on the undo stack.
    pub max_history: usize,
    /// Maximum estimated bytes across both stacks (0 = unlimited).
    pub max_memory_bytes: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_history: 100,
            max_memory_bytes: 50 * 1024 * 1024, // 50 MiB
        }
    }
}

impl HistoryConfig {
    #[must_use]
    pub fn new(max_history: usize, max_memory_bytes: usize) -> Self {
        Self {
            max_history,
            max_memory_bytes,
        }
    }

    /// Create unlimited configuration (for testing).
    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            max_history: usize::MAX,
            max_memory_bytes: 0,
        }
    }
}

/// Which stack an entry lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackKind {
    Undo,
    Redo,
}

impl fmt::Display for StackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Undo => "undo",
            Self::Redo => "redo",
        })
    }
}

/// One row of [`HistoryStore::entries`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub stack: StackKind,
    #[serde(flatten)]
    pub info: CommandInfo,
}

/// Usage figures for a history panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryStatistics {
    pub total_commands: usize,
    pub undo_stack_size: usize,
    pub redo_stack_size: usize,
    pub by_category: BTreeMap<CommandCategory, usize>,
    pub estimated_memory_bytes: usize,
    pub max_memory_bytes: usize,
    pub max_history: usize,
    pub evicted_total: u64,
    pub in_flight: bool,
}

/// A command temporarily removed from a stack while its effect runs.
pub struct Checkout {
    cmd: Box<dyn UndoableCmd>,
    generation: u64,
}

impl Checkout {
    #[must_use]
    pub fn command(&self) -> &dyn UndoableCmd {
        self.cmd.as_ref()
    }

    pub fn command_mut(&mut self) -> &mut dyn UndoableCmd {
        self.cmd.as_mut()
    }

    #[must_use]
    pub fn into_inner(self) -> Box<dyn UndoableCmd> {
        self.cmd
    }
}

impl fmt::Debug for Checkout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Checkout")
            .field("cmd", &self.cmd)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Owner of the undo and redo stacks.
pub struct HistoryStore {
    /// Commands available for undo (newest at back).
    undo_stack: VecDeque<Box<dyn UndoableCmd>>,
    /// Commands available for redo (newest at back).
    redo_stack: VecDeque<Box<dyn UndoableCmd>>,
    config: HistoryConfig,
    estimated_memory_usage: usize,
    /// Bumped by `clear()`; stale checkouts are dropped on return.
    generation: u64,
    evicted_total: u64,
}

impl fmt::Debug for HistoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryStore")
            .field("undo_depth", &self.undo_stack.len())
            .field("redo_depth", &self.redo_stack.len())
            .field("estimated_memory_usage", &self.estimated_memory_usage)
            .field("config", &self.config)
            .finish()
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(HistoryConfig::default())
    }
}

impl HistoryStore {
    #[must_use]
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            config,
            estimated_memory_usage: 0,
            generation: 0,
            evicted_total: 0,
        }
    }

    // ========================================================================
    // Core Operations
    // ========================================================================

    /// Push a successfully executed command.
    ///
    /// Clears the redo stack, then evicts the oldest undo entries while over
    /// budget, never evicting the last one. Returns info for evicted commands.
    pub fn push_executed(&mut self, cmd: Box<dyn UndoableCmd>) -> Vec<CommandInfo> {
        let discarded = self.redo_stack.len();
        self.redo_stack.clear();
        if discarded > 0 {
            tracing::debug!(
                target: "redraft.history",
                discarded,
                "redo stack cleared by new command"
            );
        }

        self.undo_stack.push_back(cmd);
        self.recompute_memory();
        self.enforce_limits()
    }

    /// Wrap a command that is about to execute for the first time.
    #[must_use]
    pub fn admit(&self, cmd: Box<dyn UndoableCmd>) -> Checkout {
        self.checkout(cmd)
    }

    /// Check out the newest undo entry.
    pub fn take_undo(&mut self) -> Option<Checkout> {
        let cmd = self.undo_stack.pop_back()?;
        self.recompute_memory();
        Some(self.checkout(cmd))
    }

    /// Check out the newest redo entry.
    pub fn take_redo(&mut self) -> Option<Checkout> {
        let cmd = self.redo_stack.pop_back()?;
        self.recompute_memory();
        Some(self.checkout(cmd))
    }

    /// Return an undo checkout: to the redo tail on success, else to the undo tail.
    ///
    /// Returns `false` if the history was cleared meanwhile and the command was dropped.
    pub fn record_undo(&mut self, checkout: Checkout, success: bool) -> bool {
        let target = if success {
            StackKind::Redo
        } else {
            StackKind::Undo
        };
        self.restore(checkout, target)
    }

    /// Return a redo checkout: to the undo tail on success, else to the redo tail.
    ///
    /// Returns `false` if the history was cleared meanwhile and the command was dropped.
    pub fn record_redo(&mut self, checkout: Checkout, success: bool) -> bool {
        let target = if success {
            StackKind::Undo
        } else {
            StackKind::Redo
        };
        self.restore(checkout, target)
    }

    // ========================================================================
    // Info
    // ========================================================================

    /// Next command undo would act on.
    #[must_use]
    pub fn peek_undo(&self) -> Option<&dyn UndoableCmd> {
        self.undo_stack.back().map(|cmd| cmd.as_ref())
    }

    /// Next command redo would act on.
    #[must_use]
    pub fn peek_redo(&self) -> Option<&dyn UndoableCmd> {
        self.redo_stack.back().map(|cmd| cmd.as_ref())
    }

    #[must_use]
    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    #[must_use]
    pub fn redo_depth(&self) -> usize {
        self.redo_stack.len()
    }

    #[must_use]
    pub fn undo_description(&self) -> Option<&str> {
        self.peek_undo().map(|cmd| cmd.description())
    }

    #[must_use]
    pub fn redo_description(&self) -> Option<&str> {
        self.peek_redo().map(|cmd| cmd.description())
    }

    /// Undo stack (most recent first) followed by redo stack (most recent first).
    #[must_use]
    pub fn entries(&self) -> Vec<HistoryEntry> {
        let undo = self.undo_stack.iter().rev().map(|cmd| HistoryEntry {
            stack: StackKind::Undo,
            info: cmd.info(),
        });
        let redo = self.redo_stack.iter().rev().map(|cmd| HistoryEntry {
            stack: StackKind::Redo,
            info: cmd.info(),
        });
        undo.chain(redo).collect()
    }

    #[must_use]
    pub fn statistics(&self, in_flight: bool) -> HistoryStatistics {
        let mut by_category = BTreeMap::new();
        for cmd in self.undo_stack.iter().chain(self.redo_stack.iter()) {
            *by_category.entry(cmd.category()).or_insert(0) += 1;
        }

        HistoryStatistics {
            total_commands: self.undo_stack.len() + self.redo_stack.len(),
            undo_stack_size: self.undo_stack.len(),
            redo_stack_size: self.redo_stack.len(),
            by_category,
            estimated_memory_bytes: self.estimated_memory_usage,
            max_memory_bytes: self.config.max_memory_bytes,
            max_history: self.config.max_history,
            evicted_total: self.evicted_total,
            in_flight,
        }
    }

    /// Get total estimated memory usage in bytes.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        self.estimated_memory_usage
    }

    #[must_use]
    pub fn evicted_total(&self) -> u64 {
        self.evicted_total
    }

    #[must_use]
    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Clear both stacks. Not undoable.
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.estimated_memory_usage = 0;
        self.generation += 1;
    }

    fn checkout(&self, cmd: Box<dyn UndoableCmd>) -> Checkout {
        Checkout {
            cmd,
            generation: self.generation,
        }
    }

    fn restore(&mut self, checkout: Checkout, target: StackKind) -> bool {
        if checkout.generation != self.generation {
            tracing::debug!(
                target: "redraft.history",
                description = %checkout.cmd.description(),
                "history cleared while command was in flight; dropping it"
            );
            return false;
        }

        match target {
            StackKind::Undo => self.undo_stack.push_back(checkout.cmd),
            StackKind::Redo => self.redo_stack.push_back(checkout.cmd),
        }
        self.recompute_memory();
        true
    }

    fn over_budget(&self) -> bool {
        self.undo_stack.len() > self.config.max_history
            || (self.config.max_memory_bytes > 0
                && self.estimated_memory_usage > self.config.max_memory_bytes)
    }

    /// Evict oldest undo entries until within limits, keeping at least one.
    fn enforce_limits(&mut self) -> Vec<CommandInfo> {
        let mut evicted = Vec::new();
        while self.undo_stack.len() > 1 && self.over_budget() {
            let Some(cmd) = self.undo_stack.pop_front() else {
                break;
            };
            self.estimated_memory_usage = self
                .estimated_memory_usage
                .saturating_sub(cmd.size_bytes());
            self.evicted_total += 1;
            tracing::warn!(
                target: "redraft.history",
                description = %cmd.description(),
                undo_depth = self.undo_stack.len(),
                estimated_memory_usage = self.estimated_memory_usage,
                "evicted oldest history entry; its change can no longer be undone"
            );
            evicted.push(cmd.info());
        }
        if !evicted.is_empty() {
            self.recompute_memory();
        }
        evicted
    }

    fn recompute_memory(&mut self) {
        self.estimated_memory_usage = self
            .undo_stack
            .iter()
            .chain(self.redo_stack.iter())
            .map(|cmd| cmd.size_bytes())
            .sum();
    }
}

// ============================================================================
// Tests
// ============================================================================
