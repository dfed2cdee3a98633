#![forbid(unsafe_code)]

//! Undoable command infrastructure.
//!
//! This module provides the [`UndoableCmd`] trait for reversible operations and
//! the lifecycle wrapper ([`CommandLifecycle`]) that drives every command
//! through its state machine.
//!
//! # State machine
//!
//! ```text
//!  Pending ──► Executing ──► Completed ──► Undoing ──► Undone
//!                 │              ▲            │           │
//!                 ▼              └── (fail) ──┘           │
//!               Failed ◄──── Executing ◄──── (redo) ──────┘
//! ```
//!
//! # Invariants
//!
//! - Only the lifecycle wrapper changes [`CommandState`]; implementors of
//!   [`UndoableCmd`] supply effects and never see the state field mutably.
//! - An effect's error or panic is contained: the wrapper records the message
//!   and returns `false`.
//! - A failed undo leaves the command `Completed` so it stays undoable.
//! - Duration is measured around every execute/undo call, whatever the outcome.
//!
//! # Failure Modes
//!
//! - **Hung effect**: an effect that never resolves would pin the executor.
//!   Mitigation: [`EffectCx`] carries a deadline enforced around leaf effects.
//! - **Missing undo data**: execute succeeded but did not capture what undo
//!   needs. Mitigation: [`UndoableCmd::undo_ready`] gates [`can_undo`](CommandLifecycle::can_undo).

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use web_time::Instant;

pub use crate::error::{CommandError, CommandResult};

/// Fixed bookkeeping cost charged to every history entry.
pub const ENTRY_OVERHEAD_BYTES: usize = 1024;

/// Opaque key/value payload captured by a command.
pub type Payload = Map<String, Value>;

/// Serialize a typed value into a [`Payload`].
///
/// Non-object values are stored under a single `"value"` key.
pub fn payload_from<T: Serialize>(value: &T) -> Result<Payload, CommandError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => {
            let mut map = Payload::new();
            map.insert("value".to_string(), other);
            Ok(map)
        }
    }
}

/// Category of a command, used for grouping in history and statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandCategory {
    Drawing,
    Editing,
    Layer,
    Document,
    Selection,
    View,
}

impl CommandCategory {
    pub const ALL: [Self; 6] = [
        Self::Drawing,
        Self::Editing,
        Self::Layer,
        Self::Document,
        Self::Selection,
        Self::View,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Drawing => "drawing",
            Self::Editing => "editing",
            Self::Layer => "layer",
            Self::Document => "document",
            Self::Selection => "selection",
            Self::View => "view",
        }
    }
}

impl fmt::Display for CommandCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandState {
    #[default]
    Pending,
    Executing,
    Completed,
    Failed,
    Undoing,
    Undone,
}

impl CommandState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Undoing => "undoing",
            Self::Undone => "undone",
        }
    }

    /// States from which an execute (first run, redo, or redo retry) may start.
    #[must_use]
    pub const fn can_begin_execute(self) -> bool {
        matches!(self, Self::Pending | Self::Undone | Self::Failed)
    }

    /// Whether an effect is currently running.
    #[must_use]
    pub const fn is_busy(self) -> bool {
        matches!(self, Self::Executing | Self::Undoing)
    }
}

impl fmt::Display for CommandState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity attached to every command for tracing and UI display.
#[derive(Debug, Clone)]
pub struct CommandMetadata {
    /// Human-readable description for UI (e.g., "Draw Line (0.0,0.0) to (1.0,1.0)").
    pub description: String,
    /// Category used for grouping.
    pub category: CommandCategory,
    /// Wall-clock creation time.
    pub created_at: DateTime<Utc>,
}

impl CommandMetadata {
    #[must_use]
    pub fn new(description: impl Into<String>, category: CommandCategory) -> Self {
        Self {
            description: description.into(),
            category,
            created_at: Utc::now(),
        }
    }
}

/// Observable snapshot of a command, handed to observers and history queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandInfo {
    pub description: String,
    pub category: CommandCategory,
    pub state: CommandState,
    pub timestamp: DateTime<Utc>,
    pub duration: Option<Duration>,
    pub error_message: Option<String>,
    pub can_undo: bool,
}

/// State shared by every command: metadata, lifecycle state and payloads.
#[derive(Debug, Clone)]
pub struct CommandCore {
    metadata: CommandMetadata,
    state: CommandState,
    last_duration: Option<Duration>,
    error_message: Option<String>,
    execution_data: Payload,
    undo_data: Payload,
}

impl CommandCore {
    #[must_use]
    pub fn new(description: impl Into<String>, category: CommandCategory) -> Self {
        Self {
            metadata: CommandMetadata::new(description, category),
            state: CommandState::Pending,
            last_duration: None,
            error_message: None,
            execution_data: Payload::new(),
            undo_data: Payload::new(),
        }
    }

    #[must_use]
    pub fn metadata(&self) -> &CommandMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.metadata.description
    }

    #[must_use]
    pub fn category(&self) -> CommandCategory {
        self.metadata.category
    }

    #[must_use]
    pub fn state(&self) -> CommandState {
        self.state
    }

    /// Duration of the most recent execute or undo call.
    #[must_use]
    pub fn last_duration(&self) -> Option<Duration> {
        self.last_duration
    }

    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    #[must_use]
    pub fn execution_data(&self) -> &Payload {
        &self.execution_data
    }

    #[must_use]
    pub fn undo_data(&self) -> &Payload {
        &self.undo_data
    }

    pub fn set_execution_data(&mut self, data: Payload) {
        self.execution_data = data;
    }

    pub fn set_undo_data(&mut self, data: Payload) {
        self.undo_data = data;
    }

    /// Record one execution value.
    pub fn capture_execution(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.execution_data.insert(key.into(), value.into());
    }

    /// Record one value needed to undo.
    pub fn capture_undo(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.undo_data.insert(key.into(), value.into());
    }

    /// Drop a previously captured undo value.
    pub fn release_undo(&mut self, key: &str) -> Option<Value> {
        self.undo_data.remove(key)
    }

    #[must_use]
    pub fn has_undo_key(&self, key: &str) -> bool {
        self.undo_data.contains_key(key)
    }

    /// Serialized size of both payloads.
    #[must_use]
    pub fn payload_bytes(&self) -> usize {
        serialized_len(&self.execution_data) + serialized_len(&self.undo_data)
    }

    fn enter(&mut self, state: CommandState) {
        self.state = state;
        self.error_message = None;
    }

    fn settle(&mut self, state: CommandState, elapsed: Duration, error: Option<&CommandError>) {
        self.state = state;
        self.last_duration = Some(elapsed);
        self.error_message = error.map(ToString::to_string);
    }

    /// Leave an effect that will never finish.
    fn abandon(&mut self, state: CommandState) {
        self.state = state;
        self.error_message = Some(CommandError::Cancelled.to_string());
    }
}

fn serialized_len(payload: &Payload) -> usize {
    if payload.is_empty() {
        return 0;
    }
    serde_json::to_vec(payload).map_or(0, |bytes| bytes.len())
}

/// Execution context handed to effects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EffectCx {
    timeout: Option<Duration>,
}

impl EffectCx {
    /// Context without a deadline.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self { timeout: None }
    }

    /// Context whose leaf effects are forced to fail after `timeout`.
    #[must_use]
    pub const fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// A reversible command.
///
/// Implementors supply the raw effects ([`apply`](Self::apply) and
/// [`revert`](Self::revert)) and own a [`CommandCore`]. Callers drive the
/// command through [`CommandLifecycle`], which is implemented for every
/// `UndoableCmd`.
#[async_trait]
pub trait UndoableCmd: Send + Sync {
    /// Shared state.
    fn core(&self) -> &CommandCore;

    /// Shared state, mutably. Effects use this to capture payloads.
    fn core_mut(&mut self) -> &mut CommandCore;

    /// Perform the effect. Populate payloads only on success.
    async fn apply(&mut self, cx: &EffectCx) -> CommandResult;

    /// Reverse the effect using the captured undo data.
    async fn revert(&mut self, cx: &EffectCx) -> CommandResult;

    /// Whether the data undo needs was captured. Pure.
    fn undo_ready(&self) -> bool {
        true
    }

    /// Estimated size in bytes for history budgeting.
    fn size_bytes(&self) -> usize {
        ENTRY_OVERHEAD_BYTES + self.core().payload_bytes()
    }

    /// Aggregates enforce deadlines on their members instead of themselves.
    fn is_aggregate(&self) -> bool {
        false
    }

    /// Whether an interrupted [`apply`](Self::apply) left changes that
    /// [`revert`](Self::revert) can reverse. Leaf effects capture undo data
    /// only once they succeed, so the default is `false`.
    fn partially_applied(&self) -> bool {
        false
    }

    /// Called when the effect in progress was dropped before it finished.
    /// Aggregates settle members caught mid-effect here.
    fn on_interrupt(&mut self) {}

    /// Human-readable description for UI display.
    fn description(&self) -> &str {
        self.core().description()
    }

    fn category(&self) -> CommandCategory {
        self.core().category()
    }

    fn state(&self) -> CommandState {
        self.core().state()
    }

    /// Debug description of the command.
    fn debug_name(&self) -> &'static str {
        "UndoableCmd"
    }
}

impl fmt::Debug for dyn UndoableCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(self.debug_name())
            .field("description", &self.description())
            .field("state", &self.state())
            .field("size_bytes", &self.size_bytes())
            .finish()
    }
}

/// Guarded lifecycle operations, available on every [`UndoableCmd`].
#[async_trait]
pub trait CommandLifecycle: UndoableCmd {
    /// Run the execute effect under state management.
    ///
    /// Returns `false` if the state forbids executing or the effect failed;
    /// never propagates the effect's error or panic.
    async fn execute(&mut self, cx: &EffectCx) -> bool;

    /// Run the undo effect under state management.
    ///
    /// Returns `false` without touching state unless [`can_undo`](Self::can_undo)
    /// holds. On effect failure the command returns to `Completed`.
    async fn undo(&mut self, cx: &EffectCx) -> bool;

    /// `Completed` and undo prerequisites present.
    fn can_undo(&self) -> bool;

    /// Settle a command whose effect future was dropped mid-flight.
    ///
    /// An interrupted execute becomes `Completed` if it
    /// [`partially_applied`](UndoableCmd::partially_applied), else `Failed`.
    /// An interrupted undo returns to `Completed`. Settled states are left
    /// alone. Returns the resulting state.
    fn interrupt(&mut self) -> CommandState;

    /// Snapshot for observers.
    fn info(&self) -> CommandInfo;
}

#[async_trait]
impl<T: UndoableCmd + ?Sized> CommandLifecycle for T {
    async fn execute(&mut self, cx: &EffectCx) -> bool {
        let from = self.state();
        if !from.can_begin_execute() {
            let refusal = CommandError::InvalidState {
                action: "execute",
                from,
            };
            tracing::warn!(
                target: "redraft.command",
                description = %self.description(),
                error = %refusal,
                "execute refused"
            );
            return false;
        }

        self.core_mut().enter(CommandState::Executing);
        let deadline = effect_deadline(self.is_aggregate(), cx);
        let start = Instant::now();
        let outcome = contain(self.apply(cx), deadline).await;
        let elapsed = start.elapsed();

        match outcome {
            Ok(()) => {
                self.core_mut()
                    .settle(CommandState::Completed, elapsed, None);
                tracing::debug!(
                    target: "redraft.command",
                    description = %self.description(),
                    duration_us = elapsed.as_micros() as u64,
                    "command completed"
                );
                true
            }
            Err(err) => {
                log_contained("execute", self.description(), &err);
                self.core_mut()
                    .settle(CommandState::Failed, elapsed, Some(&err));
                false
            }
        }
    }

    async fn undo(&mut self, cx: &EffectCx) -> bool {
        if !self.can_undo() {
            tracing::warn!(
                target: "redraft.command",
                description = %self.description(),
                state = %self.state(),
                "undo refused"
            );
            return false;
        }

        self.core_mut().enter(CommandState::Undoing);
        let deadline = effect_deadline(self.is_aggregate(), cx);
        let start = Instant::now();
        let outcome = contain(self.revert(cx), deadline).await;
        let elapsed = start.elapsed();

        match outcome {
            Ok(()) => {
                self.core_mut().settle(CommandState::Undone, elapsed, None);
                tracing::debug!(
                    target: "redraft.command",
                    description = %self.description(),
                    duration_us = elapsed.as_micros() as u64,
                    "command undone"
                );
                true
            }
            Err(err) => {
                log_contained("undo", self.description(), &err);
                // The domain state was not reversed, so the command stays undoable.
                self.core_mut()
                    .settle(CommandState::Completed, elapsed, Some(&err));
                false
            }
        }
    }

    fn can_undo(&self) -> bool {
        self.state() == CommandState::Completed && self.undo_ready()
    }

    fn interrupt(&mut self) -> CommandState {
        let next = match self.state() {
            CommandState::Executing => {
                self.on_interrupt();
                if self.partially_applied() {
                    CommandState::Completed
                } else {
                    CommandState::Failed
                }
            }
            CommandState::Undoing => {
                self.on_interrupt();
                CommandState::Completed
            }
            settled => return settled,
        };
        tracing::warn!(
            target: "redraft.command",
            description = %self.description(),
            state = %next,
            "effect interrupted"
        );
        self.core_mut().abandon(next);
        next
    }

    fn info(&self) -> CommandInfo {
        let core = self.core();
        CommandInfo {
            description: core.description().to_string(),
            category: core.category(),
            state: core.state(),
            timestamp: core.metadata().created_at,
            duration: core.last_duration(),
            error_message: core.error_message().map(str::to_string),
            can_undo: self.can_undo(),
        }
    }
}

fn effect_deadline(aggregate: bool, cx: &EffectCx) -> Option<Duration> {
    if aggregate { None } else { cx.timeout() }
}

fn log_contained(action: &str, description: &str, err: &CommandError) {
    match err {
        CommandError::Panicked(_) => tracing::error!(
            target: "redraft.command",
            action,
            description,
            error = %err,
            "effect panicked"
        ),
        _ => tracing::warn!(
            target: "redraft.command",
            action,
            description,
            error = %err,
            "effect failed"
        ),
    }
}

/// Await an effect, converting panics and deadline overruns into errors.
async fn contain<F>(effect: F, deadline: Option<Duration>) -> CommandResult
where
    F: Future<Output = CommandResult> + Send,
{
    let guarded = AssertUnwindSafe(effect).catch_unwind();
    let caught = match deadline {
        Some(limit) => match tokio::time::timeout(limit, guarded).await {
            Ok(caught) => caught,
            Err(_) => return Err(CommandError::TimedOut(limit)),
        },
        None => guarded.await,
    };
    caught.unwrap_or_else(|payload| Err(CommandError::Panicked(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================
