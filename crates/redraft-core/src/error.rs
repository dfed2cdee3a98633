#![forbid(unsafe_code)]

//! Error taxonomy for the command engine.
//!
//! Two layers exist:
//!
//! - [`CommandError`] is produced by a command's effect. It never escapes the
//!   lifecycle wrapper; it is converted into a state transition and stored as
//!   the command's `error_message`.
//! - [`ExecutorError`] is what the executor reports to its caller from the
//!   `try_*` entry points. The boolean entry points collapse it to `false`.

use std::time::Duration;

use thiserror::Error;

use crate::command::CommandState;
use crate::history::StackKind;

/// Result of running a command effect.
pub type CommandResult = Result<(), CommandError>;

/// Failure raised by a command effect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// The effect ran but reported that it did not succeed.
    #[error("effect reported failure: {0}")]
    Rejected(String),

    /// The effect did not finish within the configured deadline.
    #[error("effect timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),

    /// The caller stopped awaiting the operation before the effect finished.
    #[error("operation cancelled before the effect finished")]
    Cancelled,

    /// The effect panicked; the panic was contained.
    #[error("effect panicked: {0}")]
    Panicked(String),

    /// The lifecycle refused the request in the command's current state.
    #[error("cannot {action} a command in state {from}")]
    InvalidState {
        action: &'static str,
        from: CommandState,
    },

    /// Data needed to reverse the effect was never captured.
    #[error("undo prerequisites missing: {0}")]
    NotUndoable(String),

    /// A member of a composite failed and the composite rolled back.
    #[error("step {index} ({description}) failed: {reason}; rollback failures: {rollback_failures}")]
    SubCommandFailed {
        index: usize,
        description: String,
        reason: String,
        rollback_failures: usize,
    },

    /// Some members of a composite could not be undone.
    #[error("{failed} of {attempted} sub-command undo(s) failed")]
    RollbackIncomplete { failed: usize, attempted: usize },

    /// The domain backend refused or failed the operation.
    #[error("backend error: {0}")]
    Backend(String),

    /// Generic error with message.
    #[error("{0}")]
    Other(String),
}

impl CommandError {
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

impl From<serde_json::Error> for CommandError {
    fn from(err: serde_json::Error) -> Self {
        Self::Other(format!("payload serialization failed: {err}"))
    }
}

/// Failure reported by the executor's `try_*` entry points.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    /// Another command is in flight; the call was rejected, not queued.
    #[error("another command is in flight")]
    ConcurrencyRejected,

    /// There is nothing on the requested stack.
    #[error("nothing to {0}")]
    EmptyStack(StackKind),

    /// The next undo candidate reports `can_undo() == false`.
    #[error("command '{description}' cannot be undone")]
    NotUndoable { description: String },

    /// The command's execute effect failed.
    #[error("execution of '{description}' failed: {message}")]
    ExecutionFailure { description: String, message: String },

    /// The command's undo effect failed; it stays on the undo stack.
    #[error("undo of '{description}' failed: {message}")]
    UndoFailure { description: String, message: String },

    /// Re-executing an undone command failed; it stays on the redo stack.
    #[error("redo of '{description}' failed: {message}")]
    RedoFailure { description: String, message: String },
}

impl ExecutorError {
    /// Whether the caller may simply retry the same call later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyRejected)
    }
}
