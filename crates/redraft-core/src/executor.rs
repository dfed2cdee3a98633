#![forbid(unsafe_code)]

//! Single-flight command executor.
//!
//! The [`Executor`] is the only entry point that mutates history. It admits
//! one operation at a time through a one-permit semaphore acquired with
//! `try_acquire`: a concurrent call is rejected, never queued. The permit is
//! held across the whole effect, including any suspension inside it.
//!
//! # Ordering
//!
//! For a successful operation:
//!
//! 1. The command's effect runs under its lifecycle wrapper.
//! 2. The history store is updated under a short, synchronous lock.
//! 3. The in-flight permit is released.
//! 4. Events are published (`command-*`, then `history-evicted` for each
//!    eviction, then `history-changed`).
//!
//! Observers therefore see the post-operation history and may call back into
//! the executor.
//!
//! # Cancellation
//!
//! Dropping an operation's future mid-effect does not lose its command. The
//! command is interrupted and filed as a failure of that operation would be:
//! an undo stays on the undo stack, a redo stays on the redo stack, and an
//! execute is discarded. An execute or redo of a composite that already
//! applied some members lands on the undo stack instead, so those members can
//! be undone. A `command-failed` event is published either way.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Semaphore, SemaphorePermit, broadcast};
use tracing::Instrument;
use web_time::Instant;

use crate::command::{CommandInfo, CommandLifecycle, CommandState, EffectCx, UndoableCmd};
use crate::config::{ConfigError, EngineConfig};
use crate::error::ExecutorError;
use crate::events::{HistoryEvent, HistoryObserver, Notifier, ObserverId, Operation};
use crate::history::{Checkout, HistoryEntry, HistoryStatistics, HistoryStore, StackKind};

/// Holds the in-flight permit; clears the in-flight description on drop.
struct FlightGuard<'a> {
    _permit: SemaphorePermit<'a>,
    current: &'a Mutex<Option<String>>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

/// Coordinates command execution, undo and redo against a [`HistoryStore`].
pub struct Executor {
    history: Mutex<HistoryStore>,
    gate: Semaphore,
    notifier: Notifier,
    cx: EffectCx,
    current: Mutex<Option<String>>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("history", &*self.lock_history())
            .field("in_flight", &self.is_in_flight())
            .field("cx", &self.cx)
            .field("notifier", &self.notifier)
            .finish()
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Executor {
    /// Build an executor from explicit configuration. Does not validate.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let cx = match config.executor.effect_timeout() {
            Some(limit) => EffectCx::with_timeout(limit),
            None => EffectCx::unbounded(),
        };
        Self {
            history: Mutex::new(HistoryStore::new(config.history)),
            gate: Semaphore::new(1),
            notifier: Notifier::new(config.executor.event_capacity),
            cx,
            current: Mutex::new(None),
        }
    }

    /// Validate `config`, then build.
    pub fn try_new(config: EngineConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.validated()?))
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Execute a command and, on success, push it onto the undo stack.
    pub async fn submit(&self, cmd: Box<dyn UndoableCmd>) -> Result<CommandInfo, ExecutorError> {
        let flight = self.begin(Operation::Execute, cmd.description())?;
        let checkout = self.lock_history().admit(cmd);

        let Settled { info, ok, evicted } =
            Tracked::new(self, Operation::Execute, flight, checkout).run().await?;
        if !ok {
            return Err(self.report_failure(Operation::Execute, info));
        }

        tracing::info!(
            target: "redraft.executor",
            description = %info.description,
            category = %info.category,
            "command executed"
        );
        self.notifier.publish(HistoryEvent::CommandExecuted { info: info.clone() });
        self.publish_evicted(evicted);
        self.notifier.publish(HistoryEvent::HistoryChanged { cause: Some(info.clone()) });
        Ok(info)
    }

    /// Boolean form of [`submit`](Self::submit).
    pub async fn execute_command(&self, cmd: Box<dyn UndoableCmd>) -> bool {
        self.submit(cmd).await.is_ok()
    }

    /// Convenience for unboxed commands.
    pub async fn execute(&self, cmd: impl UndoableCmd + 'static) -> bool {
        self.execute_command(Box::new(cmd)).await
    }

    /// Undo the most recent command.
    ///
    /// On success it moves to the redo stack. On failure it stays on the undo
    /// stack in `Completed` with its error message set.
    pub async fn try_undo(&self) -> Result<CommandInfo, ExecutorError> {
        let flight = self.begin(Operation::Undo, "undo")?;

        let checkout = {
            let mut history = self.lock_history();
            let candidate = history
                .peek_undo()
                .ok_or(ExecutorError::EmptyStack(StackKind::Undo))?;
            if !candidate.can_undo() {
                return Err(ExecutorError::NotUndoable {
                    description: candidate.description().to_string(),
                });
            }
            history
                .take_undo()
                .ok_or(ExecutorError::EmptyStack(StackKind::Undo))?
        };
        self.mark_current(checkout.command().description());

        let Settled { info, ok, .. } =
            Tracked::new(self, Operation::Undo, flight, checkout).run().await?;
        if !ok {
            return Err(self.report_failure(Operation::Undo, info));
        }

        tracing::info!(
            target: "redraft.executor",
            description = %info.description,
            "command undone"
        );
        self.notifier.publish(HistoryEvent::CommandUndone { info: info.clone() });
        self.notifier.publish(HistoryEvent::HistoryChanged { cause: Some(info.clone()) });
        Ok(info)
    }

    /// Boolean form of [`try_undo`](Self::try_undo).
    pub async fn undo(&self) -> bool {
        self.try_undo().await.is_ok()
    }

    /// Re-execute the most recently undone command.
    ///
    /// On success it moves back to the undo stack. On failure it stays on the
    /// redo stack in `Failed`, and a later redo retries it.
    pub async fn try_redo(&self) -> Result<CommandInfo, ExecutorError> {
        let flight = self.begin(Operation::Redo, "redo")?;

        let checkout = self
            .lock_history()
            .take_redo()
            .ok_or(ExecutorError::EmptyStack(StackKind::Redo))?;
        self.mark_current(checkout.command().description());

        let Settled { info, ok, evicted } =
            Tracked::new(self, Operation::Redo, flight, checkout).run().await?;
        if !ok {
            return Err(self.report_failure(Operation::Redo, info));
        }

        tracing::info!(
            target: "redraft.executor",
            description = %info.description,
            "command redone"
        );
        self.notifier.publish(HistoryEvent::CommandRedone { info: info.clone() });
        self.publish_evicted(evicted);
        self.notifier.publish(HistoryEvent::HistoryChanged { cause: Some(info.clone()) });
        Ok(info)
    }

    /// Boolean form of [`try_redo`](Self::try_redo).
    pub async fn redo(&self) -> bool {
        self.try_redo().await.is_ok()
    }

    /// Drop both stacks. Not undoable.
    ///
    /// An undo or redo in flight at the time drops its command when the effect
    /// finishes or is cancelled. An execute in flight still lands on the
    /// emptied history.
    pub fn clear_history(&self) {
        {
            let mut history = self.lock_history();
            tracing::info!(
                target: "redraft.history",
                undo_depth = history.undo_depth(),
                redo_depth = history.redo_depth(),
                "history cleared"
            );
            history.clear();
        }
        self.notifier.publish(HistoryEvent::HistoryChanged { cause: None });
    }

    // ========================================================================
    // Queries
    // ========================================================================

    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.is_in_flight() && self.lock_history().undo_depth() > 0
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.is_in_flight() && self.lock_history().redo_depth() > 0
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.gate.available_permits() == 0
    }

    /// Description of the command whose effect is running, if any.
    #[must_use]
    pub fn in_flight_description(&self) -> Option<String> {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    #[must_use]
    pub fn undo_description(&self) -> Option<String> {
        self.lock_history().undo_description().map(str::to_string)
    }

    #[must_use]
    pub fn redo_description(&self) -> Option<String> {
        self.lock_history().redo_description().map(str::to_string)
    }

    /// Undo entries then redo entries, each most recent first.
    #[must_use]
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.lock_history().entries()
    }

    #[must_use]
    pub fn statistics(&self) -> HistoryStatistics {
        let in_flight = self.is_in_flight();
        self.lock_history().statistics(in_flight)
    }

    // ========================================================================
    // Notifications
    // ========================================================================

    pub fn subscribe(&self) -> broadcast::Receiver<HistoryEvent> {
        self.notifier.subscribe()
    }

    pub fn add_observer(&self, observer: Arc<dyn HistoryObserver>) -> ObserverId {
        self.notifier.add_observer(observer)
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.notifier.remove_observer(id)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn begin(&self, operation: Operation, label: &str) -> Result<FlightGuard<'_>, ExecutorError> {
        let Ok(permit) = self.gate.try_acquire() else {
            let busy_with = self.in_flight_description().unwrap_or_default();
            tracing::warn!(
                target: "redraft.executor",
                operation = operation.as_str(),
                requested = label,
                in_flight = %busy_with,
                "rejected: another command is in flight"
            );
            return Err(ExecutorError::ConcurrencyRejected);
        };
        let guard = FlightGuard {
            _permit: permit,
            current: &self.current,
        };
        self.mark_current(label);
        Ok(guard)
    }

    /// Put a finished effect's command where its outcome says it belongs.
    /// Returns entries evicted to make room.
    fn record(&self, operation: Operation, checkout: Checkout, ok: bool) -> Vec<CommandInfo> {
        let mut history = self.lock_history();
        match operation {
            Operation::Execute if ok => history.push_executed(checkout.into_inner()),
            Operation::Execute => Vec::new(),
            Operation::Undo => {
                history.record_undo(checkout, ok);
                Vec::new()
            }
            Operation::Redo => {
                history.record_redo(checkout, ok);
                Vec::new()
            }
        }
    }

    /// Settle a command whose operation future was dropped mid-effect.
    ///
    /// The command is interrupted, then filed as if the effect had ended:
    /// an execute or redo that left changes behind lands on the undo stack,
    /// an undo goes back to the undo stack, and anything else returns to
    /// where it came from or is dropped.
    fn recover(&self, operation: Operation, mut checkout: Checkout, flight: Option<FlightGuard<'_>>) {
        let state = checkout.command_mut().interrupt();
        let landed = state == CommandState::Completed;
        let info = checkout.command().info();
        tracing::warn!(
            target: "redraft.executor",
            operation = operation.as_str(),
            description = %info.description,
            state = %state,
            "operation cancelled mid-effect"
        );

        let ok = match operation {
            Operation::Execute | Operation::Redo => landed,
            Operation::Undo => false,
        };
        let evicted = self.record(operation, checkout, ok);
        drop(flight);

        self.notifier
            .publish(HistoryEvent::CommandFailed { operation, info: info.clone() });
        self.publish_evicted(evicted);
        self.notifier.publish(HistoryEvent::HistoryChanged { cause: Some(info) });
    }

    fn publish_evicted(&self, evicted: Vec<CommandInfo>) {
        for info in evicted {
            self.notifier.publish(HistoryEvent::HistoryEvicted { info });
        }
    }

    fn mark_current(&self, description: &str) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(description.to_string());
    }

    fn report_failure(&self, operation: Operation, info: CommandInfo) -> ExecutorError {
        let message = info
            .error_message
            .clone()
            .unwrap_or_else(|| "effect reported failure".to_string());
        tracing::warn!(
            target: "redraft.executor",
            operation = operation.as_str(),
            description = %info.description,
            error = %message,
            "operation failed"
        );
        let description = info.description.clone();
        self.notifier
            .publish(HistoryEvent::CommandFailed { operation, info });
        match operation {
            Operation::Execute => ExecutorError::ExecutionFailure {
                description,
                message,
            },
            Operation::Undo => ExecutorError::UndoFailure {
                description,
                message,
            },
            Operation::Redo => ExecutorError::RedoFailure {
                description,
                message,
            },
        }
    }

    fn lock_history(&self) -> MutexGuard<'_, HistoryStore> {
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Outcome of an effect that ran to completion.
struct Settled {
    info: CommandInfo,
    ok: bool,
    evicted: Vec<CommandInfo>,
}

/// An operation between checkout and record.
///
/// If the future driving it is dropped before the effect finishes, `Drop`
/// hands the command to [`Executor::recover`] so it is never lost.
struct Tracked<'a> {
    executor: &'a Executor,
    operation: Operation,
    flight: Option<FlightGuard<'a>>,
    checkout: Option<Checkout>,
}

impl<'a> Tracked<'a> {
    fn new(
        executor: &'a Executor,
        operation: Operation,
        flight: FlightGuard<'a>,
        checkout: Checkout,
    ) -> Self {
        Self {
            executor,
            operation,
            flight: Some(flight),
            checkout: Some(checkout),
        }
    }

    /// Run the effect, record the outcome, release the permit.
    async fn run(mut self) -> Result<Settled, ExecutorError> {
        let source = match self.operation {
            Operation::Redo => StackKind::Redo,
            Operation::Execute | Operation::Undo => StackKind::Undo,
        };
        let executor = self.executor;
        let cx = &executor.cx;
        let cmd = self
            .checkout
            .as_mut()
            .ok_or(ExecutorError::EmptyStack(source))?
            .command_mut();

        let span = operation_span(self.operation, cmd);
        let start = Instant::now();
        let ok = match self.operation {
            Operation::Undo => cmd.undo(cx).instrument(span.clone()).await,
            Operation::Execute | Operation::Redo => cmd.execute(cx).instrument(span.clone()).await,
        };
        finish_span(&span, start, ok);

        let checkout = self
            .checkout
            .take()
            .ok_or(ExecutorError::EmptyStack(source))?;
        let info = checkout.command().info();
        let evicted = executor.record(self.operation, checkout, ok);
        self.flight.take();
        Ok(Settled { info, ok, evicted })
    }
}

impl Drop for Tracked<'_> {
    fn drop(&mut self) {
        if let Some(checkout) = self.checkout.take() {
            self.executor
                .recover(self.operation, checkout, self.flight.take());
        }
    }
}

fn operation_span(operation: Operation, cmd: &dyn UndoableCmd) -> tracing::Span {
    macro_rules! span {
        ($name:literal) => {
            tracing::info_span!(
                target: "redraft.executor",
                $name,
                description = %cmd.description(),
                category = %cmd.category(),
                duration_us = tracing::field::Empty,
                result = tracing::field::Empty,
            )
        };
    }
    match operation {
        Operation::Execute => span!("executor.execute"),
        Operation::Undo => span!("executor.undo"),
        Operation::Redo => span!("executor.redo"),
    }
}

fn finish_span(span: &tracing::Span, start: Instant, ok: bool) {
    span.record("duration_us", start.elapsed().as_micros() as u64);
    span.record("result", if ok { "ok" } else { "failed" });
}

// ============================================================================
// Tests
// ============================================================================
