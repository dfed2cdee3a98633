#![forbid(unsafe_code)]

//! Atomic multi-step commands.
//!
//! A [`CompositeCommand`] runs an ordered list of members as one history
//! entry. If a member fails, every member that already succeeded is undone in
//! reverse order before the composite reports failure.
//!
//! The executed subset is tracked in execution order. Undo walks it backwards
//! and keeps going after a member fails; members whose undo failed stay in the
//! subset (still `Completed`) so a later undo retries only those.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::command::{
    CommandCategory, CommandCore, CommandLifecycle, CommandState, EffectCx, ENTRY_OVERHEAD_BYTES,
    UndoableCmd,
};
use crate::error::{CommandError, CommandResult};

/// A batch of commands that execute and undo together.
pub struct CompositeCommand {
    core: CommandCore,
    /// Members in execution order. Never reordered.
    commands: Vec<Box<dyn UndoableCmd>>,
    /// Indices of members that executed and are not yet undone, in execution order.
    executed: Vec<usize>,
}

impl fmt::Debug for CompositeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeCommand")
            .field("description", &self.core.description())
            .field("commands_count", &self.commands.len())
            .field("executed", &self.executed)
            .finish()
    }
}

impl CompositeCommand {
    /// Create an empty composite in the `Editing` category.
    #[must_use]
    pub fn new(description: impl Into<String>) -> Self {
        Self::with_category(description, CommandCategory::Editing)
    }

    #[must_use]
    pub fn with_category(description: impl Into<String>, category: CommandCategory) -> Self {
        Self {
            core: CommandCore::new(description, category),
            commands: Vec::new(),
            executed: Vec::new(),
        }
    }

    /// Append a member (builder form).
    #[must_use]
    pub fn with_command(mut self, cmd: impl UndoableCmd + 'static) -> Self {
        self.commands.push(Box::new(cmd));
        self
    }

    /// Append a boxed member.
    pub fn push(&mut self, cmd: Box<dyn UndoableCmd>) {
        self.commands.push(cmd);
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Members in execution order.
    pub fn commands(&self) -> impl Iterator<Item = &dyn UndoableCmd> {
        self.commands.iter().map(|cmd| cmd.as_ref())
    }

    /// Number of members currently executed and not undone.
    #[must_use]
    pub fn executed_len(&self) -> usize {
        self.executed.len()
    }

    /// Undo the executed subset in reverse order, continuing past failures.
    ///
    /// Returns the number of members whose undo failed; those stay in the subset.
    async fn undo_executed(&mut self, cx: &EffectCx) -> usize {
        let executed = std::mem::take(&mut self.executed);
        let mut still_applied = Vec::new();

        for &index in executed.iter().rev() {
            let member = &mut self.commands[index];
            if member.undo(cx).await {
                tracing::debug!(
                    target: "redraft.composite",
                    composite = %self.core.description(),
                    index,
                    member = %member.description(),
                    "member undone"
                );
            } else {
                tracing::warn!(
                    target: "redraft.composite",
                    composite = %self.core.description(),
                    index,
                    member = %member.description(),
                    error = member.core().error_message().unwrap_or("undo refused"),
                    "member undo failed, continuing"
                );
                still_applied.push(index);
            }
        }

        still_applied.reverse();
        self.executed = still_applied;
        self.capture_executed();
        self.executed.len()
    }

    fn capture_executed(&mut self) {
        let executed: Vec<Value> = self.executed.iter().map(|&i| Value::from(i)).collect();
        self.core.capture_undo("executed", executed);
    }
}

#[async_trait]
impl UndoableCmd for CompositeCommand {
    fn core(&self) -> &CommandCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut CommandCore {
        &mut self.core
    }

    async fn apply(&mut self, cx: &EffectCx) -> CommandResult {
        self.executed.clear();

        for index in 0..self.commands.len() {
            let member = &mut self.commands[index];
            if member.execute(cx).await {
                tracing::debug!(
                    target: "redraft.composite",
                    composite = %self.core.description(),
                    index,
                    member = %member.description(),
                    "member executed"
                );
                self.executed.push(index);
                continue;
            }

            let description = member.description().to_string();
            let reason = member
                .core()
                .error_message()
                .unwrap_or("effect reported failure")
                .to_string();
            tracing::warn!(
                target: "redraft.composite",
                composite = %self.core.description(),
                index,
                member = %description,
                rollback = self.executed.len(),
                "member failed, rolling back"
            );

            let rollback_failures = self.undo_executed(cx).await;
            if rollback_failures > 0 {
                tracing::error!(
                    target: "redraft.composite",
                    composite = %self.core.description(),
                    rollback_failures,
                    "rollback incomplete; members remain applied"
                );
            }
            return Err(CommandError::SubCommandFailed {
                index,
                description,
                reason,
                rollback_failures,
            });
        }

        self.core.capture_execution("steps", self.commands.len());
        self.capture_executed();
        Ok(())
    }

    async fn revert(&mut self, cx: &EffectCx) -> CommandResult {
        let attempted = self.executed.len();
        let failed = self.undo_executed(cx).await;
        if failed == 0 {
            Ok(())
        } else {
            Err(CommandError::RollbackIncomplete { failed, attempted })
        }
    }

    fn undo_ready(&self) -> bool {
        self.executed
            .iter()
            .all(|&index| self.commands[index].can_undo())
    }

    fn size_bytes(&self) -> usize {
        ENTRY_OVERHEAD_BYTES
            + self.core.payload_bytes()
            + self
                .commands
                .iter()
                .map(|cmd| cmd.size_bytes())
                .sum::<usize>()
    }

    fn is_aggregate(&self) -> bool {
        true
    }

    fn partially_applied(&self) -> bool {
        !self.executed.is_empty()
    }

    /// Members caught mid-effect are settled, then the executed subset is
    /// rebuilt from member states so a later undo reverts exactly what landed.
    fn on_interrupt(&mut self) {
        for member in &mut self.commands {
            if matches!(
                member.state(),
                CommandState::Executing | CommandState::Undoing
            ) {
                member.interrupt();
            }
        }
        self.executed = self
            .commands
            .iter()
            .enumerate()
            .filter(|(_, member)| member.state() == CommandState::Completed)
            .map(|(index, _)| index)
            .collect();
        self.capture_executed();
        tracing::warn!(
            target: "redraft.composite",
            composite = %self.core.description(),
            applied = self.executed.len(),
            "interrupted; executed subset rebuilt"
        );
    }

    fn debug_name(&self) -> &'static str {
        "CompositeCommand"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    type Journal = Arc<Mutex<Vec<String>>>;

    struct Step {
        core: CommandCore,
        journal: Journal,
        fail_apply: bool,
        stall_apply: bool,
        fail_revert: Arc<Mutex<bool>>,
    }

    impl Step {
        fn new(name: &str, journal: &Journal) -> Self {
            Self {
                core: CommandCore::new(name, CommandCategory::Drawing),
                journal: Arc::clone(journal),
                fail_apply: false,
                stall_apply: false,
                fail_revert: Arc::new(Mutex::new(false)),
            }
        }

        fn failing(mut self) -> Self {
            self.fail_apply = true;
            self
        }

        fn stalling(mut self) -> Self {
            self.stall_apply = true;
            self
        }
    }

    #[async_trait]
    impl UndoableCmd for Step {
        fn core(&self) -> &CommandCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut CommandCore {
            &mut self.core
        }

        async fn apply(&mut self, _cx: &EffectCx) -> CommandResult {
            self.journal
                .lock()
                .unwrap()
                .push(format!("exec {}", self.core.description()));
            if self.fail_apply {
                return Err(CommandError::rejected("step failed"));
            }
            if self.stall_apply {
                std::future::pending::<()>().await;
            }
            Ok(())
        }

        async fn revert(&mut self, _cx: &EffectCx) -> CommandResult {
            self.journal
                .lock()
                .unwrap()
                .push(format!("undo {}", self.core.description()));
            if *self.fail_revert.lock().unwrap() {
                return Err(CommandError::rejected("revert failed"));
            }
            Ok(())
        }
    }

    fn entries(journal: &Journal) -> Vec<String> {
        journal.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn executes_members_in_order() {
        let journal = Journal::default();
        let mut composite = CompositeCommand::new("All")
            .with_command(Step::new("A", &journal))
            .with_command(Step::new("B", &journal));

        assert!(composite.execute(&EffectCx::unbounded()).await);
        assert_eq!(composite.state(), CommandState::Completed);
        assert_eq!(composite.executed_len(), 2);
        assert_eq!(entries(&journal), vec!["exec A", "exec B"]);
        assert!(composite.can_undo());
    }

    #[tokio::test]
    async fn failure_rolls_back_in_reverse_order() {
        let journal = Journal::default();
        let mut composite = CompositeCommand::new("All")
            .with_command(Step::new("A", &journal))
            .with_command(Step::new("B", &journal))
            .with_command(Step::new("C", &journal).failing());

        assert!(!composite.execute(&EffectCx::unbounded()).await);
        assert_eq!(composite.state(), CommandState::Failed);
        assert_eq!(
            entries(&journal),
            vec!["exec A", "exec B", "exec C", "undo B", "undo A"]
        );
        assert_eq!(composite.executed_len(), 0);
        let message = composite.core().error_message().unwrap();
        assert!(message.contains("step 2"));
        assert!(message.contains("rollback failures: 0"));
    }

    #[tokio::test]
    async fn undo_reverses_members() {
        let journal = Journal::default();
        let mut composite = CompositeCommand::new("All")
            .with_command(Step::new("A", &journal))
            .with_command(Step::new("B", &journal));
        let cx = EffectCx::unbounded();

        assert!(composite.execute(&cx).await);
        assert!(composite.undo(&cx).await);
        assert_eq!(composite.state(), CommandState::Undone);
        assert_eq!(composite.executed_len(), 0);
        assert_eq!(
            entries(&journal),
            vec!["exec A", "exec B", "undo B", "undo A"]
        );
    }

    #[tokio::test]
    async fn partial_undo_failure_keeps_failed_members() {
        let journal = Journal::default();
        let a = Step::new("A", &journal);
        let b = Step::new("B", &journal);
        let c = Step::new("C", &journal);
        let b_fails = Arc::clone(&b.fail_revert);
        let mut composite = CompositeCommand::new("All")
            .with_command(a)
            .with_command(b)
            .with_command(c);
        let cx = EffectCx::unbounded();

        assert!(composite.execute(&cx).await);
        *b_fails.lock().unwrap() = true;

        assert!(!composite.undo(&cx).await);
        // Best effort: A is still undone after B fails.
        assert_eq!(
            entries(&journal)[3..],
            ["undo C", "undo B", "undo A"]
        );
        assert_eq!(composite.state(), CommandState::Completed);
        assert_eq!(composite.executed_len(), 1);
        assert!(composite.can_undo());
        assert!(
            composite
                .core()
                .error_message()
                .unwrap()
                .contains("1 of 3")
        );

        // Retry only touches the member that is still applied.
        *b_fails.lock().unwrap() = false;
        assert!(composite.undo(&cx).await);
        assert_eq!(composite.state(), CommandState::Undone);
        assert_eq!(entries(&journal).last().unwrap(), "undo B");
        assert_eq!(entries(&journal).len(), 7);
    }

    #[tokio::test]
    async fn redo_after_undo_runs_members_again() {
        let journal = Journal::default();
        let mut composite = CompositeCommand::new("All")
            .with_command(Step::new("A", &journal))
            .with_command(Step::new("B", &journal));
        let cx = EffectCx::unbounded();

        assert!(composite.execute(&cx).await);
        assert!(composite.undo(&cx).await);
        assert!(composite.execute(&cx).await);
        assert_eq!(composite.executed_len(), 2);
        assert!(
            composite
                .commands()
                .all(|cmd| cmd.state() == CommandState::Completed)
        );
    }

    #[tokio::test]
    async fn interrupted_apply_keeps_landed_members_undoable() {
        let journal = Journal::default();
        let mut composite = CompositeCommand::new("All")
            .with_command(Step::new("A", &journal))
            .with_command(Step::new("B", &journal).stalling())
            .with_command(Step::new("C", &journal));
        let cx = EffectCx::unbounded();

        let run = tokio::time::timeout(Duration::from_millis(20), composite.execute(&cx));
        assert!(run.await.is_err());
        assert_eq!(composite.state(), CommandState::Executing);

        assert_eq!(composite.interrupt(), CommandState::Completed);
        assert_eq!(composite.executed_len(), 1);
        let states: Vec<_> = composite.commands().map(|cmd| cmd.state()).collect();
        assert_eq!(
            states,
            vec![
                CommandState::Completed,
                CommandState::Failed,
                CommandState::Pending
            ]
        );
        assert!(
            composite
                .core()
                .error_message()
                .unwrap()
                .contains("cancelled")
        );

        assert!(composite.undo(&cx).await);
        assert_eq!(entries(&journal), vec!["exec A", "exec B", "undo A"]);
        assert_eq!(composite.state(), CommandState::Undone);
    }

    #[tokio::test]
    async fn interrupt_before_any_member_lands_fails() {
        let journal = Journal::default();
        let mut composite =
            CompositeCommand::new("All").with_command(Step::new("A", &journal).stalling());

        let cx = EffectCx::unbounded();
        let run = tokio::time::timeout(Duration::from_millis(20), composite.execute(&cx));
        assert!(run.await.is_err());
        assert_eq!(composite.interrupt(), CommandState::Failed);
        assert!(!composite.can_undo());
        // Settled states are left alone.
        assert_eq!(composite.interrupt(), CommandState::Failed);
    }

    #[tokio::test]
    async fn empty_composite_completes() {
        let mut composite = CompositeCommand::new("Nothing");
        assert!(composite.is_empty());
        assert!(composite.execute(&EffectCx::unbounded()).await);
        assert!(composite.can_undo());
    }

    #[test]
    fn size_accounts_for_members() {
        let journal = Journal::default();
        let composite = CompositeCommand::new("All")
            .with_command(Step::new("A", &journal))
            .with_command(Step::new("B", &journal));
        assert_eq!(composite.len(), 2);
        assert_eq!(composite.size_bytes(), 3 * ENTRY_OVERHEAD_BYTES);
    }
}
