#![forbid(unsafe_code)]

//! Commands built from caller-supplied async effects.
//!
//! [`EffectCmd`] is the construction boundary for code that does not want to
//! define its own [`UndoableCmd`] type: supply a description, a category and
//! two async callables, and the engine treats the result like any other
//! command.
//!
//! ```ignore
//! let cmd = EffectCmd::new(
//!     "Rename layer",
//!     CommandCategory::Layer,
//!     |data| async move { Ok(data) },
//!     |_data| async move { Ok(()) },
//! );
//! executor.execute(cmd).await;
//! ```

use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;

use crate::command::{CommandCategory, CommandCore, EffectCx, Payload, UndoableCmd};
use crate::error::{CommandError, CommandResult};

/// Payloads handed to and returned from effect callables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectData {
    pub execution_data: Payload,
    pub undo_data: Payload,
}

impl EffectData {
    fn from_core(core: &CommandCore) -> Self {
        Self {
            execution_data: core.execution_data().clone(),
            undo_data: core.undo_data().clone(),
        }
    }
}

/// Callback type for the execute effect.
pub type ExecuteEffectFn =
    Box<dyn Fn(EffectData) -> BoxFuture<'static, Result<EffectData, CommandError>> + Send + Sync>;
/// Callback type for the undo effect.
pub type UndoEffectFn = Box<dyn Fn(EffectData) -> BoxFuture<'static, CommandResult> + Send + Sync>;

/// Command whose effects are opaque async callables.
///
/// The execute callable receives the payloads from the previous run (empty on
/// the first run) and returns the payloads to capture. The undo callable
/// receives the captured payloads.
pub struct EffectCmd {
    core: CommandCore,
    execute_effect: ExecuteEffectFn,
    undo_effect: UndoEffectFn,
    required_undo_keys: Vec<String>,
}

impl fmt::Debug for EffectCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectCmd")
            .field("core", &self.core)
            .field("required_undo_keys", &self.required_undo_keys)
            .finish()
    }
}

impl EffectCmd {
    pub fn new<E, EF, U, UF>(
        description: impl Into<String>,
        category: CommandCategory,
        execute_effect: E,
        undo_effect: U,
    ) -> Self
    where
        E: Fn(EffectData) -> EF + Send + Sync + 'static,
        EF: Future<Output = Result<EffectData, CommandError>> + Send + 'static,
        U: Fn(EffectData) -> UF + Send + Sync + 'static,
        UF: Future<Output = CommandResult> + Send + 'static,
    {
        Self {
            core: CommandCore::new(description, category),
            execute_effect: Box::new(move |data| execute_effect(data).boxed()),
            undo_effect: Box::new(move |data| undo_effect(data).boxed()),
            required_undo_keys: Vec::new(),
        }
    }

    /// Require `key` in the captured undo data before undo is allowed.
    #[must_use]
    pub fn requires_undo_key(mut self, key: impl Into<String>) -> Self {
        self.required_undo_keys.push(key.into());
        self
    }
}

#[async_trait]
impl UndoableCmd for EffectCmd {
    fn core(&self) -> &CommandCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut CommandCore {
        &mut self.core
    }

    async fn apply(&mut self, _cx: &EffectCx) -> CommandResult {
        let output = (self.execute_effect)(EffectData::from_core(&self.core)).await?;
        self.core.set_execution_data(output.execution_data);
        self.core.set_undo_data(output.undo_data);
        Ok(())
    }

    async fn revert(&mut self, _cx: &EffectCx) -> CommandResult {
        (self.undo_effect)(EffectData::from_core(&self.core)).await
    }

    fn undo_ready(&self) -> bool {
        self.required_undo_keys
            .iter()
            .all(|key| self.core.has_undo_key(key))
    }

    fn debug_name(&self) -> &'static str {
        "EffectCmd"
    }
}
