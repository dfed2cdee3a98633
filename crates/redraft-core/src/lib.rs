#![forbid(unsafe_code)]

//! Command execution and undo/redo engine.
//!
//! Every editing action is a command with a guarded lifecycle
//! (`Pending → Executing → Completed → Undoing → Undone`, with `Failed` on
//! error). An [`Executor`] runs one command at a time, records successful
//! ones in a bounded [`HistoryStore`], and publishes [`HistoryEvent`]s.
//!
//! # Example
//!
//! ```ignore
//! use redraft_core::{CommandCategory, EffectCmd, EngineConfig, Executor};
//!
//! let executor = Executor::new(EngineConfig::default());
//! let cmd = EffectCmd::new(
//!     "Rename layer",
//!     CommandCategory::Layer,
//!     |data| async move { Ok(data) },
//!     |_| async { Ok(()) },
//! );
//! assert!(executor.execute(cmd).await);
//! assert!(executor.undo().await);
//! assert!(executor.redo().await);
//! ```
//!
//! # Modules
//!
//! - [`command`]: the [`UndoableCmd`] trait, [`CommandLifecycle`] wrapper and
//!   shared [`CommandCore`].
//! - [`composite`]: atomic multi-step [`CompositeCommand`].
//! - [`effect`]: [`EffectCmd`], a command built from async closures.
//! - [`history`]: bounded undo/redo stacks.
//! - [`executor`]: the single-flight [`Executor`].
//! - [`events`]: observers and the broadcast channel.
//! - [`config`]: [`EngineConfig`] loading and validation.

pub mod command;
pub mod composite;
pub mod config;
pub mod effect;
pub mod error;
pub mod events;
pub mod executor;
pub mod history;

pub use command::{
    CommandCategory, CommandCore, CommandInfo, CommandLifecycle, CommandMetadata, CommandState,
    ENTRY_OVERHEAD_BYTES, EffectCx, Payload, UndoableCmd, payload_from,
};
pub use composite::CompositeCommand;
pub use config::{ConfigError, EngineConfig, ExecutorConfig};
pub use effect::{EffectCmd, EffectData};
pub use error::{CommandError, CommandResult, ExecutorError};
pub use events::{HistoryEvent, HistoryObserver, Notifier, ObserverId, Operation};
pub use executor::Executor;
pub use history::{
    Checkout, HistoryConfig, HistoryEntry, HistoryStatistics, HistoryStore, StackKind,
};
