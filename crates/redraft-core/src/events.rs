#![forbid(unsafe_code)]

//! Change notifications.
//!
//! Every history mutation is published twice: synchronously to registered
//! [`HistoryObserver`]s (in registration order) and then to a
//! `tokio::sync::broadcast` channel for async subscribers. Observers run after
//! the executor has released its history lock, so they may query the executor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::command::CommandInfo;

/// The executor operation that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Execute,
    Undo,
    Redo,
}

impl Operation {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Execute => "execute",
            Self::Undo => "undo",
            Self::Redo => "redo",
        }
    }
}

/// Notification emitted by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum HistoryEvent {
    CommandExecuted { info: CommandInfo },
    CommandUndone { info: CommandInfo },
    CommandRedone { info: CommandInfo },
    /// The stacks changed. `cause` is `None` for `clear_history`.
    HistoryChanged { cause: Option<CommandInfo> },
    /// The oldest undo entry was dropped to stay within limits.
    HistoryEvicted { info: CommandInfo },
    CommandFailed {
        operation: Operation,
        info: CommandInfo,
    },
}

impl HistoryEvent {
    /// Stable event name, e.g. `"command-executed"`.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CommandExecuted { .. } => "command-executed",
            Self::CommandUndone { .. } => "command-undone",
            Self::CommandRedone { .. } => "command-redone",
            Self::HistoryChanged { .. } => "history-changed",
            Self::HistoryEvicted { .. } => "history-evicted",
            Self::CommandFailed { .. } => "command-failed",
        }
    }

    /// The command the event is about, if any.
    #[must_use]
    pub fn info(&self) -> Option<&CommandInfo> {
        match self {
            Self::CommandExecuted { info }
            | Self::CommandUndone { info }
            | Self::CommandRedone { info }
            | Self::HistoryEvicted { info }
            | Self::CommandFailed { info, .. } => Some(info),
            Self::HistoryChanged { cause } => cause.as_ref(),
        }
    }
}

/// Synchronous event sink.
pub trait HistoryObserver: Send + Sync {
    fn on_event(&self, event: &HistoryEvent);
}

impl<F> HistoryObserver for F
where
    F: Fn(&HistoryEvent) + Send + Sync,
{
    fn on_event(&self, event: &HistoryEvent) {
        self(event);
    }
}

/// Handle returned by [`Notifier::add_observer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

type ObserverList = Vec<(ObserverId, Arc<dyn HistoryObserver>)>;

/// Fan-out for history events.
pub struct Notifier {
    sender: broadcast::Sender<HistoryEvent>,
    observers: Mutex<ObserverList>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("observers", &self.lock_observers().len())
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}

impl Notifier {
    /// `capacity` is the broadcast buffer; slow receivers see `Lagged`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            observers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HistoryEvent> {
        self.sender.subscribe()
    }

    pub fn add_observer(&self, observer: Arc<dyn HistoryObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock_observers().push((id, observer));
        id
    }

    /// Returns `false` if `id` was not registered.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.lock_observers();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    /// Deliver to observers, then to broadcast subscribers.
    pub fn publish(&self, event: HistoryEvent) {
        let snapshot: Vec<Arc<dyn HistoryObserver>> = self
            .lock_observers()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        tracing::trace!(
            target: "redraft.executor",
            event = event.name(),
            observers = snapshot.len(),
            "publishing event"
        );

        for observer in &snapshot {
            observer.on_event(&event);
        }

        // No receivers is not an error.
        let _ = self.sender.send(event);
    }

    fn lock_observers(&self) -> std::sync::MutexGuard<'_, ObserverList> {
        self.observers.lock().unwrap_or_else(|e| e.into_inner())
    }
}
