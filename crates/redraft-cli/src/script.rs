#![forbid(unsafe_code)]

//! Scripted sessions: a list of execute/undo/redo/clear steps run against an
//! executor and an in-memory backend.
//!
//! ```toml
//! [[steps]]
//! action = "execute"
//! command = { op = "create_document", name = "Plan" }
//!
//! [[steps]]
//! action = "undo"
//! ```

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use redraft_commands::{
    CircleSpec, CommandFactory, CommandSpec, DocumentSpec, EntityRecord, InMemoryBackend, LineSpec,
    Point,
};
use redraft_core::{
    EngineConfig, Executor, ExecutorError, HistoryEntry, HistoryEvent, HistoryStatistics,
};

use crate::error::{CliError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScriptStep {
    Execute { command: CommandSpec },
    Undo,
    Redo,
    Clear,
}

impl ScriptStep {
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self {
            Self::Execute { .. } => "execute",
            Self::Undo => "undo",
            Self::Redo => "redo",
            Self::Clear => "clear",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Script {
    /// Continue after a failed step instead of stopping.
    #[serde(default)]
    pub keep_going: bool,
    pub steps: Vec<ScriptStep>,
}

impl Script {
    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Load by extension: `.json` is JSON, anything else TOML.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CliError::MissingScript {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
    }

    /// Create a document, draw a line and a circle, undo both, redo the line.
    #[must_use]
    pub fn demo() -> Self {
        let execute = |command| ScriptStep::Execute { command };
        Self {
            keep_going: false,
            steps: vec![
                execute(CommandSpec::CreateDocument(DocumentSpec::new("Demo"))),
                execute(CommandSpec::DrawLine(LineSpec::new(
                    "d1",
                    Point::new(0.0, 0.0),
                    Point::new(10.0, 5.0),
                ))),
                execute(CommandSpec::DrawCircle(CircleSpec::new(
                    "d1",
                    Point::new(5.0, 5.0),
                    3.0,
                ))),
                ScriptStep::Undo,
                ScriptStep::Undo,
                ScriptStep::Redo,
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub index: usize,
    pub action: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub generated_at: DateTime<Utc>,
    pub steps: Vec<StepOutcome>,
    pub events: Vec<String>,
    pub history: Vec<HistoryEntry>,
    pub statistics: HistoryStatistics,
    pub entities: Vec<EntityRecord>,
}

impl SessionReport {
    /// First failed step, if any.
    #[must_use]
    pub fn first_failure(&self) -> Option<&StepOutcome> {
        self.steps.iter().find(|step| !step.ok)
    }
}

/// Owns the engine for one scripted session.
pub struct Session {
    backend: Arc<InMemoryBackend>,
    factory: CommandFactory,
    executor: Executor,
    events: Arc<Mutex<Vec<String>>>,
}

impl Session {
    pub fn new(config: EngineConfig, backend: InMemoryBackend) -> Result<Self> {
        let backend = Arc::new(backend);
        let factory = CommandFactory::new(backend.clone());
        let executor = Executor::try_new(config)?;

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        executor.add_observer(Arc::new(move |event: &HistoryEvent| {
            tracing::debug!(target: "redraft.cli", event = event.name(), "history event");
            sink.lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(event.name().to_string());
        }));

        Ok(Self {
            backend,
            factory,
            executor,
            events,
        })
    }

    #[must_use]
    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    async fn step(&self, step: ScriptStep) -> std::result::Result<Option<String>, ExecutorError> {
        match step {
            ScriptStep::Execute { command } => {
                let info = self.executor.submit(self.factory.build(command)).await?;
                Ok(Some(info.description))
            }
            ScriptStep::Undo => Ok(Some(self.executor.try_undo().await?.description)),
            ScriptStep::Redo => Ok(Some(self.executor.try_redo().await?.description)),
            ScriptStep::Clear => {
                self.executor.clear_history();
                Ok(None)
            }
        }
    }

    /// Run every step and collect the final engine state.
    pub async fn run(&self, script: Script) -> SessionReport {
        let mut outcomes = Vec::with_capacity(script.steps.len());
        for (index, step) in script.steps.into_iter().enumerate() {
            let action = step.action();
            let outcome = match self.step(step).await {
                Ok(description) => StepOutcome {
                    index,
                    action: action.to_string(),
                    ok: true,
                    description,
                    error: None,
                },
                Err(err) => {
                    tracing::warn!(target: "redraft.cli", index, action, error = %err, "step failed");
                    StepOutcome {
                        index,
                        action: action.to_string(),
                        ok: false,
                        description: None,
                        error: Some(err.to_string()),
                    }
                }
            };
            let failed = !outcome.ok;
            outcomes.push(outcome);
            if failed && !script.keep_going {
                break;
            }
        }

        SessionReport {
            generated_at: Utc::now(),
            steps: outcomes,
            events: self
                .events
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            history: self.executor.history(),
            statistics: self.executor.statistics(),
            entities: self.backend.entities(),
        }
    }
}
