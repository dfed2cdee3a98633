#![forbid(unsafe_code)]

//! Layer and document commands.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use redraft_core::{
    CommandCategory, CommandCore, CommandError, CommandResult, EffectCx, UndoableCmd, payload_from,
};

use crate::backend::{CadBackend, LayerSpec};

const LAYER_ID: &str = "layer_id";
const DOCUMENT_ID: &str = "document_id";

fn captured(core: &CommandCore, key: &str) -> Option<String> {
    core.undo_data()
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Previous id, recorded in the execution data on an earlier run.
fn previous(core: &CommandCore, key: &str) -> Option<String> {
    core.execution_data()
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Creates a layer; undo deletes it.
pub struct CreateLayer {
    core: CommandCore,
    backend: Arc<dyn CadBackend>,
    spec: LayerSpec,
}

impl CreateLayer {
    #[must_use]
    pub fn new(backend: Arc<dyn CadBackend>, spec: LayerSpec) -> Self {
        Self {
            core: CommandCore::new(
                format!("Create Layer '{}'", spec.name),
                CommandCategory::Layer,
            ),
            backend,
            spec,
        }
    }

    #[must_use]
    pub fn layer_id(&self) -> Option<String> {
        captured(&self.core, LAYER_ID)
    }
}

#[async_trait]
impl UndoableCmd for CreateLayer {
    fn core(&self) -> &CommandCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut CommandCore {
        &mut self.core
    }

    async fn apply(&mut self, _cx: &EffectCx) -> CommandResult {
        let restore = previous(&self.core, LAYER_ID);
        let record = self
            .backend
            .create_layer(&self.spec, restore.as_deref())
            .await?;

        let mut execution = payload_from(&self.spec)?;
        execution.insert(LAYER_ID.to_string(), Value::from(record.id.clone()));
        self.core.set_execution_data(execution);
        self.core.capture_undo(LAYER_ID, record.id);
        Ok(())
    }

    async fn revert(&mut self, _cx: &EffectCx) -> CommandResult {
        let id = self
            .layer_id()
            .ok_or_else(|| CommandError::NotUndoable(LAYER_ID.into()))?;
        self.backend.delete_layer(&id).await?;
        self.core.release_undo(LAYER_ID);
        Ok(())
    }

    fn undo_ready(&self) -> bool {
        self.core.has_undo_key(LAYER_ID)
    }

    fn debug_name(&self) -> &'static str {
        "CreateLayer"
    }
}

/// Request to create a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
}

impl DocumentSpec {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template_id: None,
        }
    }
}

/// Creates a document.
///
/// Undoable only when the backend can delete documents; otherwise it stays in
/// history with `can_undo() == false`.
pub struct CreateDocument {
    core: CommandCore,
    backend: Arc<dyn CadBackend>,
    spec: DocumentSpec,
}

impl CreateDocument {
    #[must_use]
    pub fn new(backend: Arc<dyn CadBackend>, spec: DocumentSpec) -> Self {
        Self {
            core: CommandCore::new(
                format!("Create Document '{}'", spec.name),
                CommandCategory::Document,
            ),
            backend,
            spec,
        }
    }

    #[must_use]
    pub fn document_id(&self) -> Option<String> {
        captured(&self.core, DOCUMENT_ID)
    }
}

#[async_trait]
impl UndoableCmd for CreateDocument {
    fn core(&self) -> &CommandCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut CommandCore {
        &mut self.core
    }

    async fn apply(&mut self, _cx: &EffectCx) -> CommandResult {
        let restore = previous(&self.core, DOCUMENT_ID);
        let record = self
            .backend
            .create_document(
                &self.spec.name,
                self.spec.template_id.as_deref(),
                restore.as_deref(),
            )
            .await?;

        let mut execution = payload_from(&self.spec)?;
        execution.insert(DOCUMENT_ID.to_string(), Value::from(record.id.clone()));
        self.core.set_execution_data(execution);
        self.core.capture_undo(DOCUMENT_ID, record.id);
        Ok(())
    }

    async fn revert(&mut self, _cx: &EffectCx) -> CommandResult {
        let id = self
            .document_id()
            .ok_or_else(|| CommandError::NotUndoable(DOCUMENT_ID.into()))?;
        self.backend.delete_document(&id).await?;
        self.core.release_undo(DOCUMENT_ID);
        Ok(())
    }

    fn undo_ready(&self) -> bool {
        self.core.has_undo_key(DOCUMENT_ID) && self.backend.supports_document_deletion()
    }

    fn debug_name(&self) -> &'static str {
        "CreateDocument"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Properties;
    use crate::memory::{BackendOp, InMemoryBackend};
    use redraft_core::{CommandLifecycle, CommandState};

    fn walls() -> LayerSpec {
        LayerSpec {
            document_id: "d1".into(),
            name: "walls".into(),
            properties: Properties::from([("color".to_string(), "red".to_string())]),
        }
    }

    #[tokio::test]
    async fn layer_create_undo_redo_keeps_id() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.create_document("Plan", None, None).await.unwrap();
        let mut cmd = CreateLayer::new(backend.clone(), walls());
        let cx = EffectCx::unbounded();

        assert_eq!(cmd.description(), "Create Layer 'walls'");
        assert!(cmd.execute(&cx).await);
        assert_eq!(cmd.layer_id().as_deref(), Some("l1"));

        assert!(cmd.undo(&cx).await);
        assert!(backend.layers().is_empty());

        assert!(cmd.execute(&cx).await);
        assert_eq!(cmd.layer_id().as_deref(), Some("l1"));
        assert_eq!(backend.layers()[0].properties["color"], "red");
    }

    #[tokio::test]
    async fn duplicate_layer_fails() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.create_document("Plan", None, None).await.unwrap();
        let cx = EffectCx::unbounded();

        assert!(CreateLayer::new(backend.clone(), walls()).execute(&cx).await);
        let mut second = CreateLayer::new(backend.clone(), walls());
        assert!(!second.execute(&cx).await);
        assert_eq!(second.state(), CommandState::Failed);
    }

    #[tokio::test]
    async fn document_is_undoable_when_backend_deletes() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut cmd = CreateDocument::new(backend.clone(), DocumentSpec::new("Plan"));
        let cx = EffectCx::unbounded();

        assert_eq!(cmd.description(), "Create Document 'Plan'");
        assert!(cmd.execute(&cx).await);
        assert_eq!(cmd.document_id().as_deref(), Some("d1"));
        assert!(cmd.can_undo());
        assert!(cmd.undo(&cx).await);
        assert!(backend.documents().is_empty());
    }

    #[tokio::test]
    async fn document_is_not_undoable_without_deletion() {
        let backend = Arc::new(InMemoryBackend::new().without_document_deletion());
        let mut cmd = CreateDocument::new(backend.clone(), DocumentSpec::new("Plan"));
        let cx = EffectCx::unbounded();

        assert!(cmd.execute(&cx).await);
        assert!(!cmd.can_undo());
        assert!(!cmd.undo(&cx).await);
        assert_eq!(cmd.state(), CommandState::Completed);
        assert_eq!(backend.documents().len(), 1);
    }

    #[tokio::test]
    async fn failed_layer_delete_keeps_layer() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.create_document("Plan", None, None).await.unwrap();
        let mut cmd = CreateLayer::new(backend.clone(), walls());
        let cx = EffectCx::unbounded();
        assert!(cmd.execute(&cx).await);

        backend.fail_next(BackendOp::DeleteLayer);
        assert!(!cmd.undo(&cx).await);
        assert_eq!(backend.layers().len(), 1);
        assert!(cmd.can_undo());
    }
}
