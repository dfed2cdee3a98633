#![forbid(unsafe_code)]

//! Drawing commands: line, circle and arc.
//!
//! All three share [`DrawCmd`]; the shape-specific parts live in a
//! [`DrawSpec`]. Execute creates the entity and captures its id; undo deletes
//! it. Redo recreates the entity under the id it had before.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use redraft_core::{
    CommandCategory, CommandCore, CommandError, CommandResult, EffectCx, UndoableCmd, payload_from,
};

use crate::backend::{BackendResult, CadBackend, EntityDraft, EntityRecord, Geometry, Point, Properties};

const ENTITY_ID: &str = "entity_id";

/// Shape-specific half of a drawing command.
pub trait DrawSpec: Serialize + Send + Sync + 'static {
    /// Label used in debug output.
    const NAME: &'static str;

    /// Description shown in history, e.g. `Draw Line (0.0,0.0) to (10.0,5.0)`.
    fn describe(&self) -> String;

    /// Entity request for this shape, without an id.
    fn draft(&self) -> EntityDraft;

    /// First-time creation through the backend's shape-specific call.
    fn draw<'a>(&'a self, backend: &'a dyn CadBackend) -> BoxFuture<'a, BackendResult<EntityRecord>>;
}

/// A line between two points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineSpec {
    pub document_id: String,
    pub start: Point,
    pub end: Point,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_id: Option<String>,
    #[serde(default)]
    pub properties: Properties,
}

impl LineSpec {
    #[must_use]
    pub fn new(document_id: impl Into<String>, start: Point, end: Point) -> Self {
        Self {
            document_id: document_id.into(),
            start,
            end,
            layer_id: None,
            properties: Properties::new(),
        }
    }

    #[must_use]
    pub fn on_layer(mut self, layer_id: impl Into<String>) -> Self {
        self.layer_id = Some(layer_id.into());
        self
    }
}

impl DrawSpec for LineSpec {
    const NAME: &'static str = "DrawLine";

    fn describe(&self) -> String {
        format!("Draw Line {} to {}", self.start, self.end)
    }

    fn draft(&self) -> EntityDraft {
        EntityDraft {
            id: None,
            document_id: self.document_id.clone(),
            layer_id: self.layer_id.clone(),
            geometry: Geometry::Line {
                start: self.start,
                end: self.end,
            },
            properties: self.properties.clone(),
        }
    }

    fn draw<'a>(&'a self, backend: &'a dyn CadBackend) -> BoxFuture<'a, BackendResult<EntityRecord>> {
        backend.draw_line(
            &self.document_id,
            self.start,
            self.end,
            self.layer_id.as_deref(),
            &self.properties,
        )
    }
}

/// A full circle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircleSpec {
    pub document_id: String,
    pub center: Point,
    pub radius: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_id: Option<String>,
    #[serde(default)]
    pub properties: Properties,
}

impl CircleSpec {
    #[must_use]
    pub fn new(document_id: impl Into<String>, center: Point, radius: f64) -> Self {
        Self {
            document_id: document_id.into(),
            center,
            radius,
            layer_id: None,
            properties: Properties::new(),
        }
    }
}

impl DrawSpec for CircleSpec {
    const NAME: &'static str = "DrawCircle";

    fn describe(&self) -> String {
        format!("Draw Circle at {} R={:.1}", self.center, self.radius)
    }

    fn draft(&self) -> EntityDraft {
        EntityDraft {
            id: None,
            document_id: self.document_id.clone(),
            layer_id: self.layer_id.clone(),
            geometry: Geometry::Circle {
                center: self.center,
                radius: self.radius,
            },
            properties: self.properties.clone(),
        }
    }

    fn draw<'a>(&'a self, backend: &'a dyn CadBackend) -> BoxFuture<'a, BackendResult<EntityRecord>> {
        backend.draw_circle(
            &self.document_id,
            self.center,
            self.radius,
            self.layer_id.as_deref(),
            &self.properties,
        )
    }
}

/// A circular arc; angles in radians.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcSpec {
    pub document_id: String,
    pub center: Point,
    pub radius: f64,
    pub start_angle: f64,
    pub end_angle: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_id: Option<String>,
    #[serde(default)]
    pub properties: Properties,
}

impl ArcSpec {
    #[must_use]
    pub fn new(
        document_id: impl Into<String>,
        center: Point,
        radius: f64,
        start_angle: f64,
        end_angle: f64,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            center,
            radius,
            start_angle,
            end_angle,
            layer_id: None,
            properties: Properties::new(),
        }
    }
}

impl DrawSpec for ArcSpec {
    const NAME: &'static str = "DrawArc";

    fn describe(&self) -> String {
        format!("Draw Arc at {} R={:.1}", self.center, self.radius)
    }

    fn draft(&self) -> EntityDraft {
        EntityDraft {
            id: None,
            document_id: self.document_id.clone(),
            layer_id: self.layer_id.clone(),
            geometry: Geometry::Arc {
                center: self.center,
                radius: self.radius,
                start_angle: self.start_angle,
                end_angle: self.end_angle,
            },
            properties: self.properties.clone(),
        }
    }

    fn draw<'a>(&'a self, backend: &'a dyn CadBackend) -> BoxFuture<'a, BackendResult<EntityRecord>> {
        backend.draw_arc(
            &self.document_id,
            self.center,
            self.radius,
            self.start_angle,
            self.end_angle,
            self.layer_id.as_deref(),
            &self.properties,
        )
    }
}

/// Command that creates one entity.
pub struct DrawCmd<S: DrawSpec> {
    core: CommandCore,
    backend: Arc<dyn CadBackend>,
    spec: S,
}

pub type DrawLine = DrawCmd<LineSpec>;
pub type DrawCircle = DrawCmd<CircleSpec>;
pub type DrawArc = DrawCmd<ArcSpec>;

impl<S: DrawSpec> DrawCmd<S> {
    #[must_use]
    pub fn new(backend: Arc<dyn CadBackend>, spec: S) -> Self {
        Self {
            core: CommandCore::new(spec.describe(), CommandCategory::Drawing),
            backend,
            spec,
        }
    }

    #[must_use]
    pub fn spec(&self) -> &S {
        &self.spec
    }

    /// Id of the entity this command currently owns.
    #[must_use]
    pub fn entity_id(&self) -> Option<&str> {
        self.core.undo_data().get(ENTITY_ID).and_then(Value::as_str)
    }

    fn previous_id(&self) -> Option<String> {
        self.core
            .execution_data()
            .get(ENTITY_ID)
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

impl<S: DrawSpec + fmt::Debug> fmt::Debug for DrawCmd<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(S::NAME)
            .field("spec", &self.spec)
            .field("state", &self.core.state())
            .field("entity_id", &self.entity_id())
            .finish()
    }
}

#[async_trait]
impl<S: DrawSpec> UndoableCmd for DrawCmd<S> {
    fn core(&self) -> &CommandCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut CommandCore {
        &mut self.core
    }

    async fn apply(&mut self, _cx: &EffectCx) -> CommandResult {
        let record = match self.previous_id() {
            Some(id) => {
                let mut draft = self.spec.draft();
                draft.id = Some(id);
                self.backend.create_entity(draft).await?
            }
            None => self.spec.draw(self.backend.as_ref()).await?,
        };

        let mut execution = payload_from(&self.spec)?;
        execution.insert(ENTITY_ID.to_string(), Value::from(record.id.clone()));
        self.core.set_execution_data(execution);
        self.core.capture_undo(ENTITY_ID, record.id);
        Ok(())
    }

    async fn revert(&mut self, _cx: &EffectCx) -> CommandResult {
        let id = self
            .entity_id()
            .map(str::to_string)
            .ok_or_else(|| CommandError::NotUndoable(ENTITY_ID.into()))?;
        self.backend.delete_entity(&id).await?;
        self.core.release_undo(ENTITY_ID);
        Ok(())
    }

    fn undo_ready(&self) -> bool {
        self.core.has_undo_key(ENTITY_ID)
    }

    fn debug_name(&self) -> &'static str {
        S::NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{BackendOp, InMemoryBackend};
    use redraft_core::{CommandLifecycle, CommandState};

    async fn backend() -> Arc<InMemoryBackend> {
        let backend = Arc::new(InMemoryBackend::new());
        backend.create_document("Plan", None, None).await.unwrap();
        backend
    }

    #[test]
    fn descriptions_match_history_format() {
        let line = LineSpec::new("d1", Point::new(0.0, 0.0), Point::new(10.0, 5.0));
        assert_eq!(line.describe(), "Draw Line (0.0,0.0) to (10.0,5.0)");

        let circle = CircleSpec::new("d1", Point::new(5.0, 5.0), 3.0);
        assert_eq!(circle.describe(), "Draw Circle at (5.0,5.0) R=3.0");

        let arc = ArcSpec::new("d1", Point::new(1.0, 2.0), 4.5, 0.0, 1.0);
        assert_eq!(arc.describe(), "Draw Arc at (1.0,2.0) R=4.5");
        assert_eq!(arc.start_angle, 0.0);
        assert_eq!(arc.end_angle, 1.0);
        assert!(arc.layer_id.is_none());
        assert!(arc.properties.is_empty());
    }

    #[tokio::test]
    async fn execute_captures_entity_id() {
        let backend = backend().await;
        let mut cmd = DrawLine::new(
            backend.clone(),
            LineSpec::new("d1", Point::new(0.0, 0.0), Point::new(10.0, 5.0)),
        );

        assert!(cmd.execute(&EffectCx::unbounded()).await);
        assert_eq!(cmd.entity_id(), Some("e1"));
        assert_eq!(cmd.core().execution_data()["entity_id"], "e1");
        assert_eq!(cmd.core().execution_data()["document_id"], "d1");
        assert!(cmd.can_undo());
        assert_eq!(backend.entity_ids(), vec!["e1"]);
    }

    #[tokio::test]
    async fn undo_deletes_and_redo_restores_same_id() {
        let backend = backend().await;
        let mut cmd = DrawCircle::new(
            backend.clone(),
            CircleSpec::new("d1", Point::new(0.0, 0.0), 2.0),
        );
        let cx = EffectCx::unbounded();

        assert!(cmd.execute(&cx).await);
        assert!(cmd.undo(&cx).await);
        assert!(backend.entities().is_empty());
        assert_eq!(cmd.entity_id(), None);

        assert!(cmd.execute(&cx).await);
        assert_eq!(cmd.entity_id(), Some("e1"));
        assert_eq!(backend.entity_ids(), vec!["e1"]);
    }

    #[tokio::test]
    async fn backend_failure_fails_command() {
        let backend = backend().await;
        backend.fail_next(BackendOp::CreateEntity);
        let mut cmd = DrawLine::new(
            backend.clone(),
            LineSpec::new("d1", Point::new(0.0, 0.0), Point::new(1.0, 1.0)),
        );

        assert!(!cmd.execute(&EffectCx::unbounded()).await);
        assert_eq!(cmd.state(), CommandState::Failed);
        assert!(
            cmd.core()
                .error_message()
                .unwrap()
                .contains("injected failure in create_entity")
        );
        assert!(!cmd.undo_ready());
    }

    #[tokio::test]
    async fn failed_delete_keeps_entity_and_undo_data() {
        let backend = backend().await;
        let mut cmd = DrawArc::new(
            backend.clone(),
            ArcSpec::new(
                "d1",
                Point::new(0.0, 0.0),
                1.0,
                0.0,
                std::f64::consts::FRAC_PI_2,
            ),
        );
        let cx = EffectCx::unbounded();
        assert!(cmd.execute(&cx).await);

        backend.fail_next(BackendOp::DeleteEntity);
        assert!(!cmd.undo(&cx).await);
        assert_eq!(cmd.state(), CommandState::Completed);
        assert!(cmd.can_undo());
        assert_eq!(backend.entity_ids(), vec!["e1"]);
    }

    #[test]
    fn debug_uses_shape_name() {
        let backend: Arc<dyn CadBackend> = Arc::new(InMemoryBackend::new());
        let cmd = DrawLine::new(
            backend,
            LineSpec::new("d1", Point::new(0.0, 0.0), Point::new(1.0, 0.0)),
        );
        assert_eq!(cmd.debug_name(), "DrawLine");
        assert!(format!("{cmd:?}").starts_with("DrawLine"));
    }
}
