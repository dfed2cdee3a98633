#![forbid(unsafe_code)]

//! Editing commands: delete and move.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use redraft_core::{
    CommandCategory, CommandCore, CommandError, CommandResult, EffectCx, UndoableCmd, payload_from,
};

use crate::backend::{CadBackend, EntityRecord, Point, Vector};

const SNAPSHOT: &str = "entity";
const REVERSE_DELTA: &str = "reverse_delta";

/// Deletes an entity, keeping a snapshot so undo can recreate it.
pub struct DeleteEntity {
    core: CommandCore,
    backend: Arc<dyn CadBackend>,
    entity_id: String,
}

impl DeleteEntity {
    #[must_use]
    pub fn new(backend: Arc<dyn CadBackend>, entity_id: impl Into<String>) -> Self {
        let entity_id = entity_id.into();
        Self {
            core: CommandCore::new(format!("Delete Entity {entity_id}"), CommandCategory::Editing),
            backend,
            entity_id,
        }
    }

    /// Id of the target entity. Updated if undo had to recreate it under a new id.
    #[must_use]
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn snapshot(&self) -> Result<EntityRecord, CommandError> {
        let value = self
            .core
            .undo_data()
            .get(SNAPSHOT)
            .cloned()
            .ok_or_else(|| CommandError::NotUndoable(SNAPSHOT.into()))?;
        Ok(serde_json::from_value(value)?)
    }
}

#[async_trait]
impl UndoableCmd for DeleteEntity {
    fn core(&self) -> &CommandCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut CommandCore {
        &mut self.core
    }

    async fn apply(&mut self, _cx: &EffectCx) -> CommandResult {
        let snapshot = self.backend.fetch_entity(&self.entity_id).await?;
        self.backend.delete_entity(&snapshot.id).await?;

        self.core
            .capture_execution("entity_id", self.entity_id.clone());
        self.core
            .capture_undo(SNAPSHOT, serde_json::to_value(&snapshot)?);
        Ok(())
    }

    async fn revert(&mut self, _cx: &EffectCx) -> CommandResult {
        let snapshot = self.snapshot()?;
        let restored = self.backend.create_entity(snapshot.to_draft()).await?;
        if restored.id != snapshot.id {
            tracing::debug!(
                target: "redraft.command",
                from = %snapshot.id,
                to = %restored.id,
                "entity restored under a new id"
            );
        }
        self.entity_id = restored.id;
        self.core.release_undo(SNAPSHOT);
        Ok(())
    }

    fn undo_ready(&self) -> bool {
        self.core.has_undo_key(SNAPSHOT)
    }

    fn debug_name(&self) -> &'static str {
        "DeleteEntity"
    }
}

/// Which entities to move and by how much.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveSpec {
    pub entity_ids: Vec<String>,
    pub delta: Vector,
}

impl MoveSpec {
    #[must_use]
    pub fn new(entity_ids: Vec<String>, delta: Vector) -> Self {
        Self { entity_ids, delta }
    }

    /// Move one entity from `from` to `to`.
    #[must_use]
    pub fn between(entity_id: impl Into<String>, from: Point, to: Point) -> Self {
        Self {
            entity_ids: vec![entity_id.into()],
            delta: from.delta_to(to),
        }
    }

    fn describe(&self) -> String {
        let target = match self.entity_ids.as_slice() {
            [single] => format!("Entity {single}"),
            many => format!("{} Entities", many.len()),
        };
        format!(
            "Move {target} by ({:.1},{:.1})",
            self.delta.x, self.delta.y
        )
    }
}

/// Translates entities; undo applies the reverse displacement.
pub struct MoveEntity {
    core: CommandCore,
    backend: Arc<dyn CadBackend>,
    spec: MoveSpec,
}

impl MoveEntity {
    #[must_use]
    pub fn new(backend: Arc<dyn CadBackend>, spec: MoveSpec) -> Self {
        Self {
            core: CommandCore::new(spec.describe(), CommandCategory::Editing),
            backend,
            spec,
        }
    }

    #[must_use]
    pub fn spec(&self) -> &MoveSpec {
        &self.spec
    }
}

#[async_trait]
impl UndoableCmd for MoveEntity {
    fn core(&self) -> &CommandCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut CommandCore {
        &mut self.core
    }

    async fn apply(&mut self, _cx: &EffectCx) -> CommandResult {
        if self.spec.entity_ids.is_empty() {
            return Err(CommandError::rejected("no entities to move"));
        }
        self.backend
            .move_entities(&self.spec.entity_ids, self.spec.delta)
            .await?;

        self.core.set_execution_data(payload_from(&self.spec)?);
        self.core
            .capture_undo(REVERSE_DELTA, serde_json::to_value(-self.spec.delta)?);
        Ok(())
    }

    async fn revert(&mut self, _cx: &EffectCx) -> CommandResult {
        let reverse: Vector = match self.core.undo_data().get(REVERSE_DELTA) {
            Some(value) => serde_json::from_value(value.clone())?,
            None => return Err(CommandError::NotUndoable(REVERSE_DELTA.into())),
        };
        self.backend
            .move_entities(&self.spec.entity_ids, reverse)
            .await?;
        self.core.release_undo(REVERSE_DELTA);
        Ok(())
    }

    fn undo_ready(&self) -> bool {
        matches!(self.core.undo_data().get(REVERSE_DELTA), Some(Value::Object(_)))
    }

    fn debug_name(&self) -> &'static str {
        "MoveEntity"
    }
}
