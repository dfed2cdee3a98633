#![forbid(unsafe_code)]

//! Building commands from data.
//!
//! [`CommandSpec`] is a closed, serde-tagged description of every command this
//! crate provides, so scripts and remote callers can submit commands without
//! naming Rust types:
//!
//! ```json
//! { "op": "draw_line", "document_id": "d1",
//!   "start": { "x": 0, "y": 0 }, "end": { "x": 10, "y": 5 } }
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use redraft_core::{CommandCategory, CompositeCommand, UndoableCmd};

use crate::backend::{CadBackend, LayerSpec};
use crate::document::{CreateDocument, CreateLayer, DocumentSpec};
use crate::draw::{ArcSpec, CircleSpec, DrawArc, DrawCircle, DrawLine, LineSpec};
use crate::edit::{DeleteEntity, MoveEntity, MoveSpec};

fn default_composite_category() -> CommandCategory {
    CommandCategory::Editing
}

/// Data form of a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CommandSpec {
    DrawLine(LineSpec),
    DrawCircle(CircleSpec),
    DrawArc(ArcSpec),
    DeleteEntity {
        entity_id: String,
    },
    MoveEntities(MoveSpec),
    CreateLayer(LayerSpec),
    CreateDocument(DocumentSpec),
    /// Steps run atomically as one history entry.
    Composite {
        description: String,
        #[serde(default = "default_composite_category")]
        category: CommandCategory,
        steps: Vec<CommandSpec>,
    },
}

impl CommandSpec {
    /// The `op` tag of this spec.
    #[must_use]
    pub const fn op(&self) -> &'static str {
        match self {
            Self::DrawLine(_) => "draw_line",
            Self::DrawCircle(_) => "draw_circle",
            Self::DrawArc(_) => "draw_arc",
            Self::DeleteEntity { .. } => "delete_entity",
            Self::MoveEntities(_) => "move_entities",
            Self::CreateLayer(_) => "create_layer",
            Self::CreateDocument(_) => "create_document",
            Self::Composite { .. } => "composite",
        }
    }
}

/// Builds commands bound to one backend.
#[derive(Clone)]
pub struct CommandFactory {
    backend: Arc<dyn CadBackend>,
}

impl std::fmt::Debug for CommandFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandFactory").finish_non_exhaustive()
    }
}

impl CommandFactory {
    #[must_use]
    pub fn new(backend: Arc<dyn CadBackend>) -> Self {
        Self { backend }
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn CadBackend> {
        &self.backend
    }

    #[must_use]
    pub fn draw_line(&self, spec: LineSpec) -> DrawLine {
        DrawLine::new(Arc::clone(&self.backend), spec)
    }

    #[must_use]
    pub fn draw_circle(&self, spec: CircleSpec) -> DrawCircle {
        DrawCircle::new(Arc::clone(&self.backend), spec)
    }

    #[must_use]
    pub fn draw_arc(&self, spec: ArcSpec) -> DrawArc {
        DrawArc::new(Arc::clone(&self.backend), spec)
    }

    #[must_use]
    pub fn delete_entity(&self, entity_id: impl Into<String>) -> DeleteEntity {
        DeleteEntity::new(Arc::clone(&self.backend), entity_id)
    }

    #[must_use]
    pub fn move_entities(&self, spec: MoveSpec) -> MoveEntity {
        MoveEntity::new(Arc::clone(&self.backend), spec)
    }

    #[must_use]
    pub fn create_layer(&self, spec: LayerSpec) -> CreateLayer {
        CreateLayer::new(Arc::clone(&self.backend), spec)
    }

    #[must_use]
    pub fn create_document(&self, spec: DocumentSpec) -> CreateDocument {
        CreateDocument::new(Arc::clone(&self.backend), spec)
    }

    /// Build any command from its data form, recursing into composites.
    #[must_use]
    pub fn build(&self, spec: CommandSpec) -> Box<dyn UndoableCmd> {
        match spec {
            CommandSpec::DrawLine(spec) => Box::new(self.draw_line(spec)),
            CommandSpec::DrawCircle(spec) => Box::new(self.draw_circle(spec)),
            CommandSpec::DrawArc(spec) => Box::new(self.draw_arc(spec)),
            CommandSpec::DeleteEntity { entity_id } => Box::new(self.delete_entity(entity_id)),
            CommandSpec::MoveEntities(spec) => Box::new(self.move_entities(spec)),
            CommandSpec::CreateLayer(spec) => Box::new(self.create_layer(spec)),
            CommandSpec::CreateDocument(spec) => Box::new(self.create_document(spec)),
            CommandSpec::Composite {
                description,
                category,
                steps,
            } => {
                let mut composite = CompositeCommand::with_category(description, category);
                for step in steps {
                    composite.push(self.build(step));
                }
                Box::new(composite)
            }
        }
    }
}
