#![forbid(unsafe_code)]

//! Concrete CAD commands for the redraft undo/redo engine.
//!
//! Commands here implement [`redraft_core::UndoableCmd`] against an async
//! [`CadBackend`]. [`InMemoryBackend`] is a deterministic implementation for
//! tests, demos and scripting.
//!
//! ```ignore
//! let backend = Arc::new(InMemoryBackend::new());
//! let factory = CommandFactory::new(backend.clone());
//! let executor = Executor::new(EngineConfig::default());
//!
//! executor.execute(factory.create_document(DocumentSpec::new("Plan"))).await;
//! executor
//!     .execute(factory.draw_line(LineSpec::new("d1", Point::new(0.0, 0.0), Point::new(10.0, 5.0))))
//!     .await;
//! ```

pub mod backend;
pub mod document;
pub mod draw;
pub mod edit;
pub mod factory;
pub mod memory;

pub use backend::{
    BackendError, BackendResult, CadBackend, DocumentRecord, EntityDraft, EntityRecord, Geometry,
    LayerRecord, LayerSpec, Point, Properties, Vector,
};
pub use document::{CreateDocument, CreateLayer, DocumentSpec};
pub use draw::{ArcSpec, CircleSpec, DrawArc, DrawCircle, DrawCmd, DrawLine, DrawSpec, LineSpec};
pub use edit::{DeleteEntity, MoveEntity, MoveSpec};
pub use factory::{CommandFactory, CommandSpec};
pub use memory::{BackendOp, InMemoryBackend};
