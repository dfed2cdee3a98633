#![forbid(unsafe_code)]

//! The domain boundary concrete commands talk to.
//!
//! A [`CadBackend`] owns documents, layers and entities. Commands never touch
//! domain state directly; they call the backend and capture what they need to
//! reverse the call.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Neg;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use redraft_core::CommandError;

/// Free-form string properties attached to entities and layers.
pub type Properties = BTreeMap<String, String>;

/// A position in model space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Point {
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y, z: 0.0 }
    }

    #[must_use]
    pub fn offset(self, by: Vector) -> Self {
        Self {
            x: self.x + by.x,
            y: self.y + by.y,
            z: self.z + by.z,
        }
    }

    /// Displacement from `self` to `to`.
    #[must_use]
    pub fn delta_to(self, to: Point) -> Vector {
        Vector {
            x: to.x - self.x,
            y: to.y - self.y,
            z: to.z - self.z,
        }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.1},{:.1})", self.x, self.y)
    }
}

/// A displacement in model space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Vector {
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y, z: 0.0 }
    }
}

impl Neg for Vector {
    type Output = Self;

    fn neg(self) -> Self {
        Self {
            x: -self.x,
            y: -self.y,
            z: -self.z,
        }
    }
}

/// Shape of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Geometry {
    Line {
        start: Point,
        end: Point,
    },
    Circle {
        center: Point,
        radius: f64,
    },
    /// Angles in radians.
    Arc {
        center: Point,
        radius: f64,
        start_angle: f64,
        end_angle: f64,
    },
}

impl Geometry {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Line { .. } => "line",
            Self::Circle { .. } => "circle",
            Self::Arc { .. } => "arc",
        }
    }

    #[must_use]
    pub fn translated(self, by: Vector) -> Self {
        match self {
            Self::Line { start, end } => Self::Line {
                start: start.offset(by),
                end: end.offset(by),
            },
            Self::Circle { center, radius } => Self::Circle {
                center: center.offset(by),
                radius,
            },
            Self::Arc {
                center,
                radius,
                start_angle,
                end_angle,
            } => Self::Arc {
                center: center.offset(by),
                radius,
                start_angle,
                end_angle,
            },
        }
    }
}

/// Request to create an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDraft {
    /// Identity to restore; the backend may assign another if it is taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub document_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_id: Option<String>,
    pub geometry: Geometry,
    #[serde(default)]
    pub properties: Properties,
}

/// An entity as stored by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: String,
    pub document_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_id: Option<String>,
    pub geometry: Geometry,
    #[serde(default)]
    pub properties: Properties,
}

impl EntityRecord {
    /// A draft that recreates this entity under the same id.
    #[must_use]
    pub fn to_draft(&self) -> EntityDraft {
        EntityDraft {
            id: Some(self.id.clone()),
            document_id: self.document_id.clone(),
            layer_id: self.layer_id.clone(),
            geometry: self.geometry,
            properties: self.properties.clone(),
        }
    }
}

/// Request to create a layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub document_id: String,
    pub name: String,
    #[serde(default)]
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerRecord {
    pub id: String,
    pub document_id: String,
    pub name: String,
    #[serde(default)]
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
}

/// Failure reported by a [`CadBackend`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },
    #[error("operation '{0}' is not supported by this backend")]
    Unsupported(&'static str),
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("transport failure: {0}")]
    Transport(String),
}

impl BackendError {
    #[must_use]
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

impl From<BackendError> for CommandError {
    fn from(err: BackendError) -> Self {
        CommandError::Backend(err.to_string())
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Async CAD domain service.
///
/// Only the primitive operations are required; the `draw_*` helpers build an
/// [`EntityDraft`] and delegate to [`create_entity`](Self::create_entity).
#[async_trait]
pub trait CadBackend: Send + Sync {
    async fn create_entity(&self, draft: EntityDraft) -> BackendResult<EntityRecord>;

    async fn fetch_entity(&self, id: &str) -> BackendResult<EntityRecord>;

    async fn delete_entity(&self, id: &str) -> BackendResult<()>;

    /// Translate every listed entity by `delta`. All or nothing.
    async fn move_entities(&self, ids: &[String], delta: Vector) -> BackendResult<()>;

    async fn create_layer(
        &self,
        spec: &LayerSpec,
        restore_id: Option<&str>,
    ) -> BackendResult<LayerRecord>;

    async fn delete_layer(&self, id: &str) -> BackendResult<()>;

    async fn create_document(
        &self,
        name: &str,
        template_id: Option<&str>,
        restore_id: Option<&str>,
    ) -> BackendResult<DocumentRecord>;

    async fn delete_document(&self, _id: &str) -> BackendResult<()> {
        Err(BackendError::Unsupported("delete_document"))
    }

    /// Whether [`delete_document`](Self::delete_document) is implemented.
    fn supports_document_deletion(&self) -> bool {
        false
    }

    async fn draw_line(
        &self,
        document_id: &str,
        start: Point,
        end: Point,
        layer_id: Option<&str>,
        properties: &Properties,
    ) -> BackendResult<EntityRecord> {
        self.create_entity(EntityDraft {
            id: None,
            document_id: document_id.to_string(),
            layer_id: layer_id.map(str::to_string),
            geometry: Geometry::Line { start, end },
            properties: properties.clone(),
        })
        .await
    }

    async fn draw_circle(
        &self,
        document_id: &str,
        center: Point,
        radius: f64,
        layer_id: Option<&str>,
        properties: &Properties,
    ) -> BackendResult<EntityRecord> {
        self.create_entity(EntityDraft {
            id: None,
            document_id: document_id.to_string(),
            layer_id: layer_id.map(str::to_string),
            geometry: Geometry::Circle { center, radius },
            properties: properties.clone(),
        })
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn draw_arc(
        &self,
        document_id: &str,
        center: Point,
        radius: f64,
        start_angle: f64,
        end_angle: f64,
        layer_id: Option<&str>,
        properties: &Properties,
    ) -> BackendResult<EntityRecord> {
        self.create_entity(EntityDraft {
            id: None,
            document_id: document_id.to_string(),
            layer_id: layer_id.map(str::to_string),
            geometry: Geometry::Arc {
                center,
                radius,
                start_angle,
                end_angle,
            },
            properties: properties.clone(),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_display_uses_one_decimal() {
        assert_eq!(Point::new(0.0, 10.24).to_string(), "(0.0,10.2)");
    }

    #[test]
    fn delta_and_negation() {
        let delta = Point::new(1.0, 2.0).delta_to(Point::new(4.0, 0.0));
        assert_eq!(delta, Vector::new(3.0, -2.0));
        assert_eq!(-delta, Vector::new(-3.0, 2.0));
    }

    #[test]
    fn translation_keeps_radius_and_angles() {
        let arc = Geometry::Arc {
            center: Point::new(0.0, 0.0),
            radius: 2.0,
            start_angle: 0.0,
            end_angle: 1.5,
        };
        let moved = arc.translated(Vector::new(1.0, 1.0));
        assert_eq!(
            moved,
            Geometry::Arc {
                center: Point::new(1.0, 1.0),
                radius: 2.0,
                start_angle: 0.0,
                end_angle: 1.5,
            }
        );
        assert_eq!(moved.kind(), "arc");
    }

    #[test]
    fn geometry_serializes_with_kind_tag() {
        let json = serde_json::to_value(Geometry::Circle {
            center: Point::new(1.0, 2.0),
            radius: 3.0,
        })
        .unwrap();
        assert_eq!(json["kind"], "circle");
        assert_eq!(json["radius"], 3.0);
    }

    #[test]
    fn point_z_defaults_to_zero() {
        let point: Point = serde_json::from_str(r#"{"x": 1.0, "y": 2.0}"#).unwrap();
        assert_eq!(point, Point::new(1.0, 2.0));
    }

    #[test]
    fn backend_error_converts_to_command_error() {
        let err: CommandError = BackendError::not_found("entity", "e9").into();
        assert_eq!(err.to_string(), "backend error: entity 'e9' not found");
    }
}
