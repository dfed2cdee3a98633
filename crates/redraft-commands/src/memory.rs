#![forbid(unsafe_code)]

//! Deterministic in-process [`CadBackend`].
//!
//! Ids are sequential per kind (`d1`, `l1`, `e1`, ...). Optional latency and
//! one-shot fault injection make it suitable for exercising the executor's
//! suspension and failure paths.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{
    BackendError, BackendResult, CadBackend, DocumentRecord, EntityDraft, EntityRecord, Geometry,
    LayerRecord, LayerSpec, Vector,
};

/// Backend operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    CreateEntity,
    FetchEntity,
    DeleteEntity,
    MoveEntities,
    CreateLayer,
    DeleteLayer,
    CreateDocument,
    DeleteDocument,
}

impl BackendOp {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateEntity => "create_entity",
            Self::FetchEntity => "fetch_entity",
            Self::DeleteEntity => "delete_entity",
            Self::MoveEntities => "move_entities",
            Self::CreateLayer => "create_layer",
            Self::DeleteLayer => "delete_layer",
            Self::CreateDocument => "create_document",
            Self::DeleteDocument => "delete_document",
        }
    }
}

impl fmt::Display for BackendOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
struct Counters {
    entity: u64,
    layer: u64,
    document: u64,
}

#[derive(Debug, Default)]
struct State {
    documents: BTreeMap<String, DocumentRecord>,
    layers: BTreeMap<String, LayerRecord>,
    entities: BTreeMap<String, EntityRecord>,
    counters: Counters,
    faults: Vec<BackendOp>,
    calls: Vec<BackendOp>,
}

impl State {
    /// Record the call and consume a pending fault for `op`, if any.
    fn enter(&mut self, op: BackendOp) -> BackendResult<()> {
        self.calls.push(op);
        if let Some(pos) = self.faults.iter().position(|pending| *pending == op) {
            self.faults.remove(pos);
            return Err(BackendError::Transport(format!("injected failure in {op}")));
        }
        Ok(())
    }

    fn require_document(&self, id: &str) -> BackendResult<()> {
        if self.documents.contains_key(id) {
            Ok(())
        } else {
            Err(BackendError::not_found("document", id))
        }
    }
}

/// Pick `requested` if it is free, else the next sequential id.
fn assign_id<V>(
    requested: Option<&str>,
    prefix: char,
    counter: &mut u64,
    taken: &BTreeMap<String, V>,
) -> String {
    if let Some(id) = requested {
        if !taken.contains_key(id) {
            return id.to_string();
        }
    }
    loop {
        *counter += 1;
        let candidate = format!("{prefix}{counter}");
        if !taken.contains_key(&candidate) {
            return candidate;
        }
    }
}

fn validate_geometry(geometry: &Geometry) -> BackendResult<()> {
    let radius = match geometry {
        Geometry::Line { start, end } => {
            if start == end {
                return Err(BackendError::Rejected("line has zero length".into()));
            }
            return Ok(());
        }
        Geometry::Circle { radius, .. } | Geometry::Arc { radius, .. } => *radius,
    };
    if radius.is_finite() && radius > 0.0 {
        Ok(())
    } else {
        Err(BackendError::Rejected(format!(
            "radius must be positive, got {radius}"
        )))
    }
}

/// In-memory CAD model.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    state: Mutex<State>,
    latency: Option<Duration>,
    without_document_deletion: bool,
}

impl InMemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `latency` before every operation.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Behave like a backend that cannot delete documents.
    #[must_use]
    pub fn without_document_deletion(mut self) -> Self {
        self.without_document_deletion = true;
        self
    }

    /// Make the next call of `op` fail with a transport error.
    pub fn fail_next(&self, op: BackendOp) {
        self.lock().faults.push(op);
    }

    /// Entities sorted by id number.
    #[must_use]
    pub fn entities(&self) -> Vec<EntityRecord> {
        let mut entities: Vec<_> = self.lock().entities.values().cloned().collect();
        entities.sort_by(|a, b| (a.id.len(), &a.id).cmp(&(b.id.len(), &b.id)));
        entities
    }

    #[must_use]
    pub fn entity_ids(&self) -> Vec<String> {
        self.entities().into_iter().map(|e| e.id).collect()
    }

    #[must_use]
    pub fn entity(&self, id: &str) -> Option<EntityRecord> {
        self.lock().entities.get(id).cloned()
    }

    #[must_use]
    pub fn layers(&self) -> Vec<LayerRecord> {
        self.lock().layers.values().cloned().collect()
    }

    #[must_use]
    pub fn documents(&self) -> Vec<DocumentRecord> {
        self.lock().documents.values().cloned().collect()
    }

    /// Every operation attempted so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<BackendOp> {
        self.lock().calls.clone()
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CadBackend for InMemoryBackend {
    async fn create_entity(&self, draft: EntityDraft) -> BackendResult<EntityRecord> {
        self.pause().await;
        let mut state = self.lock();
        state.enter(BackendOp::CreateEntity)?;
        state.require_document(&draft.document_id)?;
        if let Some(layer_id) = &draft.layer_id {
            match state.layers.get(layer_id) {
                Some(layer) if layer.document_id == draft.document_id => {}
                _ => return Err(BackendError::not_found("layer", layer_id.clone())),
            }
        }
        validate_geometry(&draft.geometry)?;

        let State {
            entities, counters, ..
        } = &mut *state;
        let id = assign_id(draft.id.as_deref(), 'e', &mut counters.entity, entities);
        let record = EntityRecord {
            id: id.clone(),
            document_id: draft.document_id,
            layer_id: draft.layer_id,
            geometry: draft.geometry,
            properties: draft.properties,
        };
        entities.insert(id, record.clone());
        tracing::trace!(target: "redraft.backend", id = %record.id, kind = record.geometry.kind(), "entity created");
        Ok(record)
    }

    async fn fetch_entity(&self, id: &str) -> BackendResult<EntityRecord> {
        self.pause().await;
        let mut state = self.lock();
        state.enter(BackendOp::FetchEntity)?;
        state
            .entities
            .get(id)
            .cloned()
            .ok_or_else(|| BackendError::not_found("entity", id))
    }

    async fn delete_entity(&self, id: &str) -> BackendResult<()> {
        self.pause().await;
        let mut state = self.lock();
        state.enter(BackendOp::DeleteEntity)?;
        state
            .entities
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| BackendError::not_found("entity", id))
    }

    async fn move_entities(&self, ids: &[String], delta: Vector) -> BackendResult<()> {
        self.pause().await;
        let mut state = self.lock();
        state.enter(BackendOp::MoveEntities)?;
        if let Some(missing) = ids.iter().find(|id| !state.entities.contains_key(*id)) {
            return Err(BackendError::not_found("entity", missing.clone()));
        }
        for id in ids {
            if let Some(entity) = state.entities.get_mut(id) {
                entity.geometry = entity.geometry.translated(delta);
            }
        }
        Ok(())
    }

    async fn create_layer(
        &self,
        spec: &LayerSpec,
        restore_id: Option<&str>,
    ) -> BackendResult<LayerRecord> {
        self.pause().await;
        let mut state = self.lock();
        state.enter(BackendOp::CreateLayer)?;
        state.require_document(&spec.document_id)?;
        if spec.name.trim().is_empty() {
            return Err(BackendError::Rejected("layer name is empty".into()));
        }
        let duplicate = state
            .layers
            .values()
            .any(|layer| layer.document_id == spec.document_id && layer.name == spec.name);
        if duplicate {
            return Err(BackendError::Rejected(format!(
                "layer '{}' already exists",
                spec.name
            )));
        }

        let State {
            layers, counters, ..
        } = &mut *state;
        let id = assign_id(restore_id, 'l', &mut counters.layer, layers);
        let record = LayerRecord {
            id: id.clone(),
            document_id: spec.document_id.clone(),
            name: spec.name.clone(),
            properties: spec.properties.clone(),
        };
        layers.insert(id, record.clone());
        Ok(record)
    }

    async fn delete_layer(&self, id: &str) -> BackendResult<()> {
        self.pause().await;
        let mut state = self.lock();
        state.enter(BackendOp::DeleteLayer)?;
        if !state.layers.contains_key(id) {
            return Err(BackendError::not_found("layer", id));
        }
        let in_use = state
            .entities
            .values()
            .filter(|entity| entity.layer_id.as_deref() == Some(id))
            .count();
        if in_use > 0 {
            return Err(BackendError::Rejected(format!(
                "layer '{id}' still holds {in_use} entities"
            )));
        }
        state.layers.remove(id);
        Ok(())
    }

    async fn create_document(
        &self,
        name: &str,
        template_id: Option<&str>,
        restore_id: Option<&str>,
    ) -> BackendResult<DocumentRecord> {
        self.pause().await;
        let mut state = self.lock();
        state.enter(BackendOp::CreateDocument)?;
        if name.trim().is_empty() {
            return Err(BackendError::Rejected("document name is empty".into()));
        }

        let State {
            documents,
            counters,
            ..
        } = &mut *state;
        let id = assign_id(restore_id, 'd', &mut counters.document, documents);
        let record = DocumentRecord {
            id: id.clone(),
            name: name.to_string(),
            template_id: template_id.map(str::to_string),
        };
        documents.insert(id, record.clone());
        Ok(record)
    }

    /// Removes the document together with its layers and entities.
    async fn delete_document(&self, id: &str) -> BackendResult<()> {
        if self.without_document_deletion {
            return Err(BackendError::Unsupported("delete_document"));
        }
        self.pause().await;
        let mut state = self.lock();
        state.enter(BackendOp::DeleteDocument)?;
        if state.documents.remove(id).is_none() {
            return Err(BackendError::not_found("document", id));
        }
        state.layers.retain(|_, layer| layer.document_id != id);
        state.entities.retain(|_, entity| entity.document_id != id);
        Ok(())
    }

    fn supports_document_deletion(&self) -> bool {
        !self.without_document_deletion
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Point, Properties};

    async fn with_document() -> InMemoryBackend {
        let backend = InMemoryBackend::new();
        let doc = backend.create_document("Plan", None, None).await.unwrap();
        assert_eq!(doc.id, "d1");
        backend
    }

    #[tokio::test]
    async fn ids_are_sequential() {
        let backend = with_document().await;
        let props = Properties::new();
        let a = backend
            .draw_line("d1", Point::new(0.0, 0.0), Point::new(1.0, 0.0), None, &props)
            .await
            .unwrap();
        let b = backend
            .draw_circle("d1", Point::new(0.0, 0.0), 2.0, None, &props)
            .await
            .unwrap();
        assert_eq!((a.id.as_str(), b.id.as_str()), ("e1", "e2"));
    }

    #[tokio::test]
    async fn restore_id_is_honoured_when_free() {
        let backend = with_document().await;
        let props = Properties::new();
        let line = backend
            .draw_line("d1", Point::new(0.0, 0.0), Point::new(1.0, 1.0), None, &props)
            .await
            .unwrap();
        backend.delete_entity(&line.id).await.unwrap();

        let restored = backend.create_entity(line.to_draft()).await.unwrap();
        assert_eq!(restored.id, "e1");

        // Taken ids fall back to the next sequential one.
        let again = backend.create_entity(line.to_draft()).await.unwrap();
        assert_eq!(again.id, "e2");
    }

    #[tokio::test]
    async fn fault_injection_is_one_shot() {
        let backend = with_document().await;
        backend.fail_next(BackendOp::CreateLayer);
        let spec = LayerSpec {
            document_id: "d1".into(),
            name: "walls".into(),
            properties: Properties::new(),
        };

        let err = backend.create_layer(&spec, None).await.unwrap_err();
        assert!(matches!(err, BackendError::Transport(_)));
        let layer = backend.create_layer(&spec, None).await.unwrap();
        assert_eq!(layer.id, "l1");
        assert_eq!(
            backend.calls(),
            vec![
                BackendOp::CreateDocument,
                BackendOp::CreateLayer,
                BackendOp::CreateLayer
            ]
        );
    }

    #[tokio::test]
    async fn rejects_unknown_document_and_bad_radius() {
        let backend = InMemoryBackend::new();
        let props = Properties::new();
        let err = backend
            .draw_circle("d9", Point::new(0.0, 0.0), 1.0, None, &props)
            .await
            .unwrap_err();
        assert_eq!(err, BackendError::not_found("document", "d9"));

        let backend = with_document().await;
        let err = backend
            .draw_arc("d1", Point::new(0.0, 0.0), -1.0, 0.0, 1.0, None, &props)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Rejected(_)));
        assert!(backend.entities().is_empty());
    }

    #[tokio::test]
    async fn move_is_all_or_nothing() {
        let backend = with_document().await;
        let props = Properties::new();
        backend
            .draw_circle("d1", Point::new(0.0, 0.0), 1.0, None, &props)
            .await
            .unwrap();

        let ids = vec!["e1".to_string(), "e7".to_string()];
        assert!(backend.move_entities(&ids, Vector::new(1.0, 0.0)).await.is_err());
        assert_eq!(
            backend.entity("e1").unwrap().geometry,
            Geometry::Circle {
                center: Point::new(0.0, 0.0),
                radius: 1.0
            }
        );
    }

    #[tokio::test]
    async fn layer_in_use_cannot_be_deleted() {
        let backend = with_document().await;
        let spec = LayerSpec {
            document_id: "d1".into(),
            name: "walls".into(),
            properties: Properties::new(),
        };
        backend.create_layer(&spec, None).await.unwrap();
        backend
            .draw_line(
                "d1",
                Point::new(0.0, 0.0),
                Point::new(1.0, 0.0),
                Some("l1"),
                &Properties::new(),
            )
            .await
            .unwrap();

        assert!(matches!(
            backend.delete_layer("l1").await,
            Err(BackendError::Rejected(_))
        ));
        backend.delete_entity("e1").await.unwrap();
        backend.delete_layer("l1").await.unwrap();
        assert!(backend.layers().is_empty());
    }

    #[tokio::test]
    async fn document_deletion_cascades() {
        let backend = with_document().await;
        backend
            .draw_circle("d1", Point::new(0.0, 0.0), 1.0, None, &Properties::new())
            .await
            .unwrap();
        assert!(backend.supports_document_deletion());
        backend.delete_document("d1").await.unwrap();
        assert!(backend.documents().is_empty());
        assert!(backend.entities().is_empty());
    }

    #[tokio::test]
    async fn deletion_can_be_disabled() {
        let backend = InMemoryBackend::new().without_document_deletion();
        backend.create_document("Plan", None, None).await.unwrap();
        assert!(!backend.supports_document_deletion());
        assert_eq!(
            backend.delete_document("d1").await,
            Err(BackendError::Unsupported("delete_document"))
        );
    }

    #[test]
    fn entity_ids_sort_numerically() {
        let backend = InMemoryBackend::new();
        {
            let mut state = backend.lock();
            for id in ["e10", "e2", "e1"] {
                state.entities.insert(
                    id.to_string(),
                    EntityRecord {
                        id: id.to_string(),
                        document_id: "d1".into(),
                        layer_id: None,
                        geometry: Geometry::Circle {
                            center: Point::default(),
                            radius: 1.0,
                        },
                        properties: Properties::new(),
                    },
                );
            }
        }
        assert_eq!(backend.entity_ids(), vec!["e1", "e2", "e10"]);
    }
}
