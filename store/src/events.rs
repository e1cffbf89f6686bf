use crate::errors::Result;
use crate::types::{ProjectId, StoredEvent};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Event persistence plus the duplicate-delivery guard.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Claims an event id for a project before any other write happens.
    /// Returns `false` when the id was already claimed; the caller must then
    /// treat the delivery as a duplicate and skip all further writes.
    async fn reserve(&self, project_id: ProjectId, event_id: Uuid) -> Result<bool>;

    /// Persists a normalized event. `reserve` must have returned `true` for
    /// this id first.
    async fn save(&self, event: StoredEvent) -> Result<()>;

    async fn get(&self, project_id: ProjectId, event_id: Uuid) -> Result<Option<StoredEvent>>;
}

#[derive(Default)]
struct EventsInner {
    reserved: HashSet<(ProjectId, Uuid)>,
    events: HashMap<(ProjectId, Uuid), StoredEvent>,
}

/// In-memory event store.
#[derive(Default)]
pub struct MemoryEventStore {
    inner: RwLock<EventsInner>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().events.is_empty()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn reserve(&self, project_id: ProjectId, event_id: Uuid) -> Result<bool> {
        Ok(self.inner.write().reserved.insert((project_id, event_id)))
    }

    async fn save(&self, event: StoredEvent) -> Result<()> {
        self.inner
            .write()
            .events
            .insert((event.project_id, event.event_id), event);
        Ok(())
    }

    async fn get(&self, project_id: ProjectId, event_id: Uuid) -> Result<Option<StoredEvent>> {
        Ok(self
            .inner
            .read()
            .events
            .get(&(project_id, event_id))
            .cloned())
    }
}
