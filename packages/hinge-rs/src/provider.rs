//! Definition lookup by stable uid, with change notification.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::definition::{DoorDefinition, SignalDefinition};

const CHANGE_CAPACITY: usize = 256;

/// A definition was added, replaced or removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionChange {
    Door(Uuid),
    Signal(Uuid),
}

#[async_trait]
pub trait DefinitionProvider: Send + Sync + 'static {
    async fn door_definition(&self, uid: Uuid) -> Option<DoorDefinition>;

    async fn signal_definition(&self, uid: Uuid) -> Option<SignalDefinition>;

    /// Stream of definition changes. Receivers that lag miss changes.
    fn changes(&self) -> broadcast::Receiver<DefinitionChange>;
}

/// Definitions held in memory.
#[derive(Clone)]
pub struct InMemoryDefinitionProvider {
    doors: Arc<DashMap<Uuid, DoorDefinition>>,
    signals: Arc<DashMap<Uuid, SignalDefinition>>,
    changes: broadcast::Sender<DefinitionChange>,
}

impl InMemoryDefinitionProvider {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            doors: Arc::new(DashMap::new()),
            signals: Arc::new(DashMap::new()),
            changes,
        }
    }

    pub fn upsert_door(&self, definition: DoorDefinition) {
        let uid = definition.uid();
        self.doors.insert(uid, definition);
        let _ = self.changes.send(DefinitionChange::Door(uid));
    }

    pub fn upsert_signal(&self, definition: SignalDefinition) {
        let uid = definition.uid();
        self.signals.insert(uid, definition);
        let _ = self.changes.send(DefinitionChange::Signal(uid));
    }

    pub fn remove_door(&self, uid: Uuid) -> Option<DoorDefinition> {
        let removed = self.doors.remove(&uid).map(|(_, def)| def);
        if removed.is_some() {
            let _ = self.changes.send(DefinitionChange::Door(uid));
        }
        removed
    }

    pub fn remove_signal(&self, uid: Uuid) -> Option<SignalDefinition> {
        let removed = self.signals.remove(&uid).map(|(_, def)| def);
        if removed.is_some() {
            let _ = self.changes.send(DefinitionChange::Signal(uid));
        }
        removed
    }
}

impl Default for InMemoryDefinitionProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryDefinitionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryDefinitionProvider")
            .field("doors", &self.doors.len())
            .field("signals", &self.signals.len())
            .finish()
    }
}

#[async_trait]
impl DefinitionProvider for InMemoryDefinitionProvider {
    async fn door_definition(&self, uid: Uuid) -> Option<DoorDefinition> {
        self.doors.get(&uid).map(|entry| entry.value().clone())
    }

    async fn signal_definition(&self, uid: Uuid) -> Option<SignalDefinition> {
        self.signals.get(&uid).map(|entry| entry.value().clone())
    }

    fn changes(&self) -> broadcast::Receiver<DefinitionChange> {
        self.changes.subscribe()
    }
}
