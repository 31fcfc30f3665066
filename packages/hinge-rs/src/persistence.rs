//! Persistence for door state that exists across time.
//!
//! # The Contract
//!
//! 1. **Load on activation.** A door worker loads its [`DoorHandlerState`]
//!    once, when it is activated. A missing record means a fresh door.
//!
//! 2. **Save after every mutation.** Arrivals, window closes and
//!    stimulations each end with a save.
//!
//! 3. **Save before forward.** A stimulation is recorded and persisted
//!    *before* the door's output message is handed to the fan-out.
//!
//! # What This Guarantees
//!
//! - **Crash = pause.** A restarted door resumes with the same statuses,
//!   history and pending window (re-armed for its remaining time).
//! - **Redelivery within retention is harmless.** Message uids are kept in
//!   the persisted queues, so a replay of a message that is still queued or
//!   in the retained history is recognised and ignored. A replay arriving
//!   after its message was trimmed away is recorded again.
//!
//! # What This Does NOT Guarantee
//!
//! - Exactly-once output. A crash between save and forward loses that
//!   output message; downstream doors must tolerate gaps as well as
//!   duplicates.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::state::DoorHandlerState;

/// Errors from door state storage.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another writer saved the same door since it was loaded.
    #[error("revision conflict: door state was modified concurrently")]
    Conflict,

    #[error("storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Optimistic concurrency token of a stored door state.
///
/// [`Revision::NONE`] marks a door that was never saved. Each successful
/// save advances the revision by one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Revision(pub u64);

impl Revision {
    pub const NONE: Revision = Revision(0);

    pub fn next(self) -> Self {
        Revision(self.0.saturating_add(1))
    }

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_none() {
            write!(f, "NONE")
        } else {
            write!(f, "r{}", self.0)
        }
    }
}

/// Persists one [`DoorHandlerState`] per door, keyed by door uid.
#[async_trait]
pub trait DoorStateStore: Send + Sync + 'static {
    /// `None` if the door was never saved.
    async fn load(&self, door_uid: Uuid) -> Result<Option<(DoorHandlerState, Revision)>, StoreError>;

    /// Save with optimistic concurrency control.
    ///
    /// `expected` must match the stored revision ([`Revision::NONE`] for a
    /// new door), otherwise [`StoreError::Conflict`].
    async fn save(
        &self,
        door_uid: Uuid,
        state: &DoorHandlerState,
        expected: Revision,
    ) -> Result<Revision, StoreError>;
}

/// Process-local store.
///
/// Records are kept as serialized JSON so that what is loaded is exactly
/// what a durable backend would hand back.
#[derive(Default)]
pub struct InMemoryDoorStateStore {
    data: Mutex<HashMap<Uuid, (Vec<u8>, Revision)>>,
}

impl InMemoryDoorStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of doors with a saved record.
    pub fn len(&self) -> usize {
        self.data.lock().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current revision of a door's record.
    pub fn revision(&self, door_uid: Uuid) -> Revision {
        self.data
            .lock()
            .ok()
            .and_then(|d| d.get(&door_uid).map(|(_, r)| *r))
            .unwrap_or(Revision::NONE)
    }
}

impl std::fmt::Debug for InMemoryDoorStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryDoorStateStore")
            .field("doors", &self.len())
            .finish()
    }
}

#[async_trait]
impl DoorStateStore for InMemoryDoorStateStore {
    async fn load(&self, door_uid: Uuid) -> Result<Option<(DoorHandlerState, Revision)>, StoreError> {
        let data = self
            .data
            .lock()
            .map_err(|e| StoreError::Backend(anyhow::anyhow!("mutex poisoned: {}", e)))?;

        match data.get(&door_uid) {
            None => Ok(None),
            Some((bytes, revision)) => {
                let state = serde_json::from_slice(bytes).map_err(|e| {
                    StoreError::Backend(anyhow::Error::new(e).context("decoding door state"))
                })?;
                Ok(Some((state, *revision)))
            }
        }
    }

    async fn save(
        &self,
        door_uid: Uuid,
        state: &DoorHandlerState,
        expected: Revision,
    ) -> Result<Revision, StoreError> {
        let bytes = serde_json::to_vec(state)
            .map_err(|e| StoreError::Backend(anyhow::Error::new(e).context("encoding door state")))?;

        let mut data = self
            .data
            .lock()
            .map_err(|e| StoreError::Backend(anyhow::anyhow!("mutex poisoned: {}", e)))?;

        let current = data.get(&door_uid).map(|(_, r)| *r).unwrap_or(Revision::NONE);
        if current != expected {
            return Err(StoreError::Conflict);
        }

        let next = expected.next();
        data.insert(door_uid, (bytes, next));
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{SignalId, SourceId};
    use crate::message::SignalMessage;
    use crate::retention::RetentionPolicy;
    use chrono::Utc;

    #[test]
    fn test_revision_advances_from_none() {
        assert!(Revision::NONE.is_none());
        let first = Revision::NONE.next();
        assert_eq!(first, Revision(1));
        assert!(!first.is_none());
        assert_eq!(format!("{} {}", Revision::NONE, first.next()), "NONE r2");
    }

    #[test]
    fn test_backend_error_keeps_its_cause() {
        use std::error::Error as _;

        assert!(StoreError::Conflict.to_string().contains("conflict"));
        let backend = StoreError::from(anyhow::anyhow!("connection failed"));
        assert!(backend.to_string().contains("connection failed"));
        assert!(backend.source().is_some());
    }

    fn populated_state() -> DoorHandlerState {
        let source = SourceId::from(SignalId::new(Uuid::new_v4(), "sig"));
        let now = Utc::now();
        let mut state = DoorHandlerState::new(Uuid::new_v4());
        state.listen([source.uid()]);
        state.record(SignalMessage::new(&source, now, None), &RetentionPolicy::default(), now);
        state
    }

    #[tokio::test]
    async fn test_load_empty() {
        let store = InMemoryDoorStateStore::new();
        assert!(store.load(Uuid::new_v4()).await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let store = InMemoryDoorStateStore::new();
        let state = populated_state();

        let rev = store.save(state.door_uid, &state, Revision::NONE).await.unwrap();
        assert_eq!(rev, Revision(1));

        let (loaded, loaded_rev) = store.load(state.door_uid).await.unwrap().unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded_rev, rev);
    }

    #[tokio::test]
    async fn test_conflict_detection() {
        let store = InMemoryDoorStateStore::new();
        let state = populated_state();

        store.save(state.door_uid, &state, Revision::NONE).await.unwrap();

        let result = store.save(state.door_uid, &state, Revision::NONE).await;
        assert!(matches!(result, Err(StoreError::Conflict)));

        let result = store.save(state.door_uid, &state, Revision(1)).await;
        assert!(result.is_ok());
        assert_eq!(store.revision(state.door_uid), Revision(2));
    }
}
