//! Signal hub: the entry point of a running topology.
//!
//! The hub ties the collaborators together (definitions, door state store,
//! clock, delivery service), activates doors on demand and fires signals.
//!
//! ```text
//! fire(signal) ──► SignalService ──► DoorHandle mailbox ──► worker ──► fire(door)
//!                        │                                                │
//!                        └──────────────► watch() ◄───────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let definitions = InMemoryDefinitionProvider::new();
//! let hub = SignalHub::builder()
//!     .with_provider(Arc::new(definitions.clone()))
//!     .build();
//!
//! definitions.upsert_signal(ready.clone());
//! definitions.upsert_door(door.clone());
//! hub.activate_door(door.uid()).await?;
//!
//! hub.fire(ready.uid(), None, None).await?;
//! ```
//!
//! `build()` spawns the definition watcher and must run inside a tokio
//! runtime.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::builder::{Door, DoorBuilder};
use crate::clock::{Clock, SystemClock};
use crate::config::HingeConfig;
use crate::door::{self, DoorContext, DoorHandle};
use crate::error::{DefinitionKind, HingeError};
use crate::fanout::{FanOut, SignalService};
use crate::ids::{SignalId, SourceId};
use crate::message::{SignalMessage, SignalPayload, SignalSource};
use crate::persistence::{DoorStateStore, InMemoryDoorStateStore};
use crate::provider::{DefinitionChange, DefinitionProvider, InMemoryDefinitionProvider};

/// Metadata key carrying the correlation id given to [`SignalHub::fire`].
pub const CORRELATION_METADATA_KEY: &str = "correlation_id";

const HUB_SENDER: &str = "hub";

// =============================================================================
// Builder
// =============================================================================

pub struct SignalHubBuilder {
    provider: Option<Arc<dyn DefinitionProvider>>,
    store: Option<Arc<dyn DoorStateStore>>,
    clock: Option<Arc<dyn Clock>>,
    service: Option<Arc<dyn SignalService>>,
    config: HingeConfig,
}

impl SignalHubBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            store: None,
            clock: None,
            service: None,
            config: HingeConfig::default(),
        }
    }

    /// Where door and signal definitions are looked up.
    ///
    /// Defaults to an empty [`InMemoryDefinitionProvider`].
    pub fn with_provider(mut self, provider: Arc<dyn DefinitionProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Defaults to an [`InMemoryDoorStateStore`].
    pub fn with_store(mut self, store: Arc<dyn DoorStateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Delivery service shared by every door.
    ///
    /// Defaults to an in-process [`FanOut`] sized by
    /// [`HingeConfig::watch_capacity`].
    pub fn with_service(mut self, service: Arc<dyn SignalService>) -> Self {
        self.service = Some(service);
        self
    }

    pub fn with_config(mut self, config: HingeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> SignalHub {
        let provider = self
            .provider
            .unwrap_or_else(|| Arc::new(InMemoryDefinitionProvider::new()));
        let service = self
            .service
            .unwrap_or_else(|| Arc::new(FanOut::with_watch_capacity(self.config.watch_capacity)));

        let inner = Arc::new(HubInner {
            ctx: DoorContext {
                service,
                store: self
                    .store
                    .unwrap_or_else(|| Arc::new(InMemoryDoorStateStore::new())),
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                config: self.config,
            },
            doors: DashMap::new(),
            activations: DashMap::new(),
            watcher: std::sync::Mutex::new(None),
            provider,
        });

        let watcher = tokio::spawn(watch_definitions(
            Arc::downgrade(&inner),
            inner.provider.changes(),
        ));
        if let Ok(mut slot) = inner.watcher.lock() {
            *slot = Some(watcher);
        }

        SignalHub { inner }
    }
}

impl Default for SignalHubBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Hub
// =============================================================================

struct HubInner {
    ctx: DoorContext,
    provider: Arc<dyn DefinitionProvider>,
    doors: DashMap<Uuid, DoorHandle>,
    /// Serializes activation per door uid.
    activations: DashMap<Uuid, Arc<Mutex<()>>>,
    watcher: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Drop for HubInner {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.watcher.lock() {
            if let Some(watcher) = slot.take() {
                watcher.abort();
            }
        }
    }
}

#[derive(Clone)]
pub struct SignalHub {
    inner: Arc<HubInner>,
}

impl SignalHub {
    pub fn builder() -> SignalHubBuilder {
        SignalHubBuilder::new()
    }

    pub fn config(&self) -> &HingeConfig {
        &self.inner.ctx.config
    }

    pub fn service(&self) -> &Arc<dyn SignalService> {
        &self.inner.ctx.service
    }

    pub fn provider(&self) -> &Arc<dyn DefinitionProvider> {
        &self.inner.provider
    }

    /// Observe every message delivered through the hub's service.
    pub fn watch(&self) -> broadcast::Receiver<SignalMessage> {
        self.inner.ctx.service.watch()
    }

    /// Start a door definition with this hub's default retention.
    pub fn create_door(&self, name: impl Into<String>) -> DoorBuilder {
        Door::create(name).retention(self.inner.ctx.config.retention.clone())
    }

    /// Handle of an active door.
    pub fn door(&self, uid: Uuid) -> Option<DoorHandle> {
        self.inner.doors.get(&uid).map(|entry| entry.value().clone())
    }

    /// Activate the door defined under `uid`.
    ///
    /// Returns the existing handle if the door is already running.
    pub async fn activate_door(&self, uid: Uuid) -> Result<DoorHandle, HingeError> {
        if let Some(handle) = self.running_door(uid) {
            return Ok(handle);
        }

        let lock = self
            .inner
            .activations
            .entry(uid)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;
        if let Some(handle) = self.running_door(uid) {
            return Ok(handle);
        }

        let definition = self
            .inner
            .provider
            .door_definition(uid)
            .await
            .ok_or(HingeError::MissingDefinition {
                kind: DefinitionKind::Door,
                uid,
            })?;

        let handle = door::activate(definition, self.inner.ctx.clone()).await?;
        self.inner.doors.insert(uid, handle.clone());
        Ok(handle)
    }

    fn running_door(&self, uid: Uuid) -> Option<DoorHandle> {
        self.door(uid).filter(|handle| !handle.is_disabled())
    }

    /// Disable an active door. Returns `false` if it was not active.
    pub async fn disable_door(&self, uid: Uuid) -> bool {
        match self.inner.doors.remove(&uid) {
            Some((_, handle)) => {
                handle.disable().await;
                true
            }
            None => false,
        }
    }

    /// Fire a message on the signal or door `uid`.
    ///
    /// A signal with a parent also relays the message up its parent chain.
    /// Returns the uid of the fired message.
    pub async fn fire(
        &self,
        uid: Uuid,
        payload: Option<SignalPayload>,
        correlation: Option<Uuid>,
    ) -> Result<Uuid, HingeError> {
        let signal = self.inner.provider.signal_definition(uid).await;
        let source = match &signal {
            Some(signal) => SourceId::from(signal.signal_id.clone()),
            None => match self.inner.provider.door_definition(uid).await {
                Some(door) => SourceId::from(door.door_id),
                None => {
                    return Err(HingeError::MissingDefinition {
                        kind: DefinitionKind::Signal,
                        uid,
                    })
                }
            },
        };

        let now = self.inner.ctx.clock.now();
        let mut from = SignalSource::new(Uuid::new_v4(), &source, now, payload).with_sender(HUB_SENDER);
        if let Some(correlation) = correlation {
            from = from.with_metadata(CORRELATION_METADATA_KEY, correlation.to_string());
        }
        let message = SignalMessage::from_source(from);
        let message_uid = message.uid;

        let receivers = self.inner.ctx.service.deliver(uid, message.clone()).await;
        debug!(source = %source, message = %message_uid, receivers, "fired");

        if let Some(parent) = signal.and_then(|s| s.parent_signal_id) {
            self.relay_to_parents(uid, parent, message).await;
        }
        Ok(message_uid)
    }

    /// Serialize `value` as the payload and fire it.
    pub async fn fire_with<T: Serialize>(
        &self,
        uid: Uuid,
        value: &T,
        correlation: Option<Uuid>,
    ) -> Result<Uuid, HingeError> {
        let payload = SignalPayload::of(value)?;
        self.fire(uid, Some(payload), correlation).await
    }

    async fn relay_to_parents(&self, origin: Uuid, first_parent: SignalId, message: SignalMessage) {
        let mut visited = HashSet::from([origin]);
        let mut current = message;
        let mut next = Some(first_parent);

        while let Some(parent) = next.take() {
            if !visited.insert(parent.uid) {
                warn!(signal = %parent, "signal parent chain loops, relay stopped");
                break;
            }

            let source = SourceId::from(parent.clone());
            let mut from = SignalSource::new(
                Uuid::new_v4(),
                &source,
                current.emitted_at,
                current.from.payload.clone(),
            )
            .with_origins(vec![current.from.clone()]);
            from.sender = current.from.sender.clone();
            from.metadata = current.from.metadata.clone();
            let relayed = SignalMessage::from_source(from);

            let receivers = self.inner.ctx.service.deliver(parent.uid, relayed.clone()).await;
            debug!(signal = %parent, message = %relayed.uid, receivers, "relayed to parent signal");

            next = self
                .inner
                .provider
                .signal_definition(parent.uid)
                .await
                .and_then(|definition| definition.parent_signal_id);
            current = relayed;
        }
    }
}

impl std::fmt::Debug for SignalHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalHub")
            .field("active_doors", &self.inner.doors.len())
            .field("config", &self.inner.ctx.config)
            .finish()
    }
}

/// Push definition changes to running doors.
async fn watch_definitions(hub: Weak<HubInner>, mut changes: broadcast::Receiver<DefinitionChange>) {
    loop {
        let change = match changes.recv().await {
            Ok(change) => change,
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "definition watcher lagged, some changes were missed");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let DefinitionChange::Door(uid) = change else {
            continue;
        };
        let Some(hub) = hub.upgrade() else {
            break;
        };
        let Some(handle) = hub.doors.get(&uid).map(|entry| entry.value().clone()) else {
            continue;
        };

        match hub.provider.door_definition(uid).await {
            Some(definition) => {
                if !handle.reload(definition) {
                    hub.doors.remove(&uid);
                }
            }
            None => {
                info!(door = %handle.id(), "door definition removed, disabling");
                hub.doors.remove(&uid);
                handle.disable().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Signal;
    use crate::formula::LogicOperator;
    use crate::testing::RecordingReceiver;

    #[tokio::test]
    async fn test_fire_unknown_source_is_missing_definition() {
        let hub = SignalHub::builder().build();
        let err = hub.fire(Uuid::new_v4(), None, None).await.unwrap_err();
        assert!(matches!(err, HingeError::MissingDefinition { kind: DefinitionKind::Signal, .. }));
    }

    #[tokio::test]
    async fn test_activate_unknown_door_is_missing_definition() {
        let hub = SignalHub::builder().build();
        let err = hub.activate_door(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, HingeError::MissingDefinition { kind: DefinitionKind::Door, .. }));
    }

    #[tokio::test]
    async fn test_fire_sets_correlation_metadata() {
        let definitions = InMemoryDefinitionProvider::new();
        let hub = SignalHub::builder()
            .with_provider(Arc::new(definitions.clone()))
            .build();
        let signal = Signal::create("ping").build().unwrap();
        definitions.upsert_signal(signal.clone());

        let receiver = Arc::new(RecordingReceiver::new());
        hub.service().subscribe(signal.uid(), receiver.clone()).await.unwrap();

        let correlation = Uuid::new_v4();
        let uid = hub
            .fire_with(signal.uid(), &serde_json::json!({ "n": 1 }), Some(correlation))
            .await
            .unwrap();

        let received = receiver.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].uid, uid);
        assert_eq!(received[0].from.sender.as_deref(), Some(HUB_SENDER));
        assert_eq!(
            received[0].from.metadata[CORRELATION_METADATA_KEY],
            correlation.to_string()
        );
    }

    #[tokio::test]
    async fn test_create_door_uses_configured_retention() {
        let mut config = HingeConfig::default();
        config.retention.history_max_retention = 3;
        let hub = SignalHub::builder().with_config(config).build();
        let signal = Signal::create("s").build().unwrap();

        let door = hub
            .create_door("d")
            .listen_signal(signal.signal_id.clone())
            .use_logical_aggregator(LogicOperator::Or, None)
            .build()
            .unwrap();

        assert_eq!(door.retention.history_max_retention, 3);
    }

    #[tokio::test]
    async fn test_activate_twice_returns_same_door() {
        let definitions = InMemoryDefinitionProvider::new();
        let hub = SignalHub::builder()
            .with_provider(Arc::new(definitions.clone()))
            .build();
        let signal = Signal::create("s").build().unwrap();
        let door = Door::create("d")
            .listen_signal(signal.signal_id.clone())
            .relay()
            .build()
            .unwrap();
        definitions.upsert_door(door.clone());

        let first = hub.activate_door(door.uid()).await.unwrap();
        let second = hub.activate_door(door.uid()).await.unwrap();
        assert_eq!(first.uid(), second.uid());
        assert!(hub.door(door.uid()).is_some());

        assert!(hub.disable_door(door.uid()).await);
        assert!(!hub.disable_door(door.uid()).await);
    }
}
