//! Subscription registry and delivery fan-out.
//!
//! A door registers itself as a [`SignalReceiver`] of each of its sources.
//! Delivering a message hands it to every receiver of the source it is
//! addressed to. The registry is shared by every door but is only mutated
//! through [`SignalService`] calls; doors never touch each other directly.
//!
//! Receivers must not block in `receive_signal`: door handles only enqueue
//! into their mailbox, which keeps chains and cycles of doors free of
//! deadlocks.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::broadcast;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::bus::SignalBus;
use crate::error::DeliveryError;
use crate::message::SignalMessage;

/// The inbound side of a door (or any other consumer of signals).
#[async_trait]
pub trait SignalReceiver: Send + Sync + 'static {
    /// Stable identity used to deduplicate and remove subscriptions.
    fn receiver_uid(&self) -> Uuid;

    async fn receive_signal(&self, message: SignalMessage);
}

#[async_trait]
pub trait SignalService: Send + Sync + 'static {
    /// Register `receiver` for messages addressed to `source_uid`.
    ///
    /// Subscribing twice with the same receiver uid replaces the earlier
    /// registration.
    async fn subscribe(
        &self,
        source_uid: Uuid,
        receiver: Arc<dyn SignalReceiver>,
    ) -> Result<(), DeliveryError>;

    async fn unsubscribe(&self, source_uid: Uuid, receiver_uid: Uuid);

    /// Hand `message` to every receiver subscribed to `source_uid`.
    ///
    /// Returns the number of receivers reached.
    async fn deliver(&self, source_uid: Uuid, message: SignalMessage) -> usize;

    /// Observe every delivered message.
    fn watch(&self) -> broadcast::Receiver<SignalMessage>;
}

/// Default in-process [`SignalService`].
pub struct FanOut {
    subscriptions: DashMap<Uuid, Vec<Arc<dyn SignalReceiver>>>,
    bus: SignalBus,
}

impl FanOut {
    pub fn new() -> Self {
        Self::with_watch_capacity(crate::bus::DEFAULT_CAPACITY)
    }

    pub fn with_watch_capacity(capacity: usize) -> Self {
        Self {
            subscriptions: DashMap::new(),
            bus: SignalBus::with_capacity(capacity),
        }
    }

    pub fn subscriber_count(&self, source_uid: Uuid) -> usize {
        self.subscriptions
            .get(&source_uid)
            .map(|entry| entry.value().len())
            .unwrap_or(0)
    }

    pub fn is_subscribed(&self, source_uid: Uuid, receiver_uid: Uuid) -> bool {
        self.subscriptions
            .get(&source_uid)
            .map(|entry| entry.value().iter().any(|r| r.receiver_uid() == receiver_uid))
            .unwrap_or(false)
    }
}

impl Default for FanOut {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FanOut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanOut")
            .field("sources", &self.subscriptions.len())
            .field("bus", &self.bus)
            .finish()
    }
}

#[async_trait]
impl SignalService for FanOut {
    async fn subscribe(
        &self,
        source_uid: Uuid,
        receiver: Arc<dyn SignalReceiver>,
    ) -> Result<(), DeliveryError> {
        let receiver_uid = receiver.receiver_uid();
        let mut entry = self.subscriptions.entry(source_uid).or_default();
        entry.retain(|r| r.receiver_uid() != receiver_uid);
        entry.push(receiver);
        debug!(source = %source_uid, receiver = %receiver_uid, "subscribed");
        Ok(())
    }

    async fn unsubscribe(&self, source_uid: Uuid, receiver_uid: Uuid) {
        let emptied = match self.subscriptions.get_mut(&source_uid) {
            Some(mut entry) => {
                entry.retain(|r| r.receiver_uid() != receiver_uid);
                entry.is_empty()
            }
            None => false,
        };
        if emptied {
            self.subscriptions.remove_if(&source_uid, |_, receivers| receivers.is_empty());
        }
        debug!(source = %source_uid, receiver = %receiver_uid, "unsubscribed");
    }

    async fn deliver(&self, source_uid: Uuid, message: SignalMessage) -> usize {
        // Clone the receiver list out so no registry guard is held across
        // the awaits below.
        let receivers: Vec<Arc<dyn SignalReceiver>> = self
            .subscriptions
            .get(&source_uid)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();

        trace!(
            source = %source_uid,
            message = %message.uid,
            receivers = receivers.len(),
            "delivering"
        );

        self.bus.emit(message.clone());
        join_all(
            receivers
                .iter()
                .map(|receiver| receiver.receive_signal(message.clone())),
        )
        .await;

        receivers.len()
    }

    fn watch(&self) -> broadcast::Receiver<SignalMessage> {
        self.bus.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{SignalId, SourceId};
    use crate::testing::RecordingReceiver;
    use chrono::Utc;

    fn message_from(source: &SourceId) -> SignalMessage {
        SignalMessage::new(source, Utc::now(), None)
    }

    #[tokio::test]
    async fn test_deliver_reaches_only_subscribers_of_source() {
        let fanout = FanOut::new();
        let a = SourceId::from(SignalId::new(Uuid::new_v4(), "a"));
        let b = SourceId::from(SignalId::new(Uuid::new_v4(), "b"));
        let on_a = Arc::new(RecordingReceiver::new());
        let on_b = Arc::new(RecordingReceiver::new());

        fanout.subscribe(a.uid(), on_a.clone()).await.unwrap();
        fanout.subscribe(b.uid(), on_b.clone()).await.unwrap();

        let reached = fanout.deliver(a.uid(), message_from(&a)).await;

        assert_eq!(reached, 1);
        assert_eq!(on_a.received().len(), 1);
        assert!(on_b.received().is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent_per_receiver() {
        let fanout = FanOut::new();
        let a = SourceId::from(SignalId::new(Uuid::new_v4(), "a"));
        let receiver = Arc::new(RecordingReceiver::new());

        fanout.subscribe(a.uid(), receiver.clone()).await.unwrap();
        fanout.subscribe(a.uid(), receiver.clone()).await.unwrap();
        assert_eq!(fanout.subscriber_count(a.uid()), 1);

        fanout.deliver(a.uid(), message_from(&a)).await;
        assert_eq!(receiver.received().len(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let fanout = FanOut::new();
        let a = SourceId::from(SignalId::new(Uuid::new_v4(), "a"));
        let receiver = Arc::new(RecordingReceiver::new());

        fanout.subscribe(a.uid(), receiver.clone()).await.unwrap();
        fanout.unsubscribe(a.uid(), receiver.receiver_uid()).await;

        assert!(!fanout.is_subscribed(a.uid(), receiver.receiver_uid()));
        assert_eq!(fanout.deliver(a.uid(), message_from(&a)).await, 0);
        assert!(receiver.received().is_empty());
    }

    #[tokio::test]
    async fn test_watch_sees_every_delivery() {
        let fanout = FanOut::new();
        let mut watch = fanout.watch();
        let a = SourceId::from(SignalId::new(Uuid::new_v4(), "a"));
        let msg = message_from(&a);

        fanout.deliver(a.uid(), msg.clone()).await;

        assert_eq!(watch.recv().await.unwrap().uid, msg.uid);
    }
}
