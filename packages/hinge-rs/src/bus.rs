//! Watch bus: every delivered message, broadcast to observers.
//!
//! # Guarantees
//!
//! - **At-most-once delivery**: slow watchers may miss messages
//! - **In-memory only**: nothing is persisted
//! - **No replay**: lagged receivers get `RecvError::Lagged`
//!
//! The watch bus is for observation (tests, audit, dashboards). Doors never
//! read it; they receive through their subscriptions.

use tokio::sync::broadcast;

use crate::message::SignalMessage;

/// Default channel capacity for the watch bus.
pub const DEFAULT_CAPACITY: usize = 10000;

#[derive(Clone)]
pub struct SignalBus {
    sender: broadcast::Sender<SignalMessage>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// The capacity bounds how many messages are buffered before slow
    /// watchers start lagging.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a message. Returns the number of watchers that got it.
    pub fn emit(&self, message: SignalMessage) -> usize {
        self.sender.send(message).unwrap_or(0)
    }

    /// Messages emitted before subscribing are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<SignalMessage> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SignalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
