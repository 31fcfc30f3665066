//! Testing utilities for hinge topologies.
//!
//! # Feature Flag
//!
//! This module is only available with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! hinge = { version = "0.1", features = ["testing"] }
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use hinge::testing::{ManualClock, RecordingReceiver};
//!
//! let clock = Arc::new(ManualClock::starting_now());
//! let hub = SignalHub::builder().with_clock(clock.clone()).build();
//!
//! let out = Arc::new(RecordingReceiver::new());
//! hub.service().subscribe(door.uid(), out.clone()).await?;
//!
//! hub.fire(signal.uid(), None, None).await?;
//! out.wait_for(1).await;  // no sleep
//! ```
//!
//! # Time
//!
//! Door timers run on tokio time while message stamps come from the
//! [`Clock`]. Under `tokio::time::pause()`, move both together with
//! [`ManualClock::advance_with_tokio`].

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::clock::Clock;
use crate::fanout::SignalReceiver;
use crate::message::SignalMessage;

pub use crate::persistence::InMemoryDoorStateStore;

// =============================================================================
// ManualClock
// =============================================================================

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    micros: AtomicI64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            micros: AtomicI64::new(start.timestamp_micros()),
        }
    }

    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.micros.store(at.timestamp_micros(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        let delta = i64::try_from(by.as_micros()).unwrap_or(i64::MAX);
        self.micros.fetch_add(delta, Ordering::SeqCst);
    }

    /// Advance this clock and tokio's paused clock by the same amount.
    pub async fn advance_with_tokio(&self, by: Duration) {
        self.advance(by);
        tokio::time::advance(by).await;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let micros = self.micros.load(Ordering::SeqCst);
        Utc.timestamp_micros(micros)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

// =============================================================================
// RecordingReceiver
// =============================================================================

/// A [`SignalReceiver`] that records everything it is handed.
///
/// Subscribe it to a door's uid to observe the door's output.
#[derive(Debug)]
pub struct RecordingReceiver {
    uid: Uuid,
    received: Mutex<Vec<SignalMessage>>,
    notify: Notify,
}

impl RecordingReceiver {
    pub fn new() -> Self {
        Self {
            uid: Uuid::new_v4(),
            received: Mutex::new(Vec::new()),
            notify: Notify::new(),
        }
    }

    /// Snapshot of the messages received so far, in arrival order.
    pub fn received(&self) -> Vec<SignalMessage> {
        self.received
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.received.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Wait until at least `count` messages were received.
    ///
    /// Wrap in `tokio::time::timeout` for tests that might hang.
    pub async fn wait_for(&self, count: usize) {
        loop {
            // Register for notification BEFORE checking count
            let notified = self.notify.notified();
            if self.count() >= count {
                return;
            }
            notified.await;
        }
    }
}

impl Default for RecordingReceiver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignalReceiver for RecordingReceiver {
    fn receiver_uid(&self) -> Uuid {
        self.uid
    }

    async fn receive_signal(&self, message: SignalMessage) {
        if let Ok(mut received) = self.received.lock() {
            received.push(message);
        }
        self.notify.notify_waiters();
    }
}
