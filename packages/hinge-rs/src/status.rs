//! Per-source bookkeeping inside a door.
//!
//! # Ordering
//!
//! Delivery order carries no meaning. Both queues are kept sorted by
//! `emitted_at`, and `last_signal_received` only moves forward in emission
//! time: a late message is queued in its logical position but never
//! becomes the "last" message.
//!
//! # Idempotency
//!
//! Delivery is at-least-once. A message whose uid is still tracked (last,
//! not consumed, or in retained history) is ignored, so a redelivery never
//! counts twice toward a formula while its original is retained. Once
//! retention has trimmed the original, a late redelivery is a new arrival.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::SignalMessage;
use crate::retention::RetentionPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalStatus {
    pub signal_uid: Uuid,
    pub last_signal_received: Option<SignalMessage>,
    pub signals_received_not_consumed: VecDeque<SignalMessage>,
    pub signals_received_history: VecDeque<SignalMessage>,
}

impl SignalStatus {
    pub fn new(signal_uid: Uuid) -> Self {
        Self {
            signal_uid,
            last_signal_received: None,
            signals_received_not_consumed: VecDeque::new(),
            signals_received_history: VecDeque::new(),
        }
    }

    /// True when nothing was ever recorded.
    pub fn is_empty(&self) -> bool {
        self.last_signal_received.is_none()
            && self.signals_received_not_consumed.is_empty()
            && self.signals_received_history.is_empty()
    }

    pub fn has_not_consumed(&self) -> bool {
        !self.signals_received_not_consumed.is_empty()
    }

    /// Whether `uid` is still retained here. Trimmed messages are forgotten.
    pub fn tracks(&self, uid: Uuid) -> bool {
        self.last_signal_received.as_ref().map(|m| m.uid) == Some(uid)
            || self.signals_received_not_consumed.iter().any(|m| m.uid == uid)
            || self.signals_received_history.iter().any(|m| m.uid == uid)
    }

    /// Record an arrival. Returns `false` for a redelivered message.
    pub fn push(&mut self, message: SignalMessage, policy: &RetentionPolicy, now: DateTime<Utc>) -> bool {
        if self.tracks(message.uid) {
            return false;
        }

        self.advance_last(&message);
        insert_ordered(&mut self.signals_received_not_consumed, message);
        self.enforce(policy, now);
        true
    }

    /// Record a message straight into history (a door's own output).
    pub fn push_consumed(&mut self, message: SignalMessage, policy: &RetentionPolicy, now: DateTime<Utc>) {
        if self.tracks(message.uid) {
            return;
        }
        self.advance_last(&message);
        insert_ordered(&mut self.signals_received_history, message);
        self.enforce(policy, now);
    }

    /// Move every not-consumed message into history.
    ///
    /// Returns the moved messages in emission order (before history
    /// trimming, so callers see everything that was consumed).
    pub fn consume_all(&mut self, policy: &RetentionPolicy, now: DateTime<Utc>) -> Vec<SignalMessage> {
        let consumed: Vec<SignalMessage> = self.signals_received_not_consumed.drain(..).collect();
        for message in &consumed {
            insert_ordered(&mut self.signals_received_history, message.clone());
        }
        self.enforce(policy, now);
        consumed
    }

    /// Apply both retention bounds.
    pub fn enforce(&mut self, policy: &RetentionPolicy, now: DateTime<Utc>) {
        let dropped = policy.trim_not_consumed(&mut self.signals_received_not_consumed, now)
            + policy.trim_history(&mut self.signals_received_history, now);
        if dropped > 0 {
            tracing::trace!(source = %self.signal_uid, dropped, "retention trimmed messages");
        }
    }

    fn advance_last(&mut self, message: &SignalMessage) {
        let newer = match &self.last_signal_received {
            Some(last) => message.emitted_at > last.emitted_at,
            None => true,
        };
        if newer {
            self.last_signal_received = Some(message.clone());
        }
    }
}

/// Insert after every message emitted at or before `message`.
fn insert_ordered(queue: &mut VecDeque<SignalMessage>, message: SignalMessage) {
    let idx = queue.partition_point(|m| m.emitted_at <= message.emitted_at);
    queue.insert(idx, message);
}
