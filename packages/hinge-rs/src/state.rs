//! Persisted per-door state.
//!
//! One [`DoorHandlerState`] exists per door instance. It holds a
//! [`SignalStatus`] for every listened source plus one for the door's own
//! output, the metadata of an open buffered window, and the door's last
//! stimulation time. The whole record is what a [`DoorStateStore`] saves.
//!
//! [`DoorStateStore`]: crate::persistence::DoorStateStore

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::SignalMessage;
use crate::retention::RetentionPolicy;
use crate::status::SignalStatus;

/// An open buffered window, waiting for its timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingWindow {
    pub id: u64,
    pub opened_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoorHandlerState {
    pub door_uid: Uuid,
    pub statuses: BTreeMap<Uuid, SignalStatus>,
    pub listened: BTreeSet<Uuid>,
    #[serde(default)]
    pub pending_window: Option<PendingWindow>,
    #[serde(default)]
    pub last_stimulation_at: Option<DateTime<Utc>>,
    #[serde(default)]
    next_timer_id: u64,
}

impl DoorHandlerState {
    pub fn new(door_uid: Uuid) -> Self {
        let mut statuses = BTreeMap::new();
        statuses.insert(door_uid, SignalStatus::new(door_uid));
        Self {
            door_uid,
            statuses,
            listened: BTreeSet::new(),
            pending_window: None,
            last_stimulation_at: None,
            next_timer_id: 0,
        }
    }

    /// Replace the set of listened sources.
    ///
    /// Statuses of sources no longer listened to are dropped; new sources
    /// start empty. The door's own status is always kept.
    pub fn listen<I: IntoIterator<Item = Uuid>>(&mut self, sources: I) {
        self.listened = sources.into_iter().collect();
        let door_uid = self.door_uid;
        let listened = &self.listened;
        self.statuses
            .retain(|uid, _| *uid == door_uid || listened.contains(uid));
        for uid in self.listened.iter() {
            self.statuses
                .entry(*uid)
                .or_insert_with(|| SignalStatus::new(*uid));
        }
    }

    pub fn is_listened(&self, source_uid: Uuid) -> bool {
        self.listened.contains(&source_uid)
    }

    pub fn status(&self, source_uid: Uuid) -> Option<&SignalStatus> {
        self.statuses.get(&source_uid)
    }

    /// The door's own output status.
    pub fn own_status(&self) -> Option<&SignalStatus> {
        self.statuses.get(&self.door_uid)
    }

    /// Record an arrival from a listened source.
    ///
    /// Returns `false` (and changes nothing) for unlistened sources and for
    /// redelivered messages.
    pub fn record(&mut self, message: SignalMessage, policy: &RetentionPolicy, now: DateTime<Utc>) -> bool {
        let source_uid = message.source_uid();
        if !self.is_listened(source_uid) {
            return false;
        }
        self.statuses
            .entry(source_uid)
            .or_insert_with(|| SignalStatus::new(source_uid))
            .push(message, policy, now)
    }

    /// Record the door's own stimulation.
    pub fn record_stimulation(&mut self, message: SignalMessage, policy: &RetentionPolicy, now: DateTime<Utc>) {
        self.last_stimulation_at = Some(message.emitted_at);
        let door_uid = self.door_uid;
        self.statuses
            .entry(door_uid)
            .or_insert_with(|| SignalStatus::new(door_uid))
            .push_consumed(message, policy, now);
    }

    /// Whether the door's output is "up": it stimulated within `interval`.
    pub fn is_up(&self, now: DateTime<Utc>, interval: Duration) -> bool {
        let Some(last) = self.last_stimulation_at else {
            return false;
        };
        match (now - last).to_std() {
            Ok(elapsed) => elapsed < interval,
            // A stimulation stamped in the future is still up.
            Err(_) => true,
        }
    }

    pub fn has_not_consumed(&self, source_uid: Uuid) -> bool {
        self.status(source_uid)
            .map(SignalStatus::has_not_consumed)
            .unwrap_or(false)
    }

    /// Consume every listened source's pending messages, oldest first.
    pub fn consume_all(&mut self, policy: &RetentionPolicy, now: DateTime<Utc>) -> Vec<SignalMessage> {
        let mut consumed = Vec::new();
        for uid in self.listened.iter() {
            if let Some(status) = self.statuses.get_mut(uid) {
                consumed.extend(status.consume_all(policy, now));
            }
        }
        consumed.sort_by_key(|m| m.emitted_at);
        consumed
    }

    /// Re-apply retention to every status.
    pub fn enforce_retention(&mut self, policy: &RetentionPolicy, now: DateTime<Utc>) {
        for status in self.statuses.values_mut() {
            status.enforce(policy, now);
        }
    }

    /// Allocate an id for a timer owned by this door.
    pub fn next_timer_id(&mut self) -> u64 {
        self.next_timer_id += 1;
        self.next_timer_id
    }

    /// Open a buffered window unless one is already pending.
    ///
    /// Returns the new window, or `None` when one was already open.
    pub fn open_window(&mut self, now: DateTime<Utc>, interval: Duration) -> Option<PendingWindow> {
        if self.pending_window.is_some() {
            return None;
        }
        let length = chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::MAX);
        let window = PendingWindow {
            id: self.next_timer_id(),
            opened_at: now,
            closes_at: now.checked_add_signed(length).unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        self.pending_window = Some(window);
        Some(window)
    }

    /// Close the pending window if `id` names it.
    pub fn close_window(&mut self, id: u64) -> Option<PendingWindow> {
        match self.pending_window {
            Some(window) if window.id == id => self.pending_window.take(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{SignalId, SourceId};
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_unlistened_source_leaves_state_untouched() {
        let door_uid = Uuid::new_v4();
        let listened = SourceId::from(SignalId::new(Uuid::new_v4(), "listened"));
        let stranger = SourceId::from(SignalId::new(Uuid::new_v4(), "stranger"));
        let policy = RetentionPolicy::default();
        let now = Utc::now();

        let mut state = DoorHandlerState::new(door_uid);
        state.listen([listened.uid()]);
        let before = state.clone();

        assert!(!state.record(SignalMessage::new(&stranger, now, None), &policy, now));

        assert_eq!(state, before);
        assert!(state.statuses.values().all(SignalStatus::is_empty));
        assert!(state.status(stranger.uid()).is_none());
    }

    #[test]
    fn test_listen_keeps_own_status_and_drops_removed_sources() {
        let door_uid = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let mut state = DoorHandlerState::new(door_uid);
        state.listen([a, b]);
        assert_eq!(state.statuses.len(), 3);

        state.listen([b]);
        assert!(state.status(a).is_none());
        assert!(state.status(b).is_some());
        assert!(state.own_status().is_some());
    }

    #[test]
    fn test_is_up_within_interval() {
        let door = SourceId::from(crate::ids::DoorId::new(Uuid::new_v4(), "door"));
        let policy = RetentionPolicy::default();
        let now = Utc::now();
        let mut state = DoorHandlerState::new(door.uid());

        assert!(!state.is_up(now, Duration::from_secs(5)));

        state.record_stimulation(SignalMessage::new(&door, now, None), &policy, now);
        assert!(state.is_up(now + ChronoDuration::seconds(4), Duration::from_secs(5)));
        assert!(!state.is_up(now + ChronoDuration::seconds(5), Duration::from_secs(5)));
        assert!(state.own_status().and_then(|s| s.last_signal_received.as_ref()).is_some());
    }

    #[test]
    fn test_window_opens_once_until_closed() {
        let now = Utc::now();
        let mut state = DoorHandlerState::new(Uuid::new_v4());

        let window = state.open_window(now, Duration::from_secs(2)).unwrap();
        assert_eq!(window.closes_at, now + ChronoDuration::seconds(2));
        assert!(state.open_window(now, Duration::from_secs(2)).is_none());

        assert!(state.close_window(window.id + 100).is_none());
        assert_eq!(state.close_window(window.id), Some(window));
        assert!(state.pending_window.is_none());

        let next = state.open_window(now, Duration::from_secs(2)).unwrap();
        assert_ne!(next.id, window.id);
    }

    #[test]
    fn test_state_round_trips_through_json() {
        let door_uid = Uuid::new_v4();
        let source = SourceId::from(SignalId::new(Uuid::new_v4(), "sig"));
        let policy = RetentionPolicy::default();
        let now = Utc::now();

        let mut state = DoorHandlerState::new(door_uid);
        state.listen([source.uid()]);
        state.record(SignalMessage::new(&source, now, None), &policy, now);
        state.record(
            SignalMessage::new(&source, now - ChronoDuration::seconds(3), None),
            &policy,
            now,
        );
        state.consume_all(&policy, now);
        state.record(SignalMessage::new(&source, now + ChronoDuration::seconds(1), None), &policy, now);
        state.open_window(now, Duration::from_millis(1500));

        let json = serde_json::to_string(&state).unwrap();
        let restored: DoorHandlerState = serde_json::from_str(&json).unwrap();

        assert_eq!(restored, state);
        let history = &restored.status(source.uid()).unwrap().signals_received_history;
        assert!(history[0].emitted_at < history[1].emitted_at);
    }
}
