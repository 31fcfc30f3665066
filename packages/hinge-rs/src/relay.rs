//! Relay filter doors.
//!
//! Every arrival drains the not-consumed queues in emission order. Each
//! drained message that matches the filter is forwarded as its own
//! stimulation; the rest are consumed silently.

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::definition::{FilterCondition, RelayFilterDoor};
use crate::door::{Decision, DoorLogic, Stimulation, TimerRequest};
use crate::message::SignalMessage;
use crate::retention::RetentionPolicy;
use crate::state::DoorHandlerState;

pub(crate) struct RelayDoor {
    filter: FilterCondition,
    dont_relay_signal_content: bool,
}

impl RelayDoor {
    pub(crate) fn new(definition: &RelayFilterDoor) -> Self {
        Self {
            filter: definition.filter_condition.clone(),
            dont_relay_signal_content: definition.dont_relay_signal_content,
        }
    }

    fn relay(&self, message: &SignalMessage) -> Stimulation {
        let origin = if self.dont_relay_signal_content {
            message.without_content().from
        } else {
            message.from.clone()
        };

        Stimulation {
            payload: if self.dont_relay_signal_content {
                None
            } else {
                message.payload().cloned()
            },
            metadata: message.from.metadata.clone(),
            origins: vec![origin],
        }
    }
}

impl DoorLogic for RelayDoor {
    fn on_arrival(&mut self, state: &mut DoorHandlerState, policy: &RetentionPolicy, now: DateTime<Utc>) -> Decision {
        let examined = state.consume_all(policy, now);
        let stimulations: Vec<Stimulation> = examined
            .iter()
            .filter(|message| self.filter.matches(message))
            .map(|message| self.relay(message))
            .collect();

        trace!(
            door = %state.door_uid,
            examined = examined.len(),
            relayed = stimulations.len(),
            "relay filter applied"
        );

        Decision {
            stimulations,
            timers: Vec::new(),
        }
    }

    fn on_timer(
        &mut self,
        _id: u64,
        _state: &mut DoorHandlerState,
        _policy: &RetentionPolicy,
        _now: DateTime<Utc>,
    ) -> Decision {
        Decision::default()
    }

    fn restore(&mut self, state: &mut DoorHandlerState, _now: DateTime<Utc>) -> Vec<TimerRequest> {
        state.pending_window = None;
        Vec::new()
    }
}
