//! Logical aggregator doors.
//!
//! A logical door assigns each formula variable a boolean taken from the
//! door state and stimulates when the formula holds:
//!
//! - a source variable is true while that source has at least one
//!   not-consumed message;
//! - `this` is true while the door's own output is up (it stimulated within
//!   `interval`).
//!
//! # Window modes
//!
//! - [`WindowMode::React`] evaluates on every recorded arrival. When the
//!   formula uses `this`, each stimulation also arms an expiry timer so a
//!   formula like `A & !this` is evaluated again once the door drops down.
//! - [`WindowMode::Buffered`] opens a window on the first arrival and
//!   evaluates exactly once when it closes. The window's messages are
//!   consumed whatever the outcome.
//!
//! The decisions are pure: no IO, no clock reads. The door worker owns
//! stamping, persistence and forwarding.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::definition::{LogicalAggregatorDoor, WindowMode};
use crate::door::{Decision, DoorLogic, Stimulation, TimerRequest};
use crate::formula::{Evaluator, FormulaError};
use crate::retention::RetentionPolicy;
use crate::state::DoorHandlerState;

pub(crate) struct LogicalDoor {
    door_uid: Uuid,
    evaluator: Evaluator,
    /// Source uid per evaluator variable, same order.
    bindings: Vec<Uuid>,
    interval: Duration,
    window_mode: WindowMode,
    uses_this: bool,
    expiry: Option<u64>,
}

impl LogicalDoor {
    pub(crate) fn new(door_uid: Uuid, definition: &LogicalAggregatorDoor) -> Result<Self, FormulaError> {
        let evaluator = definition.compile()?;
        let bindings: Vec<Uuid> = evaluator
            .variables()
            .iter()
            .map(|name| {
                definition
                    .variable_names
                    .get(name)
                    .copied()
                    .unwrap_or_else(Uuid::nil)
            })
            .collect();
        let uses_this = bindings.contains(&door_uid);

        Ok(Self {
            door_uid,
            evaluator,
            bindings,
            interval: definition.interval,
            window_mode: definition.window_mode,
            uses_this,
            expiry: None,
        })
    }

    fn assignment(&self, state: &DoorHandlerState, now: DateTime<Utc>) -> Vec<bool> {
        self.bindings
            .iter()
            .map(|uid| {
                if *uid == self.door_uid {
                    state.is_up(now, self.interval)
                } else {
                    state.has_not_consumed(*uid)
                }
            })
            .collect()
    }

    fn holds(&self, state: &DoorHandlerState, now: DateTime<Utc>) -> bool {
        self.evaluator.evaluate_indexed(&self.assignment(state, now))
    }

    fn react(&mut self, state: &mut DoorHandlerState, policy: &RetentionPolicy, now: DateTime<Utc>) -> Decision {
        if !self.holds(state, now) {
            return Decision::default();
        }

        let consumed = state.consume_all(policy, now);
        let mut decision = Decision::stimulate(Stimulation::from_consumed(&consumed));
        if self.uses_this {
            let id = state.next_timer_id();
            self.expiry = Some(id);
            decision.timers.push(TimerRequest {
                id,
                after: self.interval,
            });
        }
        decision
    }

    fn close_window(
        &mut self,
        id: u64,
        state: &mut DoorHandlerState,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
    ) -> Decision {
        let Some(window) = state.close_window(id) else {
            return Decision::default();
        };

        let holds = self.holds(state, now);
        let consumed = state.consume_all(policy, now);
        if !holds {
            debug!(
                door = %self.door_uid,
                window = window.id,
                consumed = consumed.len(),
                "window closed without stimulation"
            );
            return Decision::default();
        }
        Decision::stimulate(Stimulation::from_consumed(&consumed))
    }
}

impl DoorLogic for LogicalDoor {
    fn on_arrival(&mut self, state: &mut DoorHandlerState, policy: &RetentionPolicy, now: DateTime<Utc>) -> Decision {
        match self.window_mode {
            WindowMode::React => self.react(state, policy, now),
            WindowMode::Buffered => {
                let mut decision = Decision::default();
                if let Some(window) = state.open_window(now, self.interval) {
                    decision.timers.push(TimerRequest {
                        id: window.id,
                        after: self.interval,
                    });
                }
                decision
            }
        }
    }

    fn on_timer(
        &mut self,
        id: u64,
        state: &mut DoorHandlerState,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
    ) -> Decision {
        match self.window_mode {
            WindowMode::Buffered => self.close_window(id, state, policy, now),
            WindowMode::React => {
                if self.expiry != Some(id) {
                    return Decision::default();
                }
                self.expiry = None;
                self.react(state, policy, now)
            }
        }
    }

    fn restore(&mut self, state: &mut DoorHandlerState, now: DateTime<Utc>) -> Vec<TimerRequest> {
        match self.window_mode {
            WindowMode::Buffered => state
                .pending_window
                .map(|window| TimerRequest {
                    id: window.id,
                    after: (window.closes_at - now).to_std().unwrap_or(Duration::ZERO),
                })
                .into_iter()
                .collect(),
            WindowMode::React => {
                state.pending_window = None;
                let Some(last) = state.last_stimulation_at else {
                    return Vec::new();
                };
                if !self.uses_this || !state.is_up(now, self.interval) {
                    return Vec::new();
                }
                let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
                let id = state.next_timer_id();
                self.expiry = Some(id);
                vec![TimerRequest {
                    id,
                    after: self.interval.saturating_sub(elapsed),
                }]
            }
        }
    }
}
