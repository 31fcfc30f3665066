//! Signal and door definitions.
//!
//! Definitions are configuration: produced by the [`builder`](crate::builder),
//! stored by a [`DefinitionProvider`](crate::provider::DefinitionProvider),
//! immutable once built. A door definition carries its sources, its
//! retention policy and one of two behaviours ([`DoorKind`]).

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::condition::Condition;
use crate::formula::{self, Evaluator, FormulaError};
use crate::ids::{DoorId, SignalId, SourceId};
use crate::message::SignalMessage;
use crate::retention::RetentionPolicy;

/// Reserved variable name bound to the door's own output.
pub const THIS_VARIABLE: &str = "this";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalDefinition {
    pub signal_id: SignalId,
    /// Every message fired on this signal is relayed to the parent.
    #[serde(default)]
    pub parent_signal_id: Option<SignalId>,
    #[serde(default)]
    pub group_name: Option<String>,
}

impl SignalDefinition {
    pub fn uid(&self) -> Uuid {
        self.signal_id.uid
    }

    pub fn name(&self) -> &str {
        &self.signal_id.name
    }
}

/// When a logical door evaluates its formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowMode {
    /// On every qualifying arrival.
    #[default]
    React,
    /// Once per window of `interval`, opened by the first arrival.
    Buffered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalAggregatorDoor {
    pub logical_formula: String,
    /// Variable name to source uid. May bind [`THIS_VARIABLE`] to the door.
    pub variable_names: BTreeMap<String, Uuid>,
    pub use_current_door_status: bool,
    pub interval: Duration,
    pub window_mode: WindowMode,
}

impl LogicalAggregatorDoor {
    pub fn compile(&self) -> Result<Evaluator, FormulaError> {
        formula::compile(&self.logical_formula, self.variable_names.keys())
    }
}

/// Predicate of a relay filter door.
///
/// With a `carry_type`, the condition's payload root is bound to payloads of
/// that type only; any other message does not match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    #[serde(default)]
    pub carry_type: Option<String>,
    pub condition: Condition,
}

impl FilterCondition {
    pub fn on_message(condition: Condition) -> Self {
        Self {
            carry_type: None,
            condition,
        }
    }

    pub fn on_content(carry_type: impl Into<String>, condition: Condition) -> Self {
        Self {
            carry_type: Some(carry_type.into()),
            condition,
        }
    }

    pub fn matches(&self, message: &SignalMessage) -> bool {
        match &self.carry_type {
            Some(expected) => match message.payload() {
                Some(payload) if &payload.carry_type == expected => {
                    self.condition.evaluate(message, Some(&payload.data))
                }
                _ => false,
            },
            None => self
                .condition
                .evaluate(message, message.payload().map(|p| &p.data)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayFilterDoor {
    pub filter_condition: FilterCondition,
    #[serde(default)]
    pub dont_relay_signal_content: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DoorKind {
    LogicalAggregator(LogicalAggregatorDoor),
    RelayFilter(RelayFilterDoor),
}

impl DoorKind {
    pub fn label(&self) -> &'static str {
        match self {
            DoorKind::LogicalAggregator(_) => "logical_aggregator",
            DoorKind::RelayFilter(_) => "relay_filter",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoorDefinition {
    pub door_id: DoorId,
    pub signal_source_ids: Vec<SignalId>,
    pub door_source_ids: Vec<DoorId>,
    #[serde(default)]
    pub retention: RetentionPolicy,
    pub kind: DoorKind,
}

impl DoorDefinition {
    pub fn uid(&self) -> Uuid {
        self.door_id.uid
    }

    pub fn name(&self) -> &str {
        &self.door_id.name
    }

    /// Every listened source, signals first, in declaration order.
    pub fn sources(&self) -> Vec<SourceId> {
        self.signal_source_ids
            .iter()
            .cloned()
            .map(SourceId::from)
            .chain(self.door_source_ids.iter().cloned().map(SourceId::from))
            .collect()
    }

    pub fn source_uids(&self) -> Vec<Uuid> {
        self.signal_source_ids
            .iter()
            .map(|s| s.uid)
            .chain(self.door_source_ids.iter().map(|d| d.uid))
            .collect()
    }

    pub fn listens_to(&self, uid: Uuid) -> bool {
        self.signal_source_ids.iter().any(|s| s.uid == uid)
            || self.door_source_ids.iter().any(|d| d.uid == uid)
    }

    pub fn as_logical(&self) -> Option<&LogicalAggregatorDoor> {
        match &self.kind {
            DoorKind::LogicalAggregator(logical) => Some(logical),
            DoorKind::RelayFilter(_) => None,
        }
    }

    pub fn as_relay(&self) -> Option<&RelayFilterDoor> {
        match &self.kind {
            DoorKind::RelayFilter(relay) => Some(relay),
            DoorKind::LogicalAggregator(_) => None,
        }
    }
}
