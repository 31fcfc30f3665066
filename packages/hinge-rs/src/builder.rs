//! Builders for signal and door definitions.
//!
//! Validation happens in `build()`, never later: a definition that comes
//! out of a builder is complete and its formula or condition is known to
//! compile. Errors are typed ([`BuildError`]) and name the door, variable,
//! formula or source at fault.
//!
//! # Example
//!
//! ```ignore
//! let ready = Signal::create("ready").build()?;
//! let paid = Signal::create("paid").build()?;
//!
//! // "A & B" over both signals, evaluated on every arrival.
//! let both = Door::create("ready-and-paid")
//!     .listen_signal(ready.signal_id.clone())
//!     .listen_signal(paid.signal_id.clone())
//!     .use_logical_aggregator(LogicOperator::And, Some(Duration::from_secs(5)))
//!     .build()?;
//!
//! // Explicit formula, buffered window, self reference.
//! let gated = Door::create("gated")
//!     .listen_signal(ready.signal_id.clone())
//!     .listen_signal(paid.signal_id.clone())
//!     .logical_aggregator()
//!     .active_window_interval(Duration::from_secs(1))
//!     .window_mode(WindowMode::Buffered)
//!     .assign_variable_name("ready", ready.signal_id.clone())
//!     .assign_variable_name("paid", paid.signal_id.clone())
//!     .use_variable_this()
//!     .formula("ready & paid & !this")
//!     .build()?;
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use uuid::Uuid;

use crate::condition::Condition;
use crate::definition::{
    DoorDefinition, DoorKind, FilterCondition, LogicalAggregatorDoor, RelayFilterDoor,
    SignalDefinition, WindowMode, THIS_VARIABLE,
};
use crate::error::BuildError;
use crate::formula::{self, LogicOperator};
use crate::ids::{DoorId, SignalId, SourceId};
use crate::message::short_type_name;
use crate::retention::RetentionPolicy;

/// Interval used by [`DoorBuilder::use_logical_aggregator`] when none is given.
pub const DEFAULT_AGGREGATOR_INTERVAL: Duration = Duration::from_secs(1);

/// Interval used by [`DoorBuilder::relay`].
pub const RELAY_INTERVAL: Duration = Duration::from_millis(100);

// =============================================================================
// Signals
// =============================================================================

pub struct Signal;

impl Signal {
    pub fn create(name: impl Into<String>) -> SignalBuilder {
        SignalBuilder {
            name: name.into(),
            uid: None,
            parent: None,
            group: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignalBuilder {
    name: String,
    uid: Option<Uuid>,
    parent: Option<SignalId>,
    group: Option<String>,
}

impl SignalBuilder {
    pub fn fix_uid(mut self, uid: Uuid) -> Self {
        self.uid = Some(uid);
        self
    }

    /// Every message fired on this signal is also relayed to `parent`.
    pub fn parent(mut self, parent: SignalId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn build(self) -> Result<SignalDefinition, BuildError> {
        if self.name.trim().is_empty() {
            return Err(BuildError::MissingField {
                target: "signal",
                name: self.name,
                field: "name",
            });
        }

        Ok(SignalDefinition {
            signal_id: SignalId::new(self.uid.unwrap_or_else(Uuid::new_v4), self.name),
            parent_signal_id: self.parent,
            group_name: self.group,
        })
    }
}

// =============================================================================
// Doors
// =============================================================================

pub struct Door;

impl Door {
    pub fn create(name: impl Into<String>) -> DoorBuilder {
        DoorBuilder {
            name: name.into(),
            uid: Uuid::new_v4(),
            signals: Vec::new(),
            doors: Vec::new(),
            retention: RetentionPolicy::default(),
        }
    }
}

/// Door identity, sources and retention. Finish with one of the
/// `use_*`/`relay*`/`logical_aggregator` methods.
#[derive(Debug, Clone)]
pub struct DoorBuilder {
    name: String,
    uid: Uuid,
    signals: Vec<SignalId>,
    doors: Vec<DoorId>,
    retention: RetentionPolicy,
}

impl DoorBuilder {
    pub fn fix_uid(mut self, uid: Uuid) -> Self {
        self.uid = uid;
        self
    }

    pub fn uid(&self) -> Uuid {
        self.uid
    }

    pub fn door_id(&self) -> DoorId {
        DoorId::new(self.uid, self.name.clone())
    }

    pub fn listen_signal(mut self, signal: SignalId) -> Self {
        if !self.signals.iter().any(|s| s.uid == signal.uid) {
            self.signals.push(signal);
        }
        self
    }

    pub fn listen_signals<I: IntoIterator<Item = SignalId>>(self, signals: I) -> Self {
        signals.into_iter().fold(self, DoorBuilder::listen_signal)
    }

    pub fn listen_door(mut self, door: DoorId) -> Self {
        if !self.doors.iter().any(|d| d.uid == door.uid) {
            self.doors.push(door);
        }
        self
    }

    pub fn listen_doors<I: IntoIterator<Item = DoorId>>(self, doors: I) -> Self {
        doors.into_iter().fold(self, DoorBuilder::listen_door)
    }

    pub fn history_max_retention(mut self, max: usize) -> Self {
        self.retention.history_max_retention = max;
        self
    }

    pub fn not_consumed_max_retention(mut self, max: usize) -> Self {
        self.retention.not_consumed_max_retention = max;
        self
    }

    pub fn retention_max_delay(mut self, delay: Duration) -> Self {
        self.retention.retention_max_delay = delay;
        self
    }

    pub fn retention(mut self, policy: RetentionPolicy) -> Self {
        self.retention = policy;
        self
    }

    /// Logical door with an explicit formula and bindings.
    pub fn logical_aggregator(self) -> LogicalDoorBuilder {
        LogicalDoorBuilder {
            door: self,
            bindings: Vec::new(),
            use_this: false,
            formula: None,
            interval: None,
            window_mode: WindowMode::React,
        }
    }

    /// Logical door combining every source with one operator.
    ///
    /// Sources get generated names (`A`, `B`, ...) in listen order, signals
    /// first, and the formula joins them: `A & B & C`.
    pub fn use_logical_aggregator(self, op: LogicOperator, interval: Option<Duration>) -> LogicalDoorBuilder {
        self.generated_aggregator(op, interval, false)
    }

    /// Like [`use_logical_aggregator`](Self::use_logical_aggregator), but
    /// the door stimulates at most once per interval: `(A & B) & !this`.
    pub fn use_logical_aggregator_once_per_interval(
        self,
        op: LogicOperator,
        interval: Option<Duration>,
    ) -> LogicalDoorBuilder {
        self.generated_aggregator(op, interval, true)
    }

    /// Forward anything any source fires (`A | B | ...`).
    pub fn relay(self) -> LogicalDoorBuilder {
        self.generated_aggregator(LogicOperator::Or, Some(RELAY_INTERVAL), false)
    }

    fn generated_aggregator(
        self,
        op: LogicOperator,
        interval: Option<Duration>,
        once_per_interval: bool,
    ) -> LogicalDoorBuilder {
        let sources: Vec<SourceId> = self
            .signals
            .iter()
            .cloned()
            .map(SourceId::from)
            .chain(self.doors.iter().cloned().map(SourceId::from))
            .collect();
        let names = generated_variable_names(sources.len());

        let mut formula = op.join(&names);
        if once_per_interval {
            formula = format!("({}) & !{}", formula, THIS_VARIABLE);
        }

        let mut builder = self
            .logical_aggregator()
            .active_window_interval(interval.unwrap_or(DEFAULT_AGGREGATOR_INTERVAL))
            .formula(formula);
        for (name, source) in names.into_iter().zip(sources) {
            builder = builder.assign_variable_name(name, source);
        }
        if once_per_interval {
            builder = builder.use_variable_this();
        }
        builder
    }

    /// Relay filter whose condition sees only the message.
    pub fn relay_filter(self, condition: Condition) -> RelayFilterBuilder {
        RelayFilterBuilder {
            door: self,
            filter: FilterCondition::on_message(condition),
            dont_relay_signal_content: false,
        }
    }

    /// Relay filter over payloads of `carry_type`.
    pub fn relay_filter_on_content(
        self,
        carry_type: impl Into<String>,
        condition: Condition,
    ) -> RelayFilterBuilder {
        RelayFilterBuilder {
            door: self,
            filter: FilterCondition::on_content(carry_type, condition),
            dont_relay_signal_content: false,
        }
    }

    /// Relay filter over payloads built with [`SignalPayload::of::<T>`].
    ///
    /// [`SignalPayload::of::<T>`]: crate::message::SignalPayload::of
    pub fn relay_filter_on<T>(self, condition: Condition) -> RelayFilterBuilder {
        self.relay_filter_on_content(short_type_name::<T>(), condition)
    }

    fn check_identity_and_sources(&self) -> Result<(), BuildError> {
        if self.name.trim().is_empty() {
            return Err(BuildError::MissingField {
                target: "door",
                name: self.name.clone(),
                field: "name",
            });
        }
        if self.signals.is_empty() && self.doors.is_empty() {
            return Err(BuildError::NoSources {
                door: self.name.clone(),
            });
        }
        Ok(())
    }

    fn source_uids(&self) -> Vec<Uuid> {
        self.signals
            .iter()
            .map(|s| s.uid)
            .chain(self.doors.iter().map(|d| d.uid))
            .collect()
    }

    fn into_definition(self, kind: DoorKind) -> DoorDefinition {
        DoorDefinition {
            door_id: DoorId::new(self.uid, self.name),
            signal_source_ids: self.signals,
            door_source_ids: self.doors,
            retention: self.retention,
            kind,
        }
    }
}

/// Fixed-width generated names: `A`..`Z` up to 26 sources, then `AA`, `AB`...
///
/// Equal widths keep one generated name from being a substring of another.
/// The width is the fewest letters that can name `count` sources.
pub fn generated_variable_names(count: usize) -> Vec<String> {
    let mut width = 1;
    let mut capacity = 26usize;
    while capacity < count {
        width += 1;
        capacity = capacity.saturating_mul(26);
    }
    (0..count)
        .map(|mut idx| {
            let mut letters = vec![b'A'; width];
            for slot in letters.iter_mut().rev() {
                *slot = b'A' + (idx % 26) as u8;
                idx /= 26;
            }
            letters.into_iter().map(char::from).collect()
        })
        .collect()
}

// =============================================================================
// Logical Aggregator
// =============================================================================

#[derive(Debug, Clone)]
pub struct LogicalDoorBuilder {
    door: DoorBuilder,
    bindings: Vec<(String, Uuid)>,
    use_this: bool,
    formula: Option<String>,
    interval: Option<Duration>,
    window_mode: WindowMode,
}

impl LogicalDoorBuilder {
    pub fn active_window_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn window_mode(mut self, mode: WindowMode) -> Self {
        self.window_mode = mode;
        self
    }

    /// Bind `this` to the door's own output ("stimulated within interval").
    pub fn use_variable_this(mut self) -> Self {
        self.use_this = true;
        self
    }

    pub fn assign_variable_name(mut self, name: impl Into<String>, source: impl Into<SourceId>) -> Self {
        self.bindings.push((name.into(), source.into().uid()));
        self
    }

    pub fn formula(mut self, formula: impl Into<String>) -> Self {
        self.formula = Some(formula.into());
        self
    }

    pub fn build(self) -> Result<DoorDefinition, BuildError> {
        let door_name = self.door.name.clone();
        let missing = |field: &'static str| BuildError::MissingField {
            target: "door",
            name: door_name.clone(),
            field,
        };

        self.door.check_identity_and_sources()?;
        let interval = self.interval.ok_or_else(|| missing("interval"))?;
        let formula = self
            .formula
            .clone()
            .filter(|f| !f.trim().is_empty())
            .ok_or_else(|| missing("formula"))?;

        let variable_names = self.checked_bindings()?;

        formula::compile(&formula, variable_names.keys()).map_err(|source| BuildError::Formula {
            door: door_name.clone(),
            formula: formula.clone(),
            source,
        })?;

        let kind = DoorKind::LogicalAggregator(LogicalAggregatorDoor {
            logical_formula: formula,
            variable_names,
            use_current_door_status: self.use_this,
            interval,
            window_mode: self.window_mode,
        });
        Ok(self.door.into_definition(kind))
    }

    fn checked_bindings(&self) -> Result<BTreeMap<String, Uuid>, BuildError> {
        let door = &self.door.name;
        let sources = self.door.source_uids();

        let mut names: BTreeMap<String, Uuid> = BTreeMap::new();
        let mut bound: BTreeSet<Uuid> = BTreeSet::new();

        for (variable, uid) in &self.bindings {
            check_variable_name(door, variable)?;
            if !sources.contains(uid) {
                return Err(BuildError::UnknownVariableSource {
                    door: door.clone(),
                    variable: variable.clone(),
                    source_uid: *uid,
                });
            }
            if names.insert(variable.clone(), *uid).is_some() {
                return Err(BuildError::DuplicateVariable {
                    door: door.clone(),
                    variable: variable.clone(),
                });
            }
            bound.insert(*uid);
        }

        if self.bindings.len() != sources.len() || bound.len() != sources.len() {
            return Err(BuildError::VariableNamesMisaligned {
                door: door.clone(),
                sources: sources.len(),
                variables: self.bindings.len(),
            });
        }

        if self.use_this {
            names.insert(THIS_VARIABLE.to_string(), self.door.uid);
        }
        Ok(names)
    }
}

fn check_variable_name(door: &str, variable: &str) -> Result<(), BuildError> {
    let invalid = |reason: &'static str| BuildError::InvalidVariableName {
        door: door.to_string(),
        variable: variable.to_string(),
        reason,
    };

    if variable == THIS_VARIABLE {
        return Err(invalid("'this' is reserved for the door's own status"));
    }
    if variable.is_empty() || !variable.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(invalid("only ASCII letters are allowed"));
    }
    Ok(())
}

// =============================================================================
// Relay Filter
// =============================================================================

#[derive(Debug, Clone)]
pub struct RelayFilterBuilder {
    door: DoorBuilder,
    filter: FilterCondition,
    dont_relay_signal_content: bool,
}

impl RelayFilterBuilder {
    /// Forward matching messages without their payload.
    pub fn dont_relay_signal_content(mut self) -> Self {
        self.dont_relay_signal_content = true;
        self
    }

    pub fn build(self) -> Result<DoorDefinition, BuildError> {
        self.door.check_identity_and_sources()?;

        if let Some(carry_type) = &self.filter.carry_type {
            if carry_type.trim().is_empty() {
                return Err(BuildError::MissingField {
                    target: "door",
                    name: self.door.name.clone(),
                    field: "carry_type",
                });
            }
        }

        self.filter
            .condition
            .validate()
            .map_err(|source| BuildError::Condition {
                door: self.door.name.clone(),
                source,
            })?;

        let kind = DoorKind::RelayFilter(RelayFilterDoor {
            filter_condition: self.filter,
            dont_relay_signal_content: self.dont_relay_signal_content,
        });
        Ok(self.door.into_definition(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{CompareOp, MemberRoot, Operand};
    use crate::formula::FormulaError;

    fn signals(names: &[&str]) -> Vec<SignalDefinition> {
        names
            .iter()
            .map(|n| Signal::create(*n).build().unwrap())
            .collect()
    }

    #[test]
    fn test_signal_builder() {
        let parent = Signal::create("parent").build().unwrap();
        let uid = Uuid::new_v4();
        let child = Signal::create("child")
            .fix_uid(uid)
            .parent(parent.signal_id.clone())
            .group("grp")
            .build()
            .unwrap();

        assert_eq!(child.uid(), uid);
        assert_eq!(child.parent_signal_id, Some(parent.signal_id));
        assert_eq!(child.group_name.as_deref(), Some("grp"));
        assert!(matches!(
            Signal::create(" ").build(),
            Err(BuildError::MissingField { field: "name", .. })
        ));
    }

    #[test]
    fn test_default_operators_build_letter_formulas() {
        let sigs = signals(&["signal-a", "signal-b", "signal-c"]);

        for (op, expected) in [
            (LogicOperator::And, "A & B & C"),
            (LogicOperator::Or, "A | B | C"),
            (LogicOperator::ExclusiveOr, "A ^ B ^ C"),
        ] {
            let def = Door::create("door")
                .listen_signals(sigs.iter().map(|s| s.signal_id.clone()))
                .use_logical_aggregator(op, Some(Duration::from_secs(2)))
                .build()
                .unwrap();

            let logical = def.as_logical().unwrap();
            assert_eq!(logical.logical_formula, expected);
            assert!(!logical.use_current_door_status);
            assert_eq!(logical.interval, Duration::from_secs(2));
            assert_eq!(logical.variable_names.len(), 3);
            assert_eq!(logical.variable_names["A"], sigs[0].uid());
            assert_eq!(logical.variable_names["B"], sigs[1].uid());
            assert_eq!(logical.variable_names["C"], sigs[2].uid());
        }
    }

    #[test]
    fn test_default_interval_and_doors_after_signals() {
        let sigs = signals(&["s"]);
        let upstream = Door::create("upstream").door_id();

        let def = Door::create("door")
            .listen_door(upstream.clone())
            .listen_signal(sigs[0].signal_id.clone())
            .use_logical_aggregator(LogicOperator::And, None)
            .build()
            .unwrap();

        let logical = def.as_logical().unwrap();
        assert_eq!(logical.interval, DEFAULT_AGGREGATOR_INTERVAL);
        assert_eq!(logical.variable_names["A"], sigs[0].uid());
        assert_eq!(logical.variable_names["B"], upstream.uid);
    }

    #[test]
    fn test_use_variable_this() {
        let sigs = signals(&["a", "b", "c"]);
        let door_uid = Uuid::new_v4();

        let def = Door::create("door")
            .fix_uid(door_uid)
            .listen_signals(sigs.iter().map(|s| s.signal_id.clone()))
            .logical_aggregator()
            .active_window_interval(Duration::from_secs(1))
            .assign_variable_name("A", sigs[0].signal_id.clone())
            .assign_variable_name("B", sigs[1].signal_id.clone())
            .assign_variable_name("C", sigs[2].signal_id.clone())
            .use_variable_this()
            .formula("A ^ B & C | !this")
            .build()
            .unwrap();

        let logical = def.as_logical().unwrap();
        assert!(logical.use_current_door_status);
        assert_eq!(logical.variable_names[THIS_VARIABLE], door_uid);
        assert_eq!(logical.variable_names.len(), 4);
        assert_eq!(def.uid(), door_uid);
    }

    #[test]
    fn test_once_per_interval_adds_this() {
        let sigs = signals(&["a", "b"]);
        let def = Door::create("door")
            .listen_signals(sigs.iter().map(|s| s.signal_id.clone()))
            .use_logical_aggregator_once_per_interval(LogicOperator::And, None)
            .build()
            .unwrap();

        let logical = def.as_logical().unwrap();
        assert_eq!(logical.logical_formula, "(A & B) & !this");
        assert!(logical.use_current_door_status);
    }

    #[test]
    fn test_relay_is_fast_or() {
        let sigs = signals(&["a", "b"]);
        let def = Door::create("door")
            .listen_signals(sigs.iter().map(|s| s.signal_id.clone()))
            .relay()
            .build()
            .unwrap();

        let logical = def.as_logical().unwrap();
        assert_eq!(logical.logical_formula, "A | B");
        assert_eq!(logical.interval, RELAY_INTERVAL);
    }

    #[test]
    fn test_missing_interval_rejected() {
        let sigs = signals(&["a"]);
        let err = Door::create("door")
            .listen_signal(sigs[0].signal_id.clone())
            .logical_aggregator()
            .assign_variable_name("A", sigs[0].signal_id.clone())
            .formula("A")
            .build()
            .unwrap_err();

        assert!(matches!(err, BuildError::MissingField { field: "interval", .. }));
    }

    #[test]
    fn test_formula_missing_declared_variable_rejected() {
        let sigs = signals(&["a", "b"]);
        let err = Door::create("door")
            .listen_signals(sigs.iter().map(|s| s.signal_id.clone()))
            .logical_aggregator()
            .active_window_interval(Duration::from_secs(1))
            .assign_variable_name("A", sigs[0].signal_id.clone())
            .assign_variable_name("B", sigs[1].signal_id.clone())
            .formula("A")
            .build()
            .unwrap_err();

        match err {
            BuildError::Formula { door, source, .. } => {
                assert_eq!(door, "door");
                assert!(matches!(source, FormulaError::VariableMissingFromFormula { ref missing, .. } if missing == &vec!["B".to_string()]));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_binding_errors() {
        let sigs = signals(&["a", "b"]);
        let base = Door::create("door")
            .listen_signals(sigs.iter().map(|s| s.signal_id.clone()))
            .logical_aggregator()
            .active_window_interval(Duration::from_secs(1))
            .formula("A & B");

        let unbound = base
            .clone()
            .assign_variable_name("A", sigs[0].signal_id.clone())
            .build()
            .unwrap_err();
        assert!(matches!(
            unbound,
            BuildError::VariableNamesMisaligned { sources: 2, variables: 1, .. }
        ));

        let twice = base
            .clone()
            .assign_variable_name("A", sigs[0].signal_id.clone())
            .assign_variable_name("B", sigs[0].signal_id.clone())
            .build()
            .unwrap_err();
        assert!(matches!(twice, BuildError::VariableNamesMisaligned { .. }));

        let duplicate = base
            .clone()
            .assign_variable_name("A", sigs[0].signal_id.clone())
            .assign_variable_name("A", sigs[1].signal_id.clone())
            .build()
            .unwrap_err();
        assert!(matches!(duplicate, BuildError::DuplicateVariable { .. }));

        let stranger = Signal::create("stranger").build().unwrap();
        let unknown = base
            .clone()
            .assign_variable_name("A", stranger.signal_id.clone())
            .build()
            .unwrap_err();
        assert!(matches!(unknown, BuildError::UnknownVariableSource { .. }));

        let invalid = base
            .clone()
            .assign_variable_name("A1", sigs[0].signal_id.clone())
            .build()
            .unwrap_err();
        assert!(matches!(invalid, BuildError::InvalidVariableName { .. }));

        let reserved = base
            .assign_variable_name("this", sigs[0].signal_id.clone())
            .build()
            .unwrap_err();
        assert!(matches!(reserved, BuildError::InvalidVariableName { .. }));
    }

    #[test]
    fn test_this_without_use_variable_this_rejected() {
        let sigs = signals(&["a"]);
        let err = Door::create("door")
            .listen_signal(sigs[0].signal_id.clone())
            .logical_aggregator()
            .active_window_interval(Duration::from_secs(1))
            .assign_variable_name("A", sigs[0].signal_id.clone())
            .formula("A & !this")
            .build()
            .unwrap_err();

        assert!(matches!(
            err,
            BuildError::Formula { source: FormulaError::UnknownVariable { .. }, .. }
        ));
    }

    #[test]
    fn test_no_sources_rejected() {
        let err = Door::create("lonely")
            .use_logical_aggregator(LogicOperator::And, None)
            .build()
            .unwrap_err();
        assert_eq!(err, BuildError::NoSources { door: "lonely".into() });
    }

    #[test]
    fn test_relay_filter_builder() {
        let sigs = signals(&["a"]);
        let condition = Condition::compare(
            Operand::payload("value"),
            CompareOp::Gt,
            Operand::constant(&3).unwrap(),
        );

        let def = Door::create("filter")
            .listen_signal(sigs[0].signal_id.clone())
            .relay_filter_on::<u32>(condition.clone())
            .dont_relay_signal_content()
            .build()
            .unwrap();

        let relay = def.as_relay().unwrap();
        assert!(relay.dont_relay_signal_content);
        assert_eq!(relay.filter_condition.carry_type.as_deref(), Some("u32"));
        assert_eq!(relay.filter_condition.condition, condition);
    }

    #[test]
    fn test_relay_filter_rejects_unsupported_member() {
        let sigs = signals(&["a"]);
        let hand_built = Condition::truthy(Operand::Member {
            root: MemberRoot::Message,
            path: vec!["from".into(), "secret".into()],
        });

        let err = Door::create("filter")
            .listen_signal(sigs[0].signal_id.clone())
            .relay_filter(hand_built)
            .build()
            .unwrap_err();

        assert!(matches!(err, BuildError::Condition { .. }));
    }

    #[test]
    fn test_generated_names_are_fixed_width() {
        assert_eq!(generated_variable_names(3), vec!["A", "B", "C"]);

        let many = generated_variable_names(30);
        assert_eq!(many[0], "AA");
        assert_eq!(many[25], "AZ");
        assert_eq!(many[26], "BA");
        assert!(many.iter().all(|n| n.len() == 2));
    }

    #[test]
    fn test_generated_name_width_is_minimal() {
        let alphabet = generated_variable_names(26);
        assert_eq!(alphabet.first().map(String::as_str), Some("A"));
        assert_eq!(alphabet.last().map(String::as_str), Some("Z"));

        assert!(generated_variable_names(676).iter().all(|n| n.len() == 2));
        let thousand = generated_variable_names(1000);
        assert!(thousand.iter().all(|n| n.len() == 3));
        assert_eq!(thousand[999], "BML");
    }
}
