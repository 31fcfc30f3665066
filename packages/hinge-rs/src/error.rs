//! Structured error types for hinge.
//!
//! `BuildError` is raised synchronously while a definition is built; a door
//! that fails to build is never stored or activated. `HingeError` is what
//! runtime operations (activation, firing) return.
//!
//! # The Error Boundary Rule
//!
//! > **No `anyhow::Error` crosses the public API except inside
//! > [`StoreError::Backend`].**
//!
//! Storage backends and configuration loading use `anyhow` internally.
//! Everything a caller might match on is a typed variant here.
//!
//! # Example
//!
//! ```ignore
//! match Door::create("gate").listen_signal(a).logical_aggregator().build() {
//!     Err(BuildError::MissingField { field: "interval", .. }) => { /* ... */ }
//!     Err(BuildError::Formula { formula, source, .. }) => {
//!         eprintln!("fix '{}': {}", formula, source);
//!     }
//!     _ => {}
//! }
//! ```

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

use crate::condition::ConditionError;
use crate::formula::FormulaError;
use crate::persistence::StoreError;

// =============================================================================
// Build Errors
// =============================================================================

/// Rejected definition. Every variant names the door (or signal) involved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("{target} '{name}' is missing mandatory field '{field}'")]
    MissingField {
        target: &'static str,
        name: String,
        field: &'static str,
    },

    #[error("door '{door}' does not listen to any signal or door")]
    NoSources { door: String },

    /// Each declared source needs exactly one variable.
    #[error(
        "door '{door}' declares {sources} source(s) but {variables} variable binding(s); \
         each source needs exactly one variable"
    )]
    VariableNamesMisaligned {
        door: String,
        sources: usize,
        variables: usize,
    },

    #[error("door '{door}' binds variable '{variable}' more than once")]
    DuplicateVariable { door: String, variable: String },

    #[error("door '{door}' cannot use '{variable}' as a variable name: {reason}")]
    InvalidVariableName {
        door: String,
        variable: String,
        reason: &'static str,
    },

    #[error("door '{door}' binds variable '{variable}' to {source_uid}, which it does not listen to")]
    UnknownVariableSource {
        door: String,
        variable: String,
        source_uid: Uuid,
    },

    #[error("door '{door}' has an invalid formula '{formula}': {source}")]
    Formula {
        door: String,
        formula: String,
        #[source]
        source: FormulaError,
    },

    #[error("door '{door}' has an unsupported relay condition: {source}")]
    Condition {
        door: String,
        #[source]
        source: ConditionError,
    },
}

// =============================================================================
// Runtime Errors
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionKind {
    Signal,
    Door,
}

impl fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefinitionKind::Signal => write!(f, "signal"),
            DefinitionKind::Door => write!(f, "door"),
        }
    }
}

/// Failure reported by a [`SignalService`](crate::fanout::SignalService).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("delivery service unavailable: {0}")]
    Unavailable(String),

    #[error("subscription rejected: {0}")]
    Rejected(String),
}

impl DeliveryError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::Unavailable(_))
    }
}

#[derive(Debug, Error)]
pub enum HingeError {
    #[error(transparent)]
    Build(#[from] BuildError),

    /// A referenced signal or door has no definition.
    #[error("no {kind} definition found for {uid}")]
    MissingDefinition { kind: DefinitionKind, uid: Uuid },

    /// Subscribing a door to one of its sources failed for good.
    #[error("door {door} could not subscribe to {source_uid} after {attempts} attempt(s): {reason}")]
    Subscription {
        door: Uuid,
        source_uid: Uuid,
        attempts: usize,
        reason: DeliveryError,
    },

    #[error("door {door} is unavailable: {reason}")]
    DoorUnavailable { door: Uuid, reason: &'static str },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("payload could not be serialized: {0}")]
    Payload(#[from] serde_json::Error),
}
