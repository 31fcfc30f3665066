//! # Hinge
//!
//! Signal and door coordination: named **signals** carry typed payloads,
//! **doors** listen to signals (or other doors) and fire their own signal
//! when the pattern of arrivals says so.
//!
//! ## Core Concepts
//!
//! - [`SignalDefinition`] = a named event source, optionally relayed to a parent
//! - [`DoorDefinition`] = a listener that decides when to fire
//! - [`SignalMessage`] = one emitted event, with its provenance
//!
//! Two kinds of door exist:
//! - **Logical aggregator**: a boolean formula over the sources
//!   (`A & (B | !C)`), evaluated on every arrival or once per buffered
//!   window. `this` refers to the door's own output.
//! - **Relay filter**: forwards each arrival matching a condition, with or
//!   without its payload.
//!
//! ## Architecture
//!
//! ```text
//! SignalHub.fire(signal)
//!     │
//!     ▼ deliver()
//! SignalService (subscriptions) ─────────────► watch()
//!     │
//!     ▼ receive_signal()  (enqueue only)
//! DoorHandle ─► mailbox ─► worker
//!                            │
//!                            ├─► SignalStatus.push()    (ordered by emission)
//!                            ├─► DoorLogic decides      (formula / filter)
//!                            ├─► DoorStateStore.save()
//!                            └─► deliver(door) ───────► next doors
//! ```
//!
//! ## Key Invariants
//!
//! 1. **One worker per door** - all state changes are serialized by its mailbox
//! 2. **Emission order, not arrival order** - queues are sorted by `emitted_at`
//! 3. **Idempotent arrivals** - a redelivered message uid is ignored while retained
//! 4. **Bounded memory** - retention by count and age after every mutation
//! 5. **Validated definitions** - builders reject bad formulas and conditions
//!
//! ## Guarantees
//!
//! - **At-least-once delivery** between doors, made safe by (3)
//! - **Persisted door state** through [`DoorStateStore`], including open windows
//! - **Loud activation failures**: a door that cannot subscribe does not start
//!
//! ## Example
//!
//! ```ignore
//! use hinge::{Door, InMemoryDefinitionProvider, LogicOperator, Signal, SignalHub};
//!
//! let definitions = InMemoryDefinitionProvider::new();
//! let hub = SignalHub::builder()
//!     .with_provider(Arc::new(definitions.clone()))
//!     .build();
//!
//! let paid = Signal::create("order-paid").build()?;
//! let packed = Signal::create("order-packed").build()?;
//! let ship = Door::create("ready-to-ship")
//!     .listen_signal(paid.signal_id.clone())
//!     .listen_signal(packed.signal_id.clone())
//!     .use_logical_aggregator(LogicOperator::And, None)
//!     .build()?;
//!
//! definitions.upsert_signal(paid.clone());
//! definitions.upsert_signal(packed.clone());
//! definitions.upsert_door(ship.clone());
//! hub.activate_door(ship.uid()).await?;
//!
//! hub.fire(paid.uid(), None, None).await?;
//! hub.fire(packed.uid(), None, None).await?; // ready-to-ship fires
//! ```
//!
//! ## What This Is Not
//!
//! Hinge is **not**:
//! - A general expression language (formulas are `& | ^ !` over names)
//! - A transport (delivery goes through a pluggable [`SignalService`])
//! - A workflow engine
//!
//! Hinge **is**:
//! > A small, strongly-typed layer that turns streams of signals into
//! > decisions, one door at a time.

mod builder;
mod bus;
mod clock;
mod condition;
mod config;
mod definition;
mod door;
mod error;
mod fanout;
mod formula;
mod hub;
mod ids;
mod logical;
mod message;
mod persistence;
mod provider;
mod relay;
mod retention;
mod state;
mod status;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;


// Re-export builder surface
pub use builder::{
    generated_variable_names, Door, DoorBuilder, LogicalDoorBuilder, RelayFilterBuilder, Signal,
    SignalBuilder, DEFAULT_AGGREGATOR_INTERVAL, RELAY_INTERVAL,
};

// Re-export definitions and identities
pub use definition::{
    DoorDefinition, DoorKind, FilterCondition, LogicalAggregatorDoor, RelayFilterDoor,
    SignalDefinition, WindowMode, THIS_VARIABLE,
};
pub use ids::{DoorId, SignalId, SourceId};

// Re-export messages
pub use message::{short_type_name, SignalMessage, SignalPayload, SignalSource};

// Re-export formula and condition types
pub use condition::{CompareOp, Condition, ConditionError, Function, MemberRoot, Operand};
pub use formula::{compile, Evaluator, FormulaError, LogicOperator, MAX_FORMULA_NESTING};

// Re-export state types
pub use retention::{
    RetentionPolicy, DEFAULT_HISTORY_MAX_RETENTION, DEFAULT_NOT_CONSUMED_MAX_RETENTION,
    DEFAULT_RETENTION_MAX_DELAY,
};
pub use state::{DoorHandlerState, PendingWindow};
pub use status::SignalStatus;

// Re-export runtime types
pub use bus::SignalBus;
pub use door::{DoorHandle, DoorLifecycle, Receipt};
pub use fanout::{FanOut, SignalReceiver, SignalService};
pub use hub::{SignalHub, SignalHubBuilder, CORRELATION_METADATA_KEY};

// Re-export collaborator types
pub use clock::{Clock, SystemClock};
pub use persistence::{DoorStateStore, InMemoryDoorStateStore, Revision, StoreError};
pub use provider::{DefinitionChange, DefinitionProvider, InMemoryDefinitionProvider};

// Re-export configuration and errors
pub use config::HingeConfig;
pub use error::{BuildError, DefinitionKind, DeliveryError, HingeError};

// Re-export commonly used external types
pub use async_trait::async_trait;
