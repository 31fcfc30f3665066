//! Stable addresses for signals and doors.
//!
//! Both identities are `(uid, name)` pairs. The uid is the address used by
//! the fan-out and by door variable bindings; the name is carried for
//! diagnostics and for the builder's default variable naming.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Address of a signal stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignalId {
    pub uid: Uuid,
    pub name: String,
}

impl SignalId {
    pub fn new(uid: Uuid, name: impl Into<String>) -> Self {
        Self {
            uid,
            name: name.into(),
        }
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "signal:{}({})", self.name, self.uid)
    }
}

/// Address of a door.
///
/// A door is itself a signal source once it stimulates, so a `DoorId` can be
/// listened to exactly like a [`SignalId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DoorId {
    pub uid: Uuid,
    pub name: String,
}

impl DoorId {
    pub fn new(uid: Uuid, name: impl Into<String>) -> Self {
        Self {
            uid,
            name: name.into(),
        }
    }
}

impl fmt::Display for DoorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "door:{}({})", self.name, self.uid)
    }
}

/// Either kind of source a door can listen to or a producer can fire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceId {
    Signal(SignalId),
    Door(DoorId),
}

impl SourceId {
    pub fn uid(&self) -> Uuid {
        match self {
            SourceId::Signal(id) => id.uid,
            SourceId::Door(id) => id.uid,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            SourceId::Signal(id) => &id.name,
            SourceId::Door(id) => &id.name,
        }
    }

    pub fn is_door(&self) -> bool {
        matches!(self, SourceId::Door(_))
    }
}

impl From<SignalId> for SourceId {
    fn from(id: SignalId) -> Self {
        SourceId::Signal(id)
    }
}

impl From<DoorId> for SourceId {
    fn from(id: DoorId) -> Self {
        SourceId::Door(id)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceId::Signal(id) => id.fmt(f),
            SourceId::Door(id) => id.fmt(f),
        }
    }
}
