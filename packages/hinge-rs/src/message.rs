//! Event instances and their provenance.
//!
//! A [`SignalMessage`] is immutable once fired. It is identified by its
//! `uid` and ordered by `emitted_at`; delivery order carries no meaning.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::SourceId;

/// Typed content carried by a message.
///
/// `carry_type` names the payload's type so relay filters declared over a
/// specific content type can skip foreign payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalPayload {
    pub carry_type: String,
    pub data: serde_json::Value,
}

impl SignalPayload {
    pub fn new(carry_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            carry_type: carry_type.into(),
            data,
        }
    }

    /// Serialize `value`, naming the payload after the Rust type.
    pub fn of<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            carry_type: short_type_name::<T>().to_string(),
            data: serde_json::to_value(value)?,
        })
    }

    /// Deserialize the payload back into `T`.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.clone())
    }
}

/// Last path segment of a type name (`my_crate::Foo<Bar>` -> `Foo<Bar>`).
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let generic_start = full.find('<').unwrap_or(full.len());
    match full[..generic_start].rfind("::") {
        Some(idx) => &full[idx + 2..],
        None => full,
    }
}

/// Provenance of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSource {
    /// Uid of the message this source describes.
    pub signal_uid: Uuid,
    /// Uid of the signal or door definition that emitted it.
    pub source_definition_uid: Uuid,
    pub source_name: String,
    pub is_door: bool,
    pub emitted_at: DateTime<Utc>,
    /// Identity of the producer (trigger, sequence stage, door worker...).
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Sources of the messages responsible for a door stimulation.
    #[serde(default)]
    pub origins: Vec<SignalSource>,
    #[serde(default)]
    pub payload: Option<SignalPayload>,
}

impl SignalSource {
    pub fn new(
        signal_uid: Uuid,
        source: &SourceId,
        emitted_at: DateTime<Utc>,
        payload: Option<SignalPayload>,
    ) -> Self {
        Self {
            signal_uid,
            source_definition_uid: source.uid(),
            source_name: source.name().to_string(),
            is_door: source.is_door(),
            emitted_at,
            sender: None,
            metadata: BTreeMap::new(),
            origins: Vec::new(),
            payload,
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_origins(mut self, origins: Vec<SignalSource>) -> Self {
        self.origins = origins;
        self
    }
}

/// The event instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalMessage {
    pub uid: Uuid,
    pub emitted_at: DateTime<Utc>,
    pub from: SignalSource,
}

impl SignalMessage {
    /// Build a fresh message emitted by `source` at `emitted_at`.
    pub fn new(source: &SourceId, emitted_at: DateTime<Utc>, payload: Option<SignalPayload>) -> Self {
        let uid = Uuid::new_v4();
        Self {
            uid,
            emitted_at,
            from: SignalSource::new(uid, source, emitted_at, payload),
        }
    }

    /// Wrap an already-built source.
    pub fn from_source(from: SignalSource) -> Self {
        Self {
            uid: from.signal_uid,
            emitted_at: from.emitted_at,
            from,
        }
    }

    /// Uid of the signal or door this message came from.
    pub fn source_uid(&self) -> Uuid {
        self.from.source_definition_uid
    }

    pub fn payload(&self) -> Option<&SignalPayload> {
        self.from.payload.as_ref()
    }

    /// Copy of this message with its content dropped.
    ///
    /// Identity and metadata are preserved.
    pub fn without_content(&self) -> Self {
        let mut stripped = self.clone();
        stripped.from.payload = None;
        stripped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SignalId;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct PriceTick {
        pair: String,
        value: f64,
    }

    #[test]
    fn test_payload_of_names_type() {
        let payload = SignalPayload::of(&PriceTick {
            pair: "EURUSD".into(),
            value: 1.08,
        })
        .unwrap();

        assert_eq!(payload.carry_type, "PriceTick");
        assert_eq!(payload.data["pair"], "EURUSD");

        let decoded: PriceTick = payload.decode().unwrap();
        assert_eq!(decoded.value, 1.08);
    }

    #[test]
    fn test_short_type_name_strips_generics_path() {
        assert_eq!(short_type_name::<Vec<String>>(), "Vec<alloc::string::String>");
        assert_eq!(short_type_name::<u32>(), "u32");
    }

    #[test]
    fn test_message_uid_matches_source_uid() {
        let signal = SourceId::from(SignalId::new(Uuid::new_v4(), "sig"));
        let msg = SignalMessage::new(&signal, Utc::now(), None);

        assert_eq!(msg.uid, msg.from.signal_uid);
        assert_eq!(msg.source_uid(), signal.uid());
        assert_eq!(msg.emitted_at, msg.from.emitted_at);
    }

    #[test]
    fn test_without_content_keeps_identity() {
        let signal = SourceId::from(SignalId::new(Uuid::new_v4(), "sig"));
        let payload = SignalPayload::new("Flag", serde_json::json!(true));
        let msg = SignalMessage {
            uid: Uuid::new_v4(),
            emitted_at: Utc::now(),
            from: SignalSource::new(Uuid::new_v4(), &signal, Utc::now(), Some(payload))
                .with_metadata("tenant", "t1"),
        };

        let stripped = msg.without_content();
        assert!(stripped.payload().is_none());
        assert_eq!(stripped.uid, msg.uid);
        assert_eq!(stripped.from.metadata.get("tenant").map(String::as_str), Some("t1"));
    }
}
