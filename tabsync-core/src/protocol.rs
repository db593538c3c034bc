//! Envelope wire protocol for replica synchronization.
//!
//! Wire format (JSON, one object per broadcast):
//! ```text
//! ┌────────────────────┬──────────────────────────────┐
//! │ "kind": string     │ "payload": any (per kind)    │
//! └────────────────────┴──────────────────────────────┘
//! ```
//!
//! No schema version and no authentication. Peers that send a kind we do
//! not know, or a payload of the wrong shape, are ignored rather than
//! rejected loudly: decoding returns a [`ProtocolError`] which the router
//! logs and drops.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{ChatEntry, Counter, Peer, Timestamp};

/// Envelope kinds, with their wire names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    PeerJoin,
    PeerLeave,
    PeerUpdate,
    Typing,
    Message,
    DeleteMessage,
    CounterUpdate,
    CounterReset,
}

impl EnvelopeKind {
    pub const ALL: [EnvelopeKind; 8] = [
        EnvelopeKind::PeerJoin,
        EnvelopeKind::PeerLeave,
        EnvelopeKind::PeerUpdate,
        EnvelopeKind::Typing,
        EnvelopeKind::Message,
        EnvelopeKind::DeleteMessage,
        EnvelopeKind::CounterUpdate,
        EnvelopeKind::CounterReset,
    ];

    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PeerJoin => "peer-join",
            Self::PeerLeave => "peer-leave",
            Self::PeerUpdate => "peer-update",
            Self::Typing => "typing",
            Self::Message => "message",
            Self::DeleteMessage => "delete-message",
            Self::CounterUpdate => "counter-update",
            Self::CounterReset => "counter-reset",
        }
    }

    /// Kind for a wire name, if known.
    pub fn parse(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == kind)
    }
}

impl std::fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `peer-leave` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRef {
    pub id: String,
}

/// `typing` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingSignal {
    pub peer_id: String,
    pub peer_name: String,
    pub is_composing: bool,
}

/// `counter-update` payload: an absolute snapshot plus the writer's id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterUpdate {
    pub value: i64,
    pub last_writer_name: String,
    pub last_writer_at: Timestamp,
    pub writer_id: String,
}

impl CounterUpdate {
    /// Payload carrying `counter` as written by `writer_id`.
    pub fn from_counter(counter: &Counter, writer_id: impl Into<String>) -> Self {
        Self {
            value: counter.value,
            last_writer_name: counter.last_writer_name.clone(),
            last_writer_at: counter.last_writer_at,
            writer_id: writer_id.into(),
        }
    }

    /// The register state this update carries.
    pub fn counter(&self) -> Counter {
        Counter {
            value: self.value,
            last_writer_name: self.last_writer_name.clone(),
            last_writer_at: self.last_writer_at,
        }
    }
}

/// One transport message, validated.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    PeerJoin(Peer),
    PeerLeave(PeerRef),
    PeerUpdate(Peer),
    Typing(TypingSignal),
    Message(ChatEntry),
    DeleteMessage(String),
    CounterUpdate(CounterUpdate),
    CounterReset,
}

/// Untyped shape shared by every envelope on the wire.
#[derive(Debug, Serialize, Deserialize)]
struct WireEnvelope {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
}

impl Envelope {
    /// Kind tag of this envelope.
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Self::PeerJoin(_) => EnvelopeKind::PeerJoin,
            Self::PeerLeave(_) => EnvelopeKind::PeerLeave,
            Self::PeerUpdate(_) => EnvelopeKind::PeerUpdate,
            Self::Typing(_) => EnvelopeKind::Typing,
            Self::Message(_) => EnvelopeKind::Message,
            Self::DeleteMessage(_) => EnvelopeKind::DeleteMessage,
            Self::CounterUpdate(_) => EnvelopeKind::CounterUpdate,
            Self::CounterReset => EnvelopeKind::CounterReset,
        }
    }

    /// Create a peer-leave announcement.
    pub fn peer_leave(id: impl Into<String>) -> Self {
        Self::PeerLeave(PeerRef { id: id.into() })
    }

    /// Create a typing signal for `peer`.
    pub fn typing(peer: &Peer, is_composing: bool) -> Self {
        Self::Typing(TypingSignal {
            peer_id: peer.id.clone(),
            peer_name: peer.display_name.clone(),
            is_composing,
        })
    }

    fn payload_value(&self) -> Result<Value, ProtocolError> {
        let value = match self {
            Self::PeerJoin(peer) | Self::PeerUpdate(peer) => serde_json::to_value(peer)?,
            Self::PeerLeave(peer_ref) => serde_json::to_value(peer_ref)?,
            Self::Typing(signal) => serde_json::to_value(signal)?,
            Self::Message(entry) => serde_json::to_value(entry)?,
            Self::DeleteMessage(id) => Value::String(id.clone()),
            Self::CounterUpdate(update) => serde_json::to_value(update)?,
            Self::CounterReset => Value::Null,
        };
        Ok(value)
    }

    /// Serialize to the JSON wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let wire = WireEnvelope {
            kind: Some(self.kind().as_str().to_string()),
            payload: Some(self.payload_value()?),
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    /// Deserialize from the JSON wire format, validating the payload shape
    /// for the declared kind.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let wire: WireEnvelope = serde_json::from_slice(bytes)?;
        let kind_name = wire.kind.ok_or(ProtocolError::MissingKind)?;
        let kind = EnvelopeKind::parse(&kind_name)
            .ok_or_else(|| ProtocolError::UnknownKind(kind_name.clone()))?;

        if kind == EnvelopeKind::CounterReset {
            return Ok(Self::CounterReset);
        }

        let payload = match wire.payload {
            None | Some(Value::Null) => return Err(ProtocolError::MissingPayload(kind)),
            Some(payload) => payload,
        };

        let invalid = |e: serde_json::Error| ProtocolError::InvalidPayload {
            kind,
            reason: e.to_string(),
        };

        let envelope = match kind {
            EnvelopeKind::PeerJoin => Self::PeerJoin(serde_json::from_value(payload).map_err(invalid)?),
            EnvelopeKind::PeerLeave => Self::PeerLeave(serde_json::from_value(payload).map_err(invalid)?),
            EnvelopeKind::PeerUpdate => Self::PeerUpdate(serde_json::from_value(payload).map_err(invalid)?),
            EnvelopeKind::Typing => Self::Typing(serde_json::from_value(payload).map_err(invalid)?),
            EnvelopeKind::Message => Self::Message(serde_json::from_value(payload).map_err(invalid)?),
            EnvelopeKind::DeleteMessage => {
                Self::DeleteMessage(serde_json::from_value(payload).map_err(invalid)?)
            }
            EnvelopeKind::CounterUpdate => {
                Self::CounterUpdate(serde_json::from_value(payload).map_err(invalid)?)
            }
            EnvelopeKind::CounterReset => Self::CounterReset,
        };
        Ok(envelope)
    }
}

/// Protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Envelope has no kind")]
    MissingKind,
    #[error("Unknown envelope kind: {0}")]
    UnknownKind(String),
    #[error("Envelope '{0}' has no payload")]
    MissingPayload(EnvelopeKind),
    #[error("Invalid payload for '{kind}': {reason}")]
    InvalidPayload { kind: EnvelopeKind, reason: String },
}
