//! Signaling protocol messages.
//!
//! Every frame on a client session is a single JSON object with a string
//! `type`. Client frames are kept as loose JSON maps so payload fields the
//! relay does not understand (`sdp`, `candidate`, `filter`, ...) pass through
//! untouched. Relay-originated frames are typed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::address::PeerAddress;

/// Message type discriminator for client frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    Login,
    Call,
    Offer,
    Answer,
    IceCandidate,
    Signal,
    Candidate,
    Filter,
}

impl MessageKind {
    pub fn from_type(value: &str) -> Option<Self> {
        match value {
            "login" => Some(Self::Login),
            "call" => Some(Self::Call),
            "offer" => Some(Self::Offer),
            "answer" => Some(Self::Answer),
            "ice-candidate" => Some(Self::IceCandidate),
            "signal" => Some(Self::Signal),
            "candidate" => Some(Self::Candidate),
            "filter" => Some(Self::Filter),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Call => "call",
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "ice-candidate",
            Self::Signal => "signal",
            Self::Candidate => "candidate",
            Self::Filter => "filter",
        }
    }

    /// Kinds forwarded peer to peer as envelopes. `login` and `call` are
    /// answered by the relay itself and never travel as envelopes.
    pub fn is_relayed(&self) -> bool {
        !matches!(self, Self::Login | Self::Call)
    }

    /// Payload field a relayed message of this kind must carry, beyond `target`.
    pub fn required_field(&self) -> Option<&'static str> {
        match self {
            Self::Signal => Some("signal"),
            Self::Candidate => Some("candidate"),
            _ => None,
        }
    }
}

// ── Client frames ─────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    NotJson(#[from] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotObject,
    #[error("frame has no string `type`")]
    MissingType,
}

/// A parsed client frame: its `type` plus every field as sent.
#[derive(Debug, Clone)]
pub struct ClientFrame {
    type_name: String,
    fields: Map<String, Value>,
}

impl ClientFrame {
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let fields = match serde_json::from_str::<Value>(text)? {
            Value::Object(map) => map,
            _ => return Err(FrameError::NotObject),
        };
        let type_name = fields
            .get("type")
            .and_then(Value::as_str)
            .ok_or(FrameError::MissingType)?
            .to_string();
        Ok(Self { type_name, fields })
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// `None` for types this relay does not handle.
    pub fn kind(&self) -> Option<MessageKind> {
        MessageKind::from_type(&self.type_name)
    }

    /// A non-empty string field.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    /// Present and not null.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.get(name).is_some_and(|v| !v.is_null())
    }

    /// The routing target. `wallet` is accepted for clients that still
    /// address signals that way.
    pub fn target(&self) -> Option<PeerAddress> {
        self.str_field("target")
            .or_else(|| self.str_field("wallet"))
            .and_then(|raw| PeerAddress::parse(raw).ok())
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

// ── Relay envelope ────────────────────────────────────────────────────────────

/// `{type, from, ...payload, target}`, forwarded verbatim to the target,
/// locally or across the overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelayEnvelope(Map<String, Value>);

impl RelayEnvelope {
    /// Build an envelope from a client frame. The relay owns `type`, `from`
    /// and `target`; every other field is copied as sent.
    pub fn build(
        kind: MessageKind,
        from: &PeerAddress,
        payload: &Map<String, Value>,
        target: &PeerAddress,
    ) -> Self {
        let mut map = Map::with_capacity(payload.len() + 2);
        map.insert("type".into(), Value::from(kind.as_str()));
        map.insert("from".into(), Value::from(from.as_str()));
        for (key, value) in payload {
            if matches!(key.as_str(), "type" | "from" | "target") {
                continue;
            }
            map.insert(key.clone(), value.clone());
        }
        map.insert("target".into(), Value::from(target.as_str()));
        Self(map)
    }

    pub fn type_name(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    pub fn from_address(&self) -> Option<PeerAddress> {
        self.0
            .get("from")
            .and_then(Value::as_str)
            .and_then(|s| PeerAddress::parse(s).ok())
    }

    pub fn target(&self) -> Option<PeerAddress> {
        self.0
            .get("target")
            .and_then(Value::as_str)
            .and_then(|s| PeerAddress::parse(s).ok())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.0).expect("envelope serialization failed")
    }
}

// ── Relay-originated frames ───────────────────────────────────────────────────

/// Errors reported back to a client as `{"type":"error","error":...}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Missing address or signature")]
    MissingCredentials,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Not logged in")]
    NotLoggedIn,
    #[error("Missing target")]
    MissingTarget,
    #[error("Missing {0}")]
    MissingField(&'static str),
}

/// Frames the relay itself sends to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Per-connection login challenge (nonce mode only).
    Challenge { challenge: String },
    LoginSuccess { address: PeerAddress },
    CallAck { target: PeerAddress },
    IncomingCall { from: PeerAddress },
    Error { error: String },
}

impl ServerMessage {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("server message serialization failed")
    }
}

impl From<ProtocolError> for ServerMessage {
    fn from(e: ProtocolError) -> Self {
        Self::Error {
            error: e.to_string(),
        }
    }
}
