//! The wire envelope — the signed, typed unit of transmission on the bus.
//!
//! Envelopes are JSON on the wire. An envelope is immutable once signed:
//! the signature covers the semantically meaningful fields (sender,
//! recipient, kind, timestamp, payload), so any mutation after signing
//! invalidates it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Recipient value that addresses every subscribed agent.
///
/// `"*"` is only ever valid as a recipient, never as a sender.
pub const BROADCAST_RECIPIENT: &str = "*";

/// The different kinds of bus messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    /// Ask an agent to execute one of its capabilities.
    TaskRequest,
    /// Outcome of a task request (success or failure).
    TaskResponse,
    /// Broadcast advertising an agent's capability list.
    CapabilityAnnouncement,
    /// Ask an agent what it can do.
    CapabilityQuery,
    /// Reply to a capability query.
    CapabilityResponse,
    /// Unsolicited liveness/progress report.
    StatusUpdate,
    /// Out-of-band error report.
    Error,
}

impl std::fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EnvelopeKind::TaskRequest => "task_request",
            EnvelopeKind::TaskResponse => "task_response",
            EnvelopeKind::CapabilityAnnouncement => "capability_announcement",
            EnvelopeKind::CapabilityQuery => "capability_query",
            EnvelopeKind::CapabilityResponse => "capability_response",
            EnvelopeKind::StatusUpdate => "status_update",
            EnvelopeKind::Error => "error",
        };
        f.write_str(name)
    }
}

/// A bus message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique message ID.
    pub id: String,
    /// Sender agent ID. Always populated before the envelope leaves the bus.
    pub sender: String,
    /// Recipient agent ID, or [`BROADCAST_RECIPIENT`].
    pub recipient: String,
    /// Message kind.
    pub kind: EnvelopeKind,
    /// When the envelope was stamped by the sending bus (ISO-8601 on the wire).
    pub timestamp: DateTime<Utc>,
    /// Kind-specific payload.
    #[serde(default)]
    pub payload: Map<String, Value>,
    /// Whether the sender expects a response envelope.
    #[serde(rename = "requiresResponse", default)]
    pub requires_response: bool,
    /// Detached signature over the signing bytes, base64-encoded.
    /// `None` only during construction — always populated before publish.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Envelope {
    /// Create a new unsigned envelope with a fresh ID and timestamp.
    pub fn new(
        kind: EnvelopeKind,
        sender: impl Into<String>,
        recipient: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender: sender.into(),
            recipient: recipient.into(),
            kind,
            timestamp: Utc::now(),
            payload: Map::new(),
            requires_response: false,
            signature: None,
        }
    }

    /// Attach a payload, consuming and returning the envelope.
    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    /// Mark the envelope as expecting a response.
    pub fn expecting_response(mut self) -> Self {
        self.requires_response = true;
        self
    }

    /// Whether this envelope is addressed to every agent.
    pub fn is_broadcast(&self) -> bool {
        self.recipient == BROADCAST_RECIPIENT
    }

    /// Fetch a payload field.
    pub fn payload_field(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Fetch a payload field as a string slice.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// The canonical byte encoding the signature is computed over.
    ///
    /// Covers (sender, recipient, kind, timestamp, payload) and nothing
    /// else. `serde_json` maps are keyed by `BTreeMap`, so keys serialize
    /// in sorted order and the encoding is stable regardless of how the
    /// payload was assembled.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let canonical = serde_json::json!({
            "kind": self.kind,
            "payload": self.payload,
            "recipient": self.recipient,
            "sender": self.sender,
            "timestamp": self.timestamp,
        });
        serde_json::to_vec(&canonical)
    }

    /// Serialize the envelope for transmission.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse an envelope from raw transport bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut payload = Map::new();
        payload.insert("task_id".to_string(), Value::from("t-1"));
        payload.insert("task_type".to_string(), Value::from("add"));

        let env = Envelope::new(EnvelopeKind::TaskRequest, "agent-a", "agent-b")
            .with_payload(payload)
            .expecting_response();

        let bytes = env.encode().unwrap();
        let decoded = Envelope::decode(&bytes).unwrap();
        assert_eq!(decoded.id, env.id);
        assert_eq!(decoded.kind, EnvelopeKind::TaskRequest);
        assert_eq!(decoded.timestamp, env.timestamp);
        assert!(decoded.requires_response);
        assert_eq!(decoded.payload_str("task_type"), Some("add"));
    }

    #[test]
    fn test_wire_field_names() {
        let env = Envelope::new(EnvelopeKind::CapabilityQuery, "a", "b");
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains("\"kind\":\"capability_query\""));
        assert!(json.contains("\"requiresResponse\":false"));
        // Unsigned envelopes omit the signature field entirely.
        assert!(!json.contains("signature"));
    }

    #[test]
    fn test_broadcast_recipient() {
        let env = Envelope::new(EnvelopeKind::CapabilityAnnouncement, "a", BROADCAST_RECIPIENT);
        assert!(env.is_broadcast());
        let direct = Envelope::new(EnvelopeKind::TaskRequest, "a", "b");
        assert!(!direct.is_broadcast());
    }

    #[test]
    fn test_signing_bytes_ignore_payload_insertion_order() {
        let mut forward = Map::new();
        forward.insert("a".to_string(), Value::from(1));
        forward.insert("b".to_string(), Value::from(2));
        let mut reverse = Map::new();
        reverse.insert("b".to_string(), Value::from(2));
        reverse.insert("a".to_string(), Value::from(1));

        let mut one = Envelope::new(EnvelopeKind::TaskRequest, "x", "y").with_payload(forward);
        let mut two = one.clone().with_payload(reverse);
        two.id = one.id.clone();
        two.timestamp = one.timestamp;

        assert_eq!(one.signing_bytes().unwrap(), two.signing_bytes().unwrap());

        // Mutating a signed field changes the encoding.
        one.recipient = "z".to_string();
        assert_ne!(one.signing_bytes().unwrap(), two.signing_bytes().unwrap());
    }

    #[test]
    fn test_signing_bytes_exclude_signature_and_id() {
        let mut env = Envelope::new(EnvelopeKind::StatusUpdate, "a", "b");
        let before = env.signing_bytes().unwrap();
        env.signature = Some("sig".to_string());
        env.id = "other".to_string();
        assert_eq!(before, env.signing_bytes().unwrap());
    }
}
