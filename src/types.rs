//! Core data types shared by both ingress paths
//!
//! Pipeline events use camelCase JSON serialization, like every other
//! A3S event envelope.

use serde::{Deserialize, Serialize};

/// Dispatch name given to interactions, whichever path delivered them
pub const INTERACTION_CREATE: &str = "INTERACTION_CREATE";

/// Where an event entered the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Ingress {
    /// Delivered over the persistent gateway connection
    Gateway,
    /// Delivered as a signed HTTP callback
    Webhook,
}

impl std::fmt::Display for Ingress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Ingress::Gateway => f.write_str("gateway"),
            Ingress::Webhook => f.write_str("webhook"),
        }
    }
}

/// A single event flowing through the dispatch pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineEvent {
    /// Unique event identifier (evt-<uuid>)
    pub id: String,

    /// Dispatch name (e.g., "READY", "MESSAGE_CREATE", "INTERACTION_CREATE")
    pub name: String,

    /// Ingress path that produced this event
    pub ingress: Ingress,

    /// Event payload, uninterpreted by the bridge
    pub payload: serde_json::Value,

    /// Unix timestamp in milliseconds at which the event was received
    pub timestamp: u64,
}

impl PipelineEvent {
    /// Create a new event with auto-generated id and timestamp
    pub fn new(name: impl Into<String>, ingress: Ingress, payload: serde_json::Value) -> Self {
        Self {
            id: format!("evt-{}", uuid::Uuid::new_v4()),
            name: name.into(),
            ingress,
            payload,
            timestamp: now_millis(),
        }
    }
}

/// Numeric interaction discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InteractionKind(pub i64);

impl InteractionKind {
    /// Liveness check sent by the remote service to confirm the endpoint
    pub const PING: InteractionKind = InteractionKind(1);

    pub fn is_ping(self) -> bool {
        self == Self::PING
    }
}

impl std::fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Decoded interaction body
///
/// `payload` is the full parsed object, including the kind field itself.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionEnvelope {
    pub kind: InteractionKind,
    pub payload: serde_json::Value,
}

/// Outcome of a request that passed verification and decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    /// Liveness check answered with `{"type": 1}`
    LivenessAcknowledged,
    /// Event handed to the pipeline; answered with an empty 200
    EventAccepted { event_id: String },
}

/// Current time in Unix milliseconds
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
