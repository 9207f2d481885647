// Transport-independent message model.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// DESTINATIONS
// ============================================================================

/// Verb-like destination type. Only the verbs the controller accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DestinationVerb {
    #[serde(rename = "POST")]
    Post,
    #[serde(rename = "PUT")]
    Put,
}

impl std::fmt::Display for DestinationVerb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DestinationVerb::Post => write!(f, "POST"),
            DestinationVerb::Put => write!(f, "PUT"),
        }
    }
}

/// Logical destination of an outbound message: verb plus target path
/// segment. Mapped to a transport-specific destination before enqueue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentMessageDestination {
    #[serde(rename = "type")]
    pub verb: DestinationVerb,
    pub target: String,
}

impl AgentMessageDestination {
    pub fn post(target: impl Into<String>) -> Self {
        AgentMessageDestination {
            verb: DestinationVerb::Post,
            target: target.into(),
        }
    }

    pub fn put(target: impl Into<String>) -> Self {
        AgentMessageDestination {
            verb: DestinationVerb::Put,
            target: target.into(),
        }
    }
}

// ============================================================================
// MESSAGES AND STATUS
// ============================================================================

/// Immutable outbound payload. Serialized once, at submission time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentMessage {
    payload: Value,
}

impl AgentMessage {
    pub fn new(payload: Value) -> Self {
        AgentMessage { payload }
    }

    /// Builds a message from any serializable value.
    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(AgentMessage {
            payload: serde_json::to_value(value)?,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.payload)
    }
}

/// Outcome of handing a message to the sender.
///
/// Network failures never surface as errors to application code; telemetry
/// loss is preferable to blocking or failing application threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    /// Accepted into the delivery queue; the background dispatcher owns it
    /// from here.
    Accepted,
    /// Dropped: the transport is not attached yet.
    Unavailable,
    /// Dropped: the message could not be serialized.
    Rejected,
}

impl ResponseStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ResponseStatus::Accepted)
    }
}
