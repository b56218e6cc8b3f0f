//! Relay error taxonomy
//!
//! Every variant is scoped to a single client interaction; none of them is
//! allowed to take the relay process down.

use thiserror::Error;

use crate::ClientId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// Operation referenced a client with no live session
    #[error("unknown client {0}")]
    UnknownClient(ClientId),
    /// A healthy session already holds this client id
    #[error("client {0} is already connected")]
    DuplicateId(ClientId),
    /// Input failed schema validation
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    /// Command targets a capability the client lacks
    #[error("client {client} has no {capability}")]
    ActuatorUnavailable {
        client: ClientId,
        capability: &'static str,
    },
    /// Reading is older than the freshness window
    #[error("{sensor} reading is stale ({age_ms} ms old)")]
    SensorStale { sensor: &'static str, age_ms: u64 },
}

impl RelayError {
    /// Short machine-readable kind, used in dashboard error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::UnknownClient(_) => "unknown_client",
            RelayError::DuplicateId(_) => "duplicate_id",
            RelayError::MalformedMessage(_) => "malformed_message",
            RelayError::ActuatorUnavailable { .. } => "actuator_unavailable",
            RelayError::SensorStale { .. } => "sensor_stale",
        }
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        RelayError::MalformedMessage(e.to_string())
    }
}
