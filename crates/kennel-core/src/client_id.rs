//! Client identifiers for robot connections

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{RelayError, MAX_CLIENT_ID_LEN};

/// Opaque handle identifying one robot's live connection.
///
/// Supplied by the robot in the WebSocket path, or generated by the robot
/// agent when none is configured. Restricted to `[A-Za-z0-9._-]` so it can
/// be embedded in URL paths and log lines without escaping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClientId(String);

impl ClientId {
    /// Validate and wrap a client identifier
    pub fn new(id: impl Into<String>) -> Result<Self, RelayError> {
        let id = id.into();
        if id.is_empty() {
            return Err(RelayError::MalformedMessage("client id is empty".into()));
        }
        if id.len() > MAX_CLIENT_ID_LEN {
            return Err(RelayError::MalformedMessage(format!(
                "client id longer than {} characters",
                MAX_CLIENT_ID_LEN
            )));
        }
        if let Some(c) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        {
            return Err(RelayError::MalformedMessage(format!(
                "client id contains invalid character {:?}",
                c
            )));
        }
        Ok(Self(id))
    }

    /// Generate a fresh identifier (`robot-<uuid>`)
    pub fn generate() -> Self {
        Self(format!("robot-{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ClientId {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ClientId {
    type Error = RelayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ClientId> for String {
    fn from(id: ClientId) -> Self {
        id.0
    }
}
