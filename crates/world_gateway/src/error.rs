//! Error types for persistence and the runtime driver.
//!
//! Portal transitions and registry inserts never produce these: an illegal
//! transition or duplicate registration is reported as `false`.

use std::fmt;
use std::io;

use super::types::WorldId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    Io(String),
    Serde(String),
    UnsupportedVersion {
        kind: String,
        version: u32,
        expected: u32,
    },
    InvalidRecord { key: String, reason: String },
    AlreadyRunning,
    NotRunning,
    UnknownWorld { world_id: WorldId },
    WorldAlreadyAttached { world_id: WorldId },
    ThreadSpawnFailed { reason: String },
    ThreadJoinFailed,
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Io(message) => write!(f, "gateway store io error: {message}"),
            GatewayError::Serde(message) => write!(f, "gateway record codec error: {message}"),
            GatewayError::UnsupportedVersion {
                kind,
                version,
                expected,
            } => write!(
                f,
                "unsupported {kind} record version {version} (expected {expected})"
            ),
            GatewayError::InvalidRecord { key, reason } => {
                write!(f, "invalid gateway record {key}: {reason}")
            }
            GatewayError::AlreadyRunning => f.write_str("gateway runtime already running"),
            GatewayError::NotRunning => f.write_str("gateway runtime not running"),
            GatewayError::UnknownWorld { world_id } => {
                write!(f, "world not attached to gateway runtime: {world_id}")
            }
            GatewayError::WorldAlreadyAttached { world_id } => {
                write!(f, "world already attached to gateway runtime: {world_id}")
            }
            GatewayError::ThreadSpawnFailed { reason } => {
                write!(f, "failed to spawn gateway tick thread: {reason}")
            }
            GatewayError::ThreadJoinFailed => f.write_str("failed to join gateway tick thread"),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<io::Error> for GatewayError {
    fn from(error: io::Error) -> Self {
        GatewayError::Io(error.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(error: serde_json::Error) -> Self {
        GatewayError::Serde(error.to_string())
    }
}

impl From<serde_cbor::Error> for GatewayError {
    fn from(error: serde_cbor::Error) -> Self {
        GatewayError::Serde(error.to_string())
    }
}
