//! Error types for the CivicPulse environment abstraction.

use thiserror::Error;

/// Errors raised by environment collaborators (event log, push transport).
#[derive(Debug, Error)]
pub enum EnvError {
    /// The event log could not serve the request (I/O, closed database, ...)
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Event encoding/decoding failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Push transport has no live channel
    #[error("Transport closed: {0}")]
    TransportClosed(String),
}

impl EnvError {
    /// Creates a store error.
    pub fn store(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    /// Creates a serialization error.
    pub fn serialization(err: impl std::fmt::Display) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for EnvError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err)
    }
}
