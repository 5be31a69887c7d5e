//! Crate-wide error type. Every kind here maps to a policy that logs
//! and continues rather than aborting the simulation; the only one that
//! propagates out of `main` is a listener bind failure during topology
//! setup.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelaySimError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connect failed to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialize/deserialize error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("unknown message type: {0}")]
    UnknownMessageType(u8),

    #[error("peer not connected: {0}")]
    NotConnected(String),

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RelaySimError>;
