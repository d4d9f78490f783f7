//! Error types for the bridge client.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("bridge request failed: {0}")]
    Request(String),

    #[error("bridge returned {status} for {uri}")]
    Status { status: http::StatusCode, uri: String },

    #[error("bridge stream broken: {0}")]
    Stream(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}
