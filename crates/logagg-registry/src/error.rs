//! Error taxonomy for registry operations.

use logagg_bridge::BridgeError;
use logagg_state::StateError;
use thiserror::Error;

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Secret mismatch. Never retried.
    #[error("authentication failed for tenant {0}")]
    AuthenticationFailed(String),

    #[error("tenant not found: {0}")]
    TenantNotFound(String),

    #[error("component not found: {0}")]
    ComponentNotFound(String),

    #[error("tenant already exists: {0}")]
    DuplicateTenant(String),

    #[error("queue resource already exists: {0}")]
    DuplicateQueueResource(String),

    #[error("no queue resource available")]
    NoResourceAvailable,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Bridge unreachable or its stream broke.
    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    /// A heartbeat line that is not a component record.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("store error: {0}")]
    Store(#[from] StateError),
}

impl From<BridgeError> for RegistryError {
    fn from(e: BridgeError) -> Self {
        Self::UpstreamUnreachable(e.to_string())
    }
}
