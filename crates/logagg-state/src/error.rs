//! Tenant store errors.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

/// Failures from the redb layer, plus unique-key violations.
///
/// redb's error types are flattened to strings so callers only match on
/// the variant.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open tenant store: {0}")]
    Open(String),

    #[error("store transaction failed: {0}")]
    Transaction(String),

    #[error("cannot open table: {0}")]
    Table(String),

    #[error("store read failed: {0}")]
    Read(String),

    #[error("store write failed: {0}")]
    Write(String),

    #[error("cannot encode record: {0}")]
    Serialize(String),

    #[error("cannot decode record: {0}")]
    Deserialize(String),

    /// A unique key already holds a record.
    #[error("key already exists: {0}")]
    DuplicateKey(String),
}
