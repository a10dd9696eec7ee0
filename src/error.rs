//! Typed, per-request domain errors. These carry the stable `ERR-NNNN` code
//! prefixes the source project used for programmatic detection in tests; on
//! the wire only the [`crate::protocol::ReplyCode`] is ever emitted.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("ERR-0001: command {0:?} invalid")]
    InvalidCommand(String),

    #[error("ERR-0002: dependency {dep} of {pkg} missing")]
    DependencyMissing { pkg: String, dep: String },

    #[error("ERR-0003: {0} has active dependents")]
    ActiveDependents(String),

    #[error("ERR-0004: {0} not indexed")]
    NotIndexed(String),
}

impl StoreError {
    /// The stable four-digit code, independent of the human-readable message.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::InvalidCommand(_) => "ERR-0001",
            StoreError::DependencyMissing { .. } => "ERR-0002",
            StoreError::ActiveDependents(_) => "ERR-0003",
            StoreError::NotIndexed(_) => "ERR-0004",
        }
    }
}
