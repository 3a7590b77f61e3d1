//! Error types for the Synclist engine.
//!
//! The reconciler itself cannot fail. Errors only arise when decoding rows
//! and notifications handed over by the platform.

use thiserror::Error;

/// All possible errors from the Synclist engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid row: {0}")]
    InvalidRow(String),

    #[error("missing field: {0}")]
    MissingField(String),

    #[error("invalid timestamp in field '{field}': {value}")]
    InvalidTimestamp { field: String, value: String },

    #[error("invalid id in field '{field}': expected string or integer")]
    InvalidId { field: String },

    #[error("unknown change event: {0}")]
    UnknownEvent(String),

    #[error("invalid policy: {0}")]
    InvalidPolicy(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
