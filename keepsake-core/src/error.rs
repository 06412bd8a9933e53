//! Error types for Keepsake search operations

use crate::BlobRef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Index layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("blob not found: {0}")]
    NotFound(BlobRef),

    #[error("no matching record: {what}")]
    NoMatch { what: String },

    #[error("index lookup {op} failed: {reason}")]
    LookupFailed { op: String, reason: String },

    #[error("index lock poisoned")]
    LockPoisoned,
}

impl IndexError {
    /// Whether this error means "the blob/record simply is not there",
    /// which callers recover from locally.
    pub fn is_not_found(&self) -> bool {
        matches!(self, IndexError::NotFound(_) | IndexError::NoMatch { .. })
    }
}

/// Master error type for all Keepsake search operations.
#[derive(Debug, Clone, Error)]
pub enum KeepsakeError {
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("invalid input: {msg}")]
    InvalidInput { msg: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("query planning failed: {msg}")]
    Plan { msg: String },

    #[error("describe failed for {} blob(s)", errors.len())]
    Describe { errors: BTreeMap<String, String> },

    #[error("internal error: {msg}")]
    Internal { msg: String },
}

impl KeepsakeError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        KeepsakeError::InvalidInput { msg: msg.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        KeepsakeError::Internal { msg: msg.into() }
    }

    /// The wire-level category for this error.
    pub fn error_type(&self) -> ErrorType {
        match self {
            KeepsakeError::InvalidInput { .. } => ErrorType::Input,
            KeepsakeError::Index(_)
            | KeepsakeError::Cancelled
            | KeepsakeError::Plan { .. }
            | KeepsakeError::Describe { .. }
            | KeepsakeError::Internal { .. } => ErrorType::Server,
        }
    }

    /// The wire body for this error.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: self.to_string(),
            error_type: self.error_type(),
        }
    }
}

/// Result type alias for Keepsake operations.
pub type KeepsakeResult<T> = Result<T, KeepsakeError>;

/// Wire-level error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    /// The client sent something malformed.
    Input,
    /// The server failed.
    Server,
}

/// Error response body, stable over HTTP/JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(rename = "errorType")]
    pub error_type: ErrorType,
}
