//! Error types for entwine.
//!
//! All errors are strongly typed using thiserror. This enables pattern
//! matching on specific error conditions and provides clear error messages.
//! Per-collection search failures are not errors: they travel through
//! [`crate::search::SearchOutcome`] so a job can decide whether to skip the
//! collection or abort.

use thiserror::Error;

use crate::value::ValueType;

/// Validation errors raised while checking an entity model or a resolution
/// request before any search runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Attribute value has wrong type: expected {expected}, got {actual}")]
    ValueTypeMismatch {
        expected: ValueType,
        actual: String,
    },

    #[error("Invalid attribute value: {reason}")]
    InvalidAttributeValue {
        reason: String,
    },

    #[error("Matcher '{matcher}' requires parameter '{param}' and no value was supplied")]
    MissingMatcherParam {
        matcher: String,
        param: String,
    },

    #[error("Unknown attribute '{name}' referenced by {referent}")]
    UnknownAttribute {
        name: String,
        referent: String,
    },

    #[error("Unknown matcher '{name}' referenced by {referent}")]
    UnknownMatcher {
        name: String,
        referent: String,
    },

    #[error("Unknown resolver '{name}' referenced by {referent}")]
    UnknownResolver {
        name: String,
        referent: String,
    },

    #[error("Unknown collection '{name}' referenced by {referent}")]
    UnknownCollection {
        name: String,
        referent: String,
    },

    #[error("Invalid entity model: {reason}")]
    InvalidModel {
        reason: String,
    },

    #[error("Invalid resolution request: {reason}")]
    InvalidRequest {
        reason: String,
    },
}

/// Execution errors raised while a resolution job runs.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Job queue for the {pool} pool is full (capacity: {capacity})")]
    QueueFull {
        pool: String,
        capacity: usize,
    },

    #[error("The {pool} pool has shut down")]
    Disconnected {
        pool: String,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Search against collection '{collection}' failed: {message}")]
    SearchFailed {
        collection: String,
        message: String,
    },
}

/// Top-level error type for entwine.
///
/// This enum encompasses all possible errors that can occur
/// when resolving an entity.
#[derive(Debug, Error)]
pub enum EntwineError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl EntwineError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Execution(e) => {
                matches!(
                    e,
                    ExecutionError::QueueFull { .. } | ExecutionError::Timeout { .. }
                )
            }
            Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for entwine operations.
pub type EntwineResult<T> = Result<T, EntwineError>;
