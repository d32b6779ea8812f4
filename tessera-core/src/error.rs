//! Error types for TESSERA operations

use crate::Method;
use thiserror::Error;

/// Configuration errors. Never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown object type: {object_type}")]
    UnknownObjectType { object_type: String },

    #[error("{operation} on {object_type} requires a remote key")]
    MissingIdentifier {
        object_type: String,
        operation: String,
    },

    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Errors produced while talking to the remote API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("{method} {url} failed with status {status}: {body}")]
    Terminal {
        method: Method,
        url: String,
        status: u16,
        body: String,
    },

    #[error("Conflict creating {object_type} with key {key}: the key is held by another object")]
    Conflict { object_type: String, key: String },

    #[error("{method} {url} gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        method: Method,
        url: String,
        attempts: u32,
        last: String,
    },

    #[error("Transport failure on {method} {url}: {message}")]
    Transport {
        method: Method,
        url: String,
        message: String,
    },

    #[error("Invalid response for {object_type}: {reason}")]
    InvalidResponse { object_type: String, reason: String },

    #[error("Response for {object_type} {key} is missing field {field}")]
    MissingField {
        object_type: String,
        key: String,
        field: String,
    },
}

/// Resource cache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Resource cache lock poisoned")]
    LockPoisoned,

    #[error("Logical id {logical_id} of {object_type} matches {matches} remote objects")]
    AmbiguousLogicalId {
        object_type: String,
        logical_id: String,
        matches: usize,
    },
}

/// Why an operation context stopped.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq, Hash)]
pub enum ContextError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("operation deadline exceeded")]
    DeadlineExceeded,
}

/// A write or delete that never converged on the remote side.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConsistencyError {
    #[error(
        "Write to {object_type} {key} was accepted but its content hash did not converge \
         before the deadline ({mismatches} mismatched checks)"
    )]
    ConfirmationDeadlineExceeded {
        object_type: String,
        key: String,
        mismatches: u32,
    },
}

/// Master error type for all TESSERA errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AccessError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Consistency error: {0}")]
    Consistency(#[from] ConsistencyError),
}

impl AccessError {
    /// True when the error was caused by a caller cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AccessError::Context(ContextError::Cancelled))
    }

    /// True for both an expired context and an unconfirmed write.
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(
            self,
            AccessError::Context(ContextError::DeadlineExceeded)
                | AccessError::Consistency(ConsistencyError::ConfirmationDeadlineExceeded { .. })
        )
    }

    /// HTTP status carried by a terminal request error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            AccessError::Request(RequestError::Terminal { status, .. }) => Some(*status),
            _ => None,
        }
    }
}

/// Result type alias for TESSERA operations.
pub type AccessResult<T> = Result<T, AccessError>;

// =============================================================================
// TESTS
// =============================================================================
