//! Unified error types for Strand.
//!
//! Wraps the runtime's internal errors in a stable interface for users.

use strand_core::StrandError;
use thiserror::Error;

/// All Strand errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// A conflicting commit invalidated the transaction
    #[error("conflict: {0}")]
    Conflict(String),

    /// The transaction was aborted by its own code
    #[error("aborted: {0}")]
    Aborted(String),

    /// No free segment, or the old generation is full even after a collection
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// `atomically` gave up
    #[error("retry limit exceeded after {attempts} attempts")]
    RetryLimitExceeded {
        /// Executions of the transaction body
        attempts: u32,
    },

    /// Operation not valid in the current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Reference not usable by the caller
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// Object kind was never registered
    #[error("unknown object kind {0}")]
    UnknownKind(u16),

    /// Configuration rejected
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration could not be parsed
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type for Strand operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error is retryable.
    ///
    /// Conflicts succeed on re-execution against a fresh snapshot.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// Check if this is a conflict error.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// Check if this is a resource exhaustion error.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Error::OutOfMemory(_))
    }
}

// Convert from runtime errors
impl From<StrandError> for Error {
    fn from(e: StrandError) -> Self {
        match e {
            StrandError::Conflict { reason, object } => match object {
                Some(obj) => Error::Conflict(format!("{} on {}", reason, obj)),
                None => Error::Conflict(reason),
            },
            StrandError::Retry => {
                Error::InvalidState("retry requested outside of a retry loop".to_string())
            }
            StrandError::Aborted(reason) => Error::Aborted(reason),
            StrandError::OutOfMemory {
                resource,
                requested,
            } => Error::OutOfMemory(format!("{} ({} requested)", resource, requested)),
            StrandError::RetryLimitExceeded { attempts } => Error::RetryLimitExceeded { attempts },
            StrandError::InvalidState(msg) => Error::InvalidState(msg),
            StrandError::InvalidReference(obj) => Error::InvalidReference(obj.to_string()),
            StrandError::UnknownKind(kind) => Error::UnknownKind(kind),
            StrandError::InvalidConfig(msg) => Error::InvalidConfig(msg),
        }
    }
}

// Convert from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
