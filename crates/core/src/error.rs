//! Error types for the runtime
//!
//! [`StrandError`] is shared by every layer. Conflicts and explicit retry
//! requests are consumed by the retry loop; everything else reaches the
//! caller. Broken invariants are not errors: they go through [`fatal`], which
//! logs and aborts the process.

use crate::types::ObjRef;
use thiserror::Error;

/// Result alias used across the runtime.
pub type Result<T> = std::result::Result<T, StrandError>;

/// Errors raised by the runtime.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StrandError {
    /// The transaction observed a conflicting commit and was rolled back
    #[error("conflict: {reason}")]
    Conflict {
        /// Human-readable cause
        reason: String,
        /// Object the conflict was detected on, when known
        object: Option<ObjRef>,
    },

    /// The transaction asked to be rolled back and re-executed
    #[error("retry requested")]
    Retry,

    /// The transaction was explicitly aborted by the caller
    #[error("aborted: {0}")]
    Aborted(String),

    /// A resource (segment, old-generation space) is exhausted
    #[error("out of memory: {resource} (requested {requested} bytes)")]
    OutOfMemory {
        /// Exhausted resource
        resource: &'static str,
        /// Bytes (or units) requested
        requested: usize,
    },

    /// The retry loop gave up
    #[error("retry limit exceeded after {attempts} attempts")]
    RetryLimitExceeded {
        /// Number of executions of the transaction body
        attempts: u32,
    },

    /// Operation is not valid in the current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Reference does not point at a live object visible to the caller
    #[error("invalid reference: {0}")]
    InvalidReference(ObjRef),

    /// Object kind is not registered
    #[error("unknown object kind {0}")]
    UnknownKind(u16),

    /// Configuration rejected at startup
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl StrandError {
    /// Conflict error with a reason.
    pub fn conflict(reason: impl Into<String>, object: Option<ObjRef>) -> Self {
        StrandError::Conflict {
            reason: reason.into(),
            object,
        }
    }

    /// Should the retry loop re-execute the transaction?
    pub fn is_retryable(&self) -> bool {
        matches!(self, StrandError::Conflict { .. } | StrandError::Retry)
    }

    /// Is this a commit-time or read-time conflict?
    pub fn is_conflict(&self) -> bool {
        matches!(self, StrandError::Conflict { .. })
    }

    /// Is this a resource exhaustion error?
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, StrandError::OutOfMemory { .. })
    }
}

/// Report a broken core invariant and abort the process.
///
/// Continuing after an invariant violation would let transactions observe
/// corrupted heap state, so this never returns.
#[cold]
pub fn fatal(what: &str) -> ! {
    tracing::error!(invariant = what, "invariant violation, aborting");
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(StrandError::conflict("x", None).is_retryable());
        assert!(StrandError::Retry.is_retryable());
        assert!(!StrandError::Aborted("user".into()).is_retryable());
        assert!(!StrandError::OutOfMemory {
            resource: "segment",
            requested: 1
        }
        .is_retryable());
    }

    #[test]
    fn test_display() {
        let err = StrandError::conflict("read set invalidated", Some(ObjRef::from_raw(0x1000)));
        assert_eq!(err.to_string(), "conflict: read set invalidated");
        let err = StrandError::RetryLimitExceeded { attempts: 3 };
        assert_eq!(err.to_string(), "retry limit exceeded after 3 attempts");
    }
}
