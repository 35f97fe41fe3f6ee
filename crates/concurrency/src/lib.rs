//! Concurrency layer for strand
//!
//! This crate implements optimistic concurrency control over heap objects:
//! - TransactionContext: read set, write set and new-object tracking
//! - Validation: revision checks against the shared store (first committer wins)
//! - TransactionManager: the commit protocol and snapshot extension
//! - SegmentPool / SafePoint: segment assignment and stop-the-world barriers
//! - InevitableGate: admission of the single inevitable transaction

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod inevitable;
pub mod manager;
pub mod pool;
pub mod sync;
pub mod transaction;
pub mod validation;

pub use inevitable::InevitableGate;
pub use manager::{TransactionManager, TransactionMetrics};
pub use pool::SegmentPool;
pub use sync::{lock_world, SafePoint, WorldGuard};
pub use transaction::{CommitError, PendingOperations, TransactionContext, TransactionStatus};
pub use validation::{
    validate_read_set, validate_transaction, validate_write_set, ConflictType, ValidationResult,
};
