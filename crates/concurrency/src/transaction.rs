//! Transaction context for OCC
//!
//! This module implements the per-transaction bookkeeping of the optimistic
//! concurrency control scheme. A `TransactionContext` tracks which committed
//! objects the transaction read, which it wrote, and which old-generation
//! objects it created, so that the commit protocol can validate the read and
//! write sets against the shared store and stamp every published object.
//!
//! The context never holds object contents: provisional bytes live in the
//! segment's private pages and nursery.

use crate::validation::ValidationResult;
use rustc_hash::FxHashSet;
use std::time::{Duration, Instant};
use strand_core::{ObjRef, Result, StrandError, TxnId, Version};
use thiserror::Error;

/// Error type for commit failures
#[derive(Debug, Clone, Error)]
pub enum CommitError {
    /// Transaction aborted due to validation conflicts
    #[error("commit failed: {} conflict(s)", .0.conflict_count())]
    ValidationFailed(ValidationResult),

    /// Transaction was not in the correct state for commit
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The write set overlaps the footprint of the running inevitable
    /// transaction. Nothing was published; wait for the inevitable
    /// transaction to finish, then commit again.
    #[error("blocked by inevitable transaction {holder}")]
    InevitableInProgress {
        /// Transaction holding the inevitable slot
        holder: TxnId,
        /// Gate generation to wait on
        generation: u64,
    },

    /// Reading or publishing pages failed
    #[error(transparent)]
    Memory(#[from] StrandError),
}

impl From<CommitError> for StrandError {
    fn from(e: CommitError) -> Self {
        match e {
            CommitError::ValidationFailed(result) => StrandError::Conflict {
                reason: format!("validation failed: {} conflict(s)", result.conflict_count()),
                object: result.first_object(),
            },
            CommitError::InvalidState(msg) => StrandError::InvalidState(msg),
            CommitError::InevitableInProgress { holder, .. } => StrandError::InvalidState(format!(
                "commit blocked by inevitable transaction {}",
                holder
            )),
            CommitError::Memory(e) => e,
        }
    }
}

/// Summary of pending operations that would be rolled back on abort
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingOperations {
    /// Committed objects read
    pub reads: usize,
    /// Committed objects written
    pub writes: usize,
    /// Old-generation objects created
    pub new_objects: usize,
}

impl PendingOperations {
    /// Total number of tracked objects
    pub fn total(&self) -> usize {
        self.reads + self.writes + self.new_objects
    }

    /// Check if nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Status of a transaction in its lifecycle
///
/// State transitions:
/// - `Active` → `Validating` (begin commit)
/// - `Validating` → `Committed` (validation passed, pages published)
/// - `Validating` → `Aborted` (conflict detected)
/// - `Active` → `Aborted` (user abort, retry request or read conflict)
///
/// Terminal states (no transitions allowed):
/// - `Committed`
/// - `Aborted`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Transaction is executing, can read/write
    Active,
    /// Transaction is being validated for conflicts
    Validating,
    /// Transaction committed successfully
    Committed,
    /// Transaction was aborted
    Aborted {
        /// Human-readable reason for abort
        reason: String,
    },
}

/// Read/write log of one transaction.
///
/// Young objects are never tracked: they are private to the segment until a
/// minor collection promotes them, at which point they become new objects.
#[derive(Debug, Clone)]
pub struct TransactionContext {
    /// Unique transaction identifier
    pub txn_id: TxnId,
    /// Snapshot version. Committed objects with a newer revision force a
    /// snapshot extension.
    pub start_version: Version,
    /// Current status
    pub status: TransactionStatus,
    /// Committed objects read through the shared store
    pub read_set: FxHashSet<ObjRef>,
    /// Committed objects modified (private copies in the segment view)
    pub write_set: FxHashSet<ObjRef>,
    /// Old-generation objects created by this transaction, not yet published
    pub new_objects: FxHashSet<ObjRef>,
    inevitable: bool,
    extensions: u32,
    start_time: Instant,
}

impl TransactionContext {
    /// Create a new transaction context
    pub fn new(txn_id: TxnId, start_version: Version) -> Self {
        TransactionContext {
            txn_id,
            start_version,
            status: TransactionStatus::Active,
            read_set: FxHashSet::default(),
            write_set: FxHashSet::default(),
            new_objects: FxHashSet::default(),
            inevitable: false,
            extensions: 0,
            start_time: Instant::now(),
        }
    }

    // === Tracking ===

    /// Record a read of a committed object.
    ///
    /// Objects the transaction already owns (written or created) are not
    /// recorded; their reads are served from private pages.
    pub fn record_read(&mut self, obj: ObjRef) {
        debug_assert!(obj.is_old());
        if !self.owns(obj) {
            self.read_set.insert(obj);
        }
    }

    /// Record the first write of a committed object. Returns `true` when the
    /// object was not written before.
    pub fn record_write(&mut self, obj: ObjRef) -> bool {
        debug_assert!(obj.is_old());
        if self.new_objects.contains(&obj) {
            return false;
        }
        self.write_set.insert(obj)
    }

    /// Record an old-generation object created by this transaction.
    pub fn record_new(&mut self, obj: ObjRef) {
        debug_assert!(obj.is_old());
        self.new_objects.insert(obj);
    }

    /// Was `obj` written or created by this transaction?
    #[inline]
    pub fn owns(&self, obj: ObjRef) -> bool {
        self.write_set.contains(&obj) || self.new_objects.contains(&obj)
    }

    /// Was `obj` created by this transaction?
    #[inline]
    pub fn is_new(&self, obj: ObjRef) -> bool {
        self.new_objects.contains(&obj)
    }

    /// Every object whose published revision must be stamped at commit.
    pub fn published_objects(&self) -> impl Iterator<Item = ObjRef> + '_ {
        self.write_set.iter().chain(self.new_objects.iter()).copied()
    }

    /// Committed objects this transaction depends on (read or written).
    pub fn footprint(&self) -> impl Iterator<Item = ObjRef> + '_ {
        self.read_set.iter().chain(self.write_set.iter()).copied()
    }

    /// Advance the snapshot after a successful revalidation.
    pub fn extend(&mut self, version: Version) {
        debug_assert!(version >= self.start_version);
        self.start_version = version;
        self.extensions += 1;
    }

    /// Number of snapshot extensions so far.
    pub fn extensions(&self) -> u32 {
        self.extensions
    }

    // === Inevitability ===

    /// Is this the inevitable transaction?
    #[inline]
    pub fn is_inevitable(&self) -> bool {
        self.inevitable
    }

    /// Mark the transaction inevitable. Only the transaction manager calls
    /// this, after admission and validation.
    pub(crate) fn set_inevitable(&mut self) {
        self.inevitable = true;
    }

    // === State Management ===

    /// Check if transaction is in Active state
    pub fn is_active(&self) -> bool {
        matches!(self.status, TransactionStatus::Active)
    }

    /// Check if transaction is committed
    pub fn is_committed(&self) -> bool {
        matches!(self.status, TransactionStatus::Committed)
    }

    /// Check if transaction is aborted
    pub fn is_aborted(&self) -> bool {
        matches!(self.status, TransactionStatus::Aborted { .. })
    }

    /// Check if transaction can be rolled back
    ///
    /// A transaction can be rolled back if it's in Active or Validating state.
    pub fn can_rollback(&self) -> bool {
        matches!(
            self.status,
            TransactionStatus::Active | TransactionStatus::Validating
        )
    }

    /// Get the elapsed time since transaction started
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Check if transaction can accept operations
    ///
    /// # Errors
    /// Returns `StrandError::InvalidState` if transaction is not `Active`.
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(StrandError::InvalidState(format!(
                "transaction {} is not active: {:?}",
                self.txn_id, self.status
            )))
        }
    }

    /// Transition to Validating state
    ///
    /// # State Transition
    /// `Active` → `Validating`
    pub fn mark_validating(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.status = TransactionStatus::Validating;
        Ok(())
    }

    /// Transition to Committed state
    ///
    /// # State Transition
    /// `Validating` → `Committed`
    pub fn mark_committed(&mut self) -> Result<()> {
        match &self.status {
            TransactionStatus::Validating => {
                self.status = TransactionStatus::Committed;
                Ok(())
            }
            _ => Err(StrandError::InvalidState(format!(
                "cannot commit transaction {} from state {:?}",
                self.txn_id, self.status
            ))),
        }
    }

    /// Abort the transaction
    ///
    /// The write set and new objects are cleared; the read set is kept for
    /// diagnostics.
    ///
    /// # State Transitions
    /// - `Active` → `Aborted`
    /// - `Validating` → `Aborted`
    pub fn mark_aborted(&mut self, reason: String) -> Result<()> {
        match &self.status {
            TransactionStatus::Committed => Err(StrandError::InvalidState(format!(
                "cannot abort committed transaction {}",
                self.txn_id
            ))),
            TransactionStatus::Aborted { .. } => Err(StrandError::InvalidState(format!(
                "transaction {} already aborted",
                self.txn_id
            ))),
            _ => {
                self.status = TransactionStatus::Aborted { reason };
                self.write_set.clear();
                self.new_objects.clear();
                Ok(())
            }
        }
    }

    /// Get summary of pending operations
    pub fn pending_operations(&self) -> PendingOperations {
        PendingOperations {
            reads: self.read_set.len(),
            writes: self.write_set.len(),
            new_objects: self.new_objects.len(),
        }
    }
}
