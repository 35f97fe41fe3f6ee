//! Transaction manager for coordinating commit operations
//!
//! Provides atomic commit by orchestrating:
//! 1. Validation (first-committer-wins)
//! 2. Revision stamping of every published object
//! 3. Page replication (visibility)
//!
//! The global version lives in the shared store and is advanced by the same
//! publication step that installs the pages, so a reader never observes a
//! version without its pages or pages without their version.
//!
//! ## Commit Sequence
//!
//! ```text
//! 1. take the commit lock
//! 2. if the write set overlaps the inevitable footprint: release, report
//!    InevitableInProgress (caller waits and commits again)
//! 3. Active → Validating
//! 4. validate read and write sets (skipped for the inevitable transaction)
//! 5. IF conflicts: Aborted, return ValidationFailed
//! 6. commit_version = published version + 1
//! 7. stamp commit_version into every written and new object
//! 8. replicate the segment's dirty pages (installs pages + version)
//! 9. run the caller's publish hook (weak refs, finalizers)
//! 10. Validating → Committed, release the commit lock
//! 11. release the inevitable slot if held
//! ```

use crate::inevitable::InevitableGate;
use crate::transaction::{CommitError, TransactionContext};
use crate::validation::validate_transaction;
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strand_core::header::REVISION_OFFSET;
use strand_core::{fatal, ObjRef, Result, StrandError, TxnId, Version};
use strand_memory::{replicate, SegmentView, SharedHeap};

/// Transaction counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TransactionMetrics {
    /// Transactions currently running
    pub active_count: u64,
    /// Transactions started
    pub total_started: u64,
    /// Transactions committed
    pub total_committed: u64,
    /// Transactions aborted for any reason
    pub total_aborted: u64,
    /// Aborts caused by conflicts
    pub total_conflicts: u64,
    /// Restarts performed by retry loops
    pub total_retries: u64,
    /// Snapshot extensions
    pub total_extensions: u64,
    /// Commits of inevitable transactions
    pub inevitable_commits: u64,
    /// Commit success rate (0.0 - 1.0)
    pub commit_rate: f64,
}

#[derive(Debug, Default)]
struct Counters {
    started: AtomicU64,
    committed: AtomicU64,
    aborted: AtomicU64,
    conflicts: AtomicU64,
    retries: AtomicU64,
    extensions: AtomicU64,
    inevitable: AtomicU64,
}

/// Manages transaction lifecycle and atomic commits
///
/// # Thread Safety
///
/// Commits are serialized by the commit lock; validation, revision stamping
/// and replication of one transaction happen with no other commit in
/// between. Reads never take the commit lock.
pub struct TransactionManager {
    heap: Arc<SharedHeap>,

    /// Next transaction ID
    next_txn_id: AtomicU64,

    /// Commit serialization lock
    commit_lock: Mutex<()>,

    inevitable: InevitableGate,
    counters: Counters,
}

impl TransactionManager {
    /// Create a manager publishing into `heap`.
    pub fn new(heap: Arc<SharedHeap>) -> Self {
        TransactionManager {
            heap,
            next_txn_id: AtomicU64::new(1),
            commit_lock: Mutex::new(()),
            inevitable: InevitableGate::new(),
            counters: Counters::default(),
        }
    }

    /// The shared store.
    pub fn heap(&self) -> &Arc<SharedHeap> {
        &self.heap
    }

    /// Get current global version
    pub fn current_version(&self) -> Version {
        self.heap.published_version()
    }

    /// Allocate next transaction ID
    pub fn next_txn_id(&self) -> TxnId {
        self.next_txn_id.fetch_add(1, Ordering::SeqCst)
    }

    /// The inevitable-transaction gate.
    pub fn inevitable(&self) -> &InevitableGate {
        &self.inevitable
    }

    /// Take the commit lock (fork preparation).
    pub fn commit_lock(&self) -> MutexGuard<'_, ()> {
        self.commit_lock.lock()
    }

    /// Start a transaction at the current version.
    pub fn begin(&self) -> TransactionContext {
        self.counters.started.fetch_add(1, Ordering::Relaxed);
        TransactionContext::new(self.next_txn_id(), self.current_version())
    }

    /// Revalidate and move the snapshot forward.
    ///
    /// Called when a read observes an object newer than the start version.
    /// On success the transaction continues at the version current before
    /// validation; on failure it must abort.
    pub fn extend(&self, txn: &mut TransactionContext) -> Result<Version> {
        txn.ensure_active()?;
        let now = self.current_version();
        let result = validate_transaction(txn, &self.heap)?;
        if !result.is_valid() {
            if txn.is_inevitable() {
                fatal("inevitable transaction failed revalidation");
            }
            return Err(CommitError::ValidationFailed(result).into());
        }
        txn.extend(now);
        self.counters.extensions.fetch_add(1, Ordering::Relaxed);
        Ok(now)
    }

    /// Make `txn` inevitable. The caller must already hold the slot (see
    /// [`InevitableGate::acquire`]); on a conflict the slot is released and
    /// the transaction must abort.
    pub fn make_inevitable(&self, txn: &mut TransactionContext) -> Result<()> {
        txn.ensure_active()?;
        if self.inevitable.holder() != Some(txn.txn_id) {
            return Err(StrandError::InvalidState(format!(
                "transaction {} does not hold the inevitable slot",
                txn.txn_id
            )));
        }
        let _commit_guard = self.commit_lock.lock();
        let now = self.current_version();
        let result = validate_transaction(txn, &self.heap)?;
        if !result.is_valid() {
            self.inevitable.release(txn.txn_id);
            return Err(CommitError::ValidationFailed(result).into());
        }
        txn.extend(now);
        txn.set_inevitable();
        self.inevitable.extend_footprint(txn.footprint());
        Ok(())
    }

    /// Add `obj` to the inevitable transaction's footprint before it is
    /// first accessed.
    ///
    /// Taking the commit lock orders the addition against commits: any
    /// commit of `obj` either finished before (and the access sees it) or
    /// starts after (and finds `obj` in the footprint).
    pub fn track_inevitable(&self, txn: &TransactionContext, obj: ObjRef) {
        if !txn.is_inevitable() || self.inevitable.in_footprint(obj) {
            return;
        }
        let _commit_guard = self.commit_lock.lock();
        self.inevitable.extend_footprint([obj]);
    }

    /// Commit a transaction atomically
    ///
    /// `view` holds the transaction's private pages. `publish` runs inside
    /// the commit critical section after the pages are installed, with the
    /// commit version.
    ///
    /// # Returns
    /// - Ok(commit_version) on success
    /// - Err(CommitError::InevitableInProgress) if the caller must wait for
    ///   the inevitable transaction; nothing changed
    /// - Err(CommitError::ValidationFailed) if the transaction aborted
    pub fn commit(
        &self,
        txn: &mut TransactionContext,
        view: &mut SegmentView,
        publish: impl FnOnce(Version),
    ) -> std::result::Result<Version, CommitError> {
        let commit_guard = self.commit_lock.lock();

        if !txn.is_inevitable() {
            if let Some((holder, generation)) = self.inevitable.blocks(txn.txn_id, txn.write_set.iter()) {
                return Err(CommitError::InevitableInProgress { holder, generation });
            }
        }

        txn.mark_validating()?;

        if !txn.is_inevitable() {
            let result = validate_transaction(txn, &self.heap)?;
            if !result.is_valid() {
                txn.status = crate::TransactionStatus::Aborted {
                    reason: format!("commit failed: {} conflict(s) detected", result.conflict_count()),
                };
                self.counters.aborted.fetch_add(1, Ordering::Relaxed);
                self.counters.conflicts.fetch_add(1, Ordering::Relaxed);
                return Err(CommitError::ValidationFailed(result));
            }
        }

        let commit_version = self.current_version() + 1;
        let stamp = commit_version.to_le_bytes();
        for obj in txn.published_objects() {
            view.write(obj.addr() + REVISION_OFFSET as u64, &stamp)?;
        }
        let report = replicate(view, commit_version)?;
        publish(commit_version);
        txn.mark_committed()?;
        drop(commit_guard);

        if txn.is_inevitable() {
            self.inevitable.release(txn.txn_id);
            self.counters.inevitable.fetch_add(1, Ordering::Relaxed);
        }
        self.counters.committed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            txn_id = txn.txn_id,
            commit_version,
            writes = txn.write_set.len(),
            new_objects = txn.new_objects.len(),
            pages = report.pages,
            "committed"
        );
        Ok(commit_version)
    }

    /// Explicitly abort a transaction
    ///
    /// Releases the inevitable slot if the transaction held it.
    pub fn abort(&self, txn: &mut TransactionContext, cause: &StrandError) -> Result<()> {
        if txn.is_aborted() {
            // already counted when validation failed
            return Ok(());
        }
        txn.mark_aborted(cause.to_string())?;
        if txn.is_inevitable() {
            self.inevitable.release(txn.txn_id);
        }
        self.counters.aborted.fetch_add(1, Ordering::Relaxed);
        if cause.is_conflict() {
            self.counters.conflicts.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Record a restart performed by a retry loop.
    pub fn record_retry(&self) {
        self.counters.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of the counters.
    pub fn metrics(&self) -> TransactionMetrics {
        let started = self.counters.started.load(Ordering::Relaxed);
        let committed = self.counters.committed.load(Ordering::Relaxed);
        let aborted = self.counters.aborted.load(Ordering::Relaxed);
        let finished = committed + aborted;
        TransactionMetrics {
            active_count: started.saturating_sub(finished),
            total_started: started,
            total_committed: committed,
            total_aborted: aborted,
            total_conflicts: self.counters.conflicts.load(Ordering::Relaxed),
            total_retries: self.counters.retries.load(Ordering::Relaxed),
            total_extensions: self.counters.extensions.load(Ordering::Relaxed),
            inevitable_commits: self.counters.inevitable.load(Ordering::Relaxed),
            commit_rate: if finished == 0 {
                1.0
            } else {
                committed as f64 / finished as f64
            },
        }
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("version", &self.current_version())
            .field("inevitable", &self.inevitable.holder())
            .finish()
    }
}
