//! Thread handles
//!
//! A [`ThreadHandle`] is a thread's attachment to one segment. Transactions
//! begin through it, and its shadow stack (the roots it keeps between
//! transactions) lives in that segment. Dropping the handle releases the
//! segment for other threads.
//!
//! # Retry Loop
//!
//! [`ThreadHandle::atomically`] re-executes its body until it commits:
//!
//! ```text
//! loop:
//!   begin
//!   run body
//!     Ok      -> commit; conflict -> retry
//!     Err(e)  -> e retryable?        -> roll back, retry
//!                snapshot still valid? -> roll back, return e
//!                otherwise            -> roll back, retry (the body saw
//!                                        inconsistent state)
//! ```

use crate::runtime::Runtime;
use crate::segment::Segment;
use crate::transaction::Transaction;
use parking_lot::MutexGuard;
use std::cell::Cell;
use std::sync::Arc;
use strand_core::{ObjRef, Result, SegmentId, StrandError};
use strand_gc::MajorResult;
use tracing::{debug, trace, warn};

/// Called before each re-execution with the attempt number that failed and
/// the reason.
pub type RetryHook = Box<dyn FnMut(u32, &StrandError) + Send>;

/// A thread's attachment to a segment.
pub struct ThreadHandle {
    runtime: Arc<Runtime>,
    segment: SegmentId,
    epoch: u64,
    in_transaction: Cell<bool>,
    retry_hook: Option<RetryHook>,
}

impl ThreadHandle {
    pub(crate) fn new(runtime: Arc<Runtime>, segment: SegmentId, epoch: u64) -> Self {
        debug!(segment = %segment, epoch, "thread attached");
        ThreadHandle {
            runtime,
            segment,
            epoch,
            in_transaction: Cell::new(false),
            retry_hook: None,
        }
    }

    /// The runtime this handle belongs to.
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Shared pointer to the runtime.
    pub fn runtime_arc(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Segment this handle is attached to.
    pub fn segment(&self) -> SegmentId {
        self.segment
    }

    /// False once the segment was reset from outside (in a forked child).
    pub fn is_valid(&self) -> bool {
        self.runtime.pool.epoch(self.segment) == self.epoch
    }

    pub(crate) fn set_in_transaction(&self, running: bool) {
        self.in_transaction.set(running);
    }

    fn lock(&self) -> Result<MutexGuard<'_, Segment>> {
        if self.in_transaction.get() {
            return Err(StrandError::InvalidState(
                "a transaction is already running on this handle".to_string(),
            ));
        }
        let guard = self.runtime.pool.segment(self.segment).lock();
        if !self.is_valid() {
            return Err(StrandError::InvalidState(format!(
                "segment {} was reset, the handle is no longer usable",
                self.segment
            )));
        }
        Ok(guard)
    }

    /// Begin a transaction. It runs until committed, aborted or dropped;
    /// only one transaction per handle can run at a time.
    pub fn begin(&self) -> Result<Transaction<'_>> {
        let guard = self.lock()?;
        Transaction::begin(self, guard)
    }

    /// Install a callback run before every re-execution of an
    /// [`atomically`](Self::atomically) body.
    pub fn set_retry_hook(&mut self, hook: impl FnMut(u32, &StrandError) + Send + 'static) {
        self.retry_hook = Some(Box::new(hook));
    }

    /// Remove the retry callback.
    pub fn clear_retry_hook(&mut self) {
        self.retry_hook = None;
    }

    /// Run `body` in a transaction, re-executing it after conflicts and
    /// [`retry`](crate::retry) requests until it commits.
    ///
    /// Pending finalizers of this segment run after the commit.
    ///
    /// # Errors
    /// - The body's error, when it is not retryable
    /// - `RetryLimitExceeded` when the configured limit is reached
    pub fn atomically<T, F>(&mut self, body: F) -> Result<T>
    where
        F: FnMut(&mut Transaction<'_>) -> Result<T>,
    {
        let mut hook = self.retry_hook.take();
        let result = self.run_atomically(hook.as_mut(), body);
        self.retry_hook = hook;
        let value = result?;
        if !self.runtime.finalizer_queue(self.segment).is_empty() {
            if let Err(err) = self.run_pending_finalizers() {
                warn!(segment = %self.segment, error = %err, "running finalizers failed");
            }
        }
        Ok(value)
    }

    fn run_atomically<T, F>(&self, mut hook: Option<&mut RetryHook>, mut body: F) -> Result<T>
    where
        F: FnMut(&mut Transaction<'_>) -> Result<T>,
    {
        let limit = self.runtime.config.retry_limit;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let mut tx = self.begin()?;
            let outcome = match body(&mut tx) {
                Ok(value) => tx.commit().map(|_| value),
                Err(err) => {
                    // a body that saw a torn snapshot may fail in arbitrary
                    // ways; only a consistent failure is reported
                    let err = if err.is_retryable() {
                        err
                    } else {
                        tx.validate().err().unwrap_or(err)
                    };
                    tx.rollback(&err);
                    Err(err)
                }
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() => err,
                Err(err) => return Err(err),
            };
            if limit.is_some_and(|limit| attempt >= limit) {
                debug!(attempts = attempt, error = %err, "retry limit reached");
                return Err(StrandError::RetryLimitExceeded { attempts: attempt });
            }
            self.runtime.manager.record_retry();
            if let Some(hook) = hook.as_mut() {
                hook(attempt, &err);
            }
            trace!(attempt, error = %err, "retrying transaction");
            if err == StrandError::Retry {
                std::thread::yield_now();
            }
        }
    }

    /// Run the finalizers queued for this segment, each in its own
    /// transaction. Returns how many ran.
    ///
    /// A finalizer that fails is logged and not run again.
    pub fn run_pending_finalizers(&self) -> Result<usize> {
        let queue = self.runtime.finalizer_queue(self.segment);
        let mut ran = 0;
        while let Some((obj, finalizer)) = queue.front() {
            let outcome = self.run_atomically(None, |tx| finalizer(tx, obj));
            // queued objects stay roots until their callback finished
            queue.pop();
            if let Err(err) = outcome {
                warn!(object = %obj, error = %err, "finalizer failed");
            }
            self.runtime.finalizers.mark_finalized(obj);
            self.runtime.stats.record_finalizer();
            ran += 1;
        }
        Ok(ran)
    }

    /// Run a major collection with this thread's segment as the caller's.
    /// Returns `None` when it was deferred.
    pub fn collect_major(&self) -> Result<Option<MajorResult>> {
        let mut guard = self.lock()?;
        crate::collect::collect_major(&self.runtime, Some(&mut *guard))
    }

    // =========================================================================
    // Shadow stack outside transactions
    // =========================================================================

    /// Push a root kept across transactions.
    pub fn push_root(&self, obj: ObjRef) -> Result<usize> {
        let mut guard = self.lock()?;
        guard.shadow_stack.push(obj);
        Ok(guard.shadow_stack.len() - 1)
    }

    /// Pop the last root.
    pub fn pop_root(&self) -> Result<Option<ObjRef>> {
        Ok(self.lock()?.shadow_stack.pop())
    }

    /// Root at `index`.
    pub fn root(&self, index: usize) -> Result<Option<ObjRef>> {
        Ok(self.lock()?.shadow_stack.get(index).copied())
    }

    /// Number of roots.
    pub fn root_count(&self) -> Result<usize> {
        Ok(self.lock()?.root_count())
    }

    /// Prepare the runtime for `fork()` from this thread. See
    /// [`Runtime::prepare_fork`].
    pub fn prepare_fork(&self) -> crate::fork::ForkPreparation<'_> {
        self.runtime.prepare_fork(self.segment)
    }
}

impl Drop for ThreadHandle {
    fn drop(&mut self) {
        if !self.is_valid() {
            return;
        }
        let mut guard = self.runtime.pool.segment(self.segment).lock();
        if let Some(mut txn) = guard.rollback(&self.runtime.old) {
            let _ = self
                .runtime
                .manager
                .abort(&mut txn, &StrandError::Aborted("thread detached".to_string()));
        }
        guard.cache.flush(&self.runtime.old);
        guard.shadow_stack.clear();
        guard.saved_stack.clear();
        drop(guard);
        self.runtime.pool.release(self.segment, self.epoch);
        debug!(segment = %self.segment, "thread detached");
    }
}

impl std::fmt::Debug for ThreadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadHandle")
            .field("segment", &self.segment)
            .field("epoch", &self.epoch)
            .field("valid", &self.is_valid())
            .finish()
    }
}
