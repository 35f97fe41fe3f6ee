//! Fork support
//!
//! `fork()` duplicates only the calling thread, so the child inherits
//! segments whose threads no longer exist. [`ForkPreparation`] holds every
//! lock that guards shared state while the process forks; afterwards the
//! parent simply releases it and the child resets the orphaned segments.
//!
//! ```text
//! let prep = handle.prepare_fork();
//! match unsafe { libc::fork() } {
//!     0 => { prep.in_child(); }
//!     _ => prep.in_parent(),
//! }
//! ```

use crate::runtime::Runtime;
use crate::segment::Segment;
use parking_lot::MutexGuard;
use strand_concurrency::WorldGuard;
use strand_core::{SegmentId, StrandError};
use tracing::{debug, info};

/// Every segment but the caller's, plus the commit and collector locks.
pub struct ForkPreparation<'r> {
    runtime: &'r Runtime,
    own: SegmentId,
    world: WorldGuard<'r, Segment>,
    _commit: MutexGuard<'r, ()>,
    _gc: MutexGuard<'r, ()>,
}

impl<'r> ForkPreparation<'r> {
    pub(crate) fn new(
        runtime: &'r Runtime,
        own: SegmentId,
        gc: MutexGuard<'r, ()>,
        world: WorldGuard<'r, Segment>,
        commit: MutexGuard<'r, ()>,
    ) -> Self {
        debug!(own = %own, stopped = world.len(), "ready to fork");
        ForkPreparation {
            runtime,
            own,
            world,
            _commit: commit,
            _gc: gc,
        }
    }

    /// Number of segments held stopped.
    pub fn segments_held(&self) -> usize {
        self.world.len()
    }

    /// Resume normally in the parent.
    pub fn in_parent(self) {
        debug!(own = %self.own, "fork done, parent resumes");
    }

    /// Reset every segment attached to a thread other than the caller's.
    /// Their transactions are aborted, their private pages and nurseries
    /// dropped and their handles invalidated. Returns how many segments
    /// were reset.
    pub fn in_child(mut self) -> usize {
        let runtime = self.runtime;
        let cause = StrandError::Aborted("thread lost in fork".to_string());
        let mut reset = 0;
        for (id, segment) in self.world.iter_mut() {
            if !runtime.pool.is_attached(id) && !segment.in_transaction() {
                continue;
            }
            if let Some(mut txn) = segment.reset(&runtime.old) {
                let _ = runtime.manager.abort(&mut txn, &cause);
            }
            runtime.finalizers.forget_owner(id);
            runtime.finalizer_queues[id.index()].clear();
            runtime.pool.invalidate(id);
            reset += 1;
        }
        let gate = runtime.manager.inevitable();
        gate.reset_except(gate.holder());
        runtime.pool.rebuild_free_list();
        info!(own = %self.own, reset, "runtime reset in forked child");
        reset
    }
}

impl std::fmt::Debug for ForkPreparation<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForkPreparation")
            .field("own", &self.own)
            .field("segments_held", &self.world.len())
            .finish()
    }
}
