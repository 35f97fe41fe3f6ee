//! Major (full) garbage collection.
//!
//! Major GC is a non-moving mark-sweep over the old generation:
//! 1. Mark phase: trace from the roots, marking every reachable object
//! 2. Resurrection: objects with a finalizer found unmarked are queued and
//!    marked (with everything they reach) for one more cycle
//! 3. Sweep phase: free every unmarked allocation
//!
//! An object can exist in several versions at once: the committed copy in
//! the shared store and one private copy per segment that wrote it. The
//! [`HeapGraph`] reports the references of all of them, so a reference that
//! only exists in an uncommitted write still keeps its target alive.
//!
//! Mark bits live in a side table; object pages are never written.

use crate::old_gen::{OldGeneration, SweepResult};
use rustc_hash::FxHashSet;
use std::time::Duration;
use strand_core::{ObjRef, Result};

/// Access to the object graph across every version of every object.
pub trait HeapGraph {
    /// Append the references held by any version of `obj` to `out`.
    fn references(&self, obj: ObjRef, out: &mut Vec<ObjRef>) -> Result<()>;
}

/// Result of a major collection.
#[derive(Debug, Default, Clone, Copy)]
pub struct MajorResult {
    /// Objects marked as live.
    pub objects_marked: usize,
    /// Objects kept alive for their finalizer.
    pub objects_resurrected: usize,
    /// Finalized objects reclaimed although still reachable.
    pub objects_condemned: usize,
    /// Outcome of the sweep.
    pub sweep: SweepResult,
    /// Weak references cleared.
    pub weakrefs_cleared: usize,
    /// Pause time.
    pub duration: Duration,
}

/// Mark-sweep collector for the old generation.
#[derive(Default)]
pub struct MajorCollector {
    /// Marked (reachable) objects.
    marked: FxHashSet<ObjRef>,
    /// Gray objects: marked, references not yet traced.
    worklist: Vec<ObjRef>,
    scratch: Vec<ObjRef>,
}

impl MajorCollector {
    /// Create a new major collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear marks from a previous cycle.
    pub fn reset(&mut self) {
        self.marked.clear();
        self.worklist.clear();
    }

    /// Is `obj` marked?
    #[inline]
    pub fn is_marked(&self, obj: ObjRef) -> bool {
        self.marked.contains(&obj)
    }

    /// The mark set.
    pub fn marked(&self) -> &FxHashSet<ObjRef> {
        &self.marked
    }

    /// Number of marked objects.
    pub fn marked_count(&self) -> usize {
        self.marked.len()
    }

    /// Mark `roots` and everything reachable from them. Can be called more
    /// than once per cycle; already marked objects are not traced again.
    pub fn mark(&mut self, roots: impl IntoIterator<Item = ObjRef>, graph: &dyn HeapGraph) -> Result<()> {
        for root in roots {
            self.gray(root);
        }
        while let Some(obj) = self.worklist.pop() {
            self.scratch.clear();
            graph.references(obj, &mut self.scratch)?;
            let found = std::mem::take(&mut self.scratch);
            for child in found.iter() {
                self.gray(*child);
            }
            self.scratch = found;
        }
        Ok(())
    }

    fn gray(&mut self, obj: ObjRef) {
        // young references cannot exist once every nursery is evacuated
        debug_assert!(!obj.is_young(), "young reference during major marking");
        if obj.is_old() && self.marked.insert(obj) {
            self.worklist.push(obj);
        }
    }

    /// Free every unmarked object, and every object in `condemned`.
    pub fn sweep(&self, old: &OldGeneration, condemned: &FxHashSet<ObjRef>) -> SweepResult {
        old.sweep(&self.marked, condemned)
    }
}

impl std::fmt::Debug for MajorCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MajorCollector")
            .field("marked", &self.marked.len())
            .finish()
    }
}
