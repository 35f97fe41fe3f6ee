//! Per-segment state
//!
//! A segment bundles everything one attached thread mutates without
//! synchronization: its private view of the heap, its nursery, the
//! old-generation slots it reserved, the running transaction and the
//! shadow stack of roots. The whole struct sits behind the segment's mutex
//! in the pool; collectors and fork preparation reach it only at safe points.

use crate::transaction::Transaction;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use strand_concurrency::TransactionContext;
use strand_core::{ObjRef, Result, SegmentId, StrandError};
use strand_gc::{AllocCache, MinorCollector, Nursery, OldGeneration, PendingWeakRefs};
use strand_memory::{PageTable, SegmentView, SharedHeap};

/// Callback run in its own transaction once its object became unreachable.
pub type Finalizer = Arc<dyn Fn(&mut Transaction<'_>, ObjRef) -> Result<()> + Send + Sync>;

/// State owned by one segment.
pub struct Segment {
    pub(crate) id: SegmentId,
    pub(crate) view: SegmentView,
    pub(crate) nursery: Nursery,
    pub(crate) cache: AllocCache,
    pub(crate) minor: MinorCollector,
    /// Transaction in progress, if any.
    pub(crate) txn: Option<TransactionContext>,
    pub(crate) shadow_stack: Vec<ObjRef>,
    /// Shadow stack as it was when the transaction began.
    pub(crate) saved_stack: Vec<ObjRef>,
    /// Old objects written since the last minor collection.
    pub(crate) remembered: FxHashSet<ObjRef>,
    pub(crate) weakrefs: PendingWeakRefs,
    /// Finalizers registered by the running transaction.
    pub(crate) finalizers: Vec<(ObjRef, Finalizer)>,
}

impl Segment {
    pub(crate) fn new(
        id: SegmentId,
        heap: Arc<SharedHeap>,
        table: Arc<PageTable>,
        nursery_size: usize,
    ) -> Self {
        Segment {
            id,
            view: SegmentView::new(id, heap, table),
            nursery: Nursery::new(id, nursery_size),
            cache: AllocCache::new(),
            minor: MinorCollector::new(),
            txn: None,
            shadow_stack: Vec::new(),
            saved_stack: Vec::new(),
            remembered: FxHashSet::default(),
            weakrefs: PendingWeakRefs::new(),
            finalizers: Vec::new(),
        }
    }

    /// Segment id.
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Is a transaction running on this segment?
    pub fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    /// Number of shadow-stack entries.
    pub fn root_count(&self) -> usize {
        self.shadow_stack.len()
    }

    pub(crate) fn active(&self) -> Result<&TransactionContext> {
        match &self.txn {
            Some(txn) => Ok(txn),
            None => Err(no_transaction()),
        }
    }

    pub(crate) fn active_mut(&mut self) -> Result<&mut TransactionContext> {
        match &mut self.txn {
            Some(txn) => Ok(txn),
            None => Err(no_transaction()),
        }
    }

    /// Undo everything the running transaction did to this segment and
    /// return its context. Objects it created go back to the old
    /// generation; the shadow stack returns to its state at begin.
    pub(crate) fn rollback(&mut self, old: &OldGeneration) -> Option<TransactionContext> {
        let txn = self.txn.take()?;
        self.view.discard();
        self.nursery.reset();
        for obj in txn.new_objects.iter() {
            old.free(*obj);
        }
        self.remembered.clear();
        self.weakrefs.clear();
        self.finalizers.clear();
        self.shadow_stack = std::mem::take(&mut self.saved_stack);
        Some(txn)
    }

    /// Bookkeeping after a successful commit.
    pub(crate) fn finish_commit(&mut self) {
        self.txn = None;
        self.remembered.clear();
        self.saved_stack.clear();
        debug_assert!(self.weakrefs.is_empty());
        debug_assert!(self.finalizers.is_empty());
    }

    /// Throw away every trace of the thread that used this segment. Used in
    /// a forked child, where that thread no longer exists.
    pub(crate) fn reset(&mut self, old: &OldGeneration) -> Option<TransactionContext> {
        let txn = self.txn.take();
        if let Some(txn) = &txn {
            for obj in txn.new_objects.iter() {
                old.free(*obj);
            }
        }
        self.view.reset();
        self.view.table().reset_segment(self.id);
        self.nursery.reset();
        self.cache.flush(old);
        self.shadow_stack.clear();
        self.saved_stack.clear();
        self.remembered.clear();
        self.weakrefs.clear();
        self.finalizers.clear();
        txn
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("txn", &self.txn.as_ref().map(|t| t.txn_id))
            .field("nursery_used", &self.nursery.used())
            .field("roots", &self.shadow_stack.len())
            .field("remembered", &self.remembered.len())
            .finish()
    }
}

fn no_transaction() -> StrandError {
    StrandError::InvalidState("no transaction is running on this segment".to_string())
}
