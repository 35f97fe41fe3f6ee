//! Finalizers
//!
//! A finalizer is a one-shot callback attached to an object. Committed
//! registrations live in the [`FinalizerTable`] together with the segment that
//! registered them. When a major collection finds a registered object
//! unreachable, the registration is consumed and the object moves to its
//! owner's [`FinalizerQueue`]; queued objects are collection roots until their
//! callback has run.
//!
//! Objects whose callback ran are reclaimed by the next major collection even
//! if the callback made them reachable again.

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use strand_core::{ObjRef, SegmentId};

/// Committed finalizer registrations.
pub struct FinalizerTable<F> {
    entries: Mutex<FxHashMap<ObjRef, (SegmentId, F)>>,
    finalized: Mutex<FxHashSet<ObjRef>>,
}

impl<F> FinalizerTable<F> {
    /// Empty table.
    pub fn new() -> Self {
        FinalizerTable {
            entries: Mutex::new(FxHashMap::default()),
            finalized: Mutex::new(FxHashSet::default()),
        }
    }

    /// Publish committed registrations made by `owner`.
    pub fn publish(&self, owner: SegmentId, entries: impl IntoIterator<Item = (ObjRef, F)>) {
        let mut table = self.entries.lock();
        for (obj, callback) in entries {
            debug_assert!(obj.is_old());
            table.insert(obj, (owner, callback));
        }
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Is the table empty?
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Is a finalizer registered for `obj`?
    pub fn contains(&self, obj: ObjRef) -> bool {
        self.entries.lock().contains_key(&obj)
    }

    /// Remove and return every registration whose object is not live.
    pub fn take_unreachable(&self, is_live: impl Fn(ObjRef) -> bool) -> Vec<(SegmentId, ObjRef, F)> {
        let mut table = self.entries.lock();
        let dead: Vec<ObjRef> = table.keys().copied().filter(|o| !is_live(*o)).collect();
        dead.into_iter()
            .filter_map(|obj| table.remove(&obj).map(|(owner, f)| (owner, obj, f)))
            .collect()
    }

    /// Record that `obj`'s callback has run.
    pub fn mark_finalized(&self, obj: ObjRef) {
        self.finalized.lock().insert(obj);
    }

    /// Objects whose callback has run since the last call.
    pub fn take_finalized(&self) -> FxHashSet<ObjRef> {
        std::mem::take(&mut *self.finalized.lock())
    }

    /// Drop registrations owned by `owner` (its segment was reset).
    pub fn forget_owner(&self, owner: SegmentId) {
        self.entries.lock().retain(|_, (o, _)| *o != owner);
    }
}

impl<F> Default for FinalizerTable<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F> std::fmt::Debug for FinalizerTable<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinalizerTable")
            .field("registered", &self.entries.lock().len())
            .field("finalized", &self.finalized.lock().len())
            .finish()
    }
}

/// Objects of one segment waiting for their finalizer to run.
pub struct FinalizerQueue<F> {
    queue: Mutex<VecDeque<(ObjRef, F)>>,
}

impl<F> FinalizerQueue<F> {
    /// Empty queue.
    pub fn new() -> Self {
        FinalizerQueue {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue an object for finalization.
    pub fn push(&self, obj: ObjRef, callback: F) {
        self.queue.lock().push_back((obj, callback));
    }

    /// Next object to finalize.
    pub fn pop(&self) -> Option<(ObjRef, F)> {
        self.queue.lock().pop_front()
    }

    /// Next object to finalize, left in place. The entry stays a root until
    /// it is popped after its callback committed.
    pub fn front(&self) -> Option<(ObjRef, F)>
    where
        F: Clone,
    {
        self.queue.lock().front().cloned()
    }

    /// Number of queued objects.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Is the queue empty?
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Visit every queued object (collection roots).
    pub fn for_each_object(&self, mut visit: impl FnMut(ObjRef)) {
        for (obj, _) in self.queue.lock().iter() {
            visit(*obj);
        }
    }

    /// Drop every queued object.
    pub fn clear(&self) {
        self.queue.lock().clear();
    }
}

impl<F> Default for FinalizerQueue<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F> std::fmt::Debug for FinalizerQueue<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinalizerQueue")
            .field("queued", &self.queue.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_registrations_are_consumed() {
        let table: FinalizerTable<&'static str> = FinalizerTable::new();
        let a = ObjRef::old(0x1000);
        let b = ObjRef::old(0x2000);
        table.publish(SegmentId(1), [(a, "a"), (b, "b")]);

        let dead = table.take_unreachable(|o| o == a);
        assert_eq!(dead, vec![(SegmentId(1), b, "b")]);
        assert!(table.contains(a));
        assert!(!table.contains(b));

        // single shot: a second pass finds nothing for b
        assert!(table.take_unreachable(|o| o == a).is_empty());
    }

    #[test]
    fn test_finalized_set_is_taken_once() {
        let table: FinalizerTable<()> = FinalizerTable::new();
        let obj = ObjRef::old(0x1000);
        table.mark_finalized(obj);
        assert!(table.take_finalized().contains(&obj));
        assert!(table.take_finalized().is_empty());
    }

    #[test]
    fn test_queue_order_and_roots() {
        let queue = FinalizerQueue::new();
        queue.push(ObjRef::old(0x1000), 1);
        queue.push(ObjRef::old(0x2000), 2);
        let mut roots = Vec::new();
        queue.for_each_object(|o| roots.push(o));
        assert_eq!(roots.len(), 2);
        assert_eq!(queue.front(), Some((ObjRef::old(0x1000), 1)));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some((ObjRef::old(0x1000), 1)));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_forget_owner() {
        let table = FinalizerTable::new();
        table.publish(SegmentId(0), [(ObjRef::old(0x1000), ())]);
        table.publish(SegmentId(1), [(ObjRef::old(0x2000), ())]);
        table.forget_owner(SegmentId(1));
        assert_eq!(table.len(), 1);
    }
}
