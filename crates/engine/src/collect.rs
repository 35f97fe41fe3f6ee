//! Collection orchestration
//!
//! The collectors in `strand-gc` work on one structure at a time; this
//! module feeds them the runtime's roots and keeps the side tables (weak
//! references, finalizers, transaction sets) consistent with what moved or
//! died.
//!
//! # Minor Collection
//!
//! Runs on the owning thread with its segment locked:
//! 1. Roots: the shadow stack, the remembered set and every young object
//!    carrying a finalizer
//! 2. Evacuate survivors into the old generation (through the segment's view)
//! 3. Forward pending finalizer and weak-reference registrations
//! 4. Record promoted copies as objects created by the running transaction
//!
//! # Major Collection
//!
//! ```text
//! 1. gc lock (try), then stop every other segment (bounded, may defer)
//! 2. evacuate every nursery, flush every allocation cache
//! 3. mark from roots: providers, shadow stacks, transaction read/write/new
//!    sets, pending finalizer registrations, finalizer queues
//! 4. queue unreachable finalizable objects and mark what they reach
//! 5. clear weak references to unmarked targets
//! 6. sweep, recompute the watermark
//! ```
//!
//! A nursery that cannot be evacuated (the old generation is too full) is
//! scanned instead: every old object referenced by any of its objects is a
//! root.

use crate::runtime::Runtime;
use crate::segment::Segment;
use std::time::Instant;
use strand_core::{ObjRef, ObjectFlags, ObjectHeader, Result, HEADER_SIZE};
use strand_gc::{HeapGraph, MajorCollector, MajorResult, MinorResult, MinorRoots, MinorSpace};
use tracing::{debug, info, warn};

/// Evacuate `segment`'s nursery. The caller checked that the old generation
/// can absorb it.
pub(crate) fn collect_minor(runtime: &Runtime, segment: &mut Segment) -> Result<MinorResult> {
    if segment.nursery.used() == 0 {
        segment.remembered.clear();
        return Ok(MinorResult::default());
    }

    let Segment {
        id,
        view,
        nursery,
        cache,
        minor,
        txn,
        shadow_stack,
        remembered,
        weakrefs,
        finalizers,
        ..
    } = segment;

    let remembered_objects: Vec<ObjRef> = remembered.drain().collect();
    let mut pinned: Vec<ObjRef> = finalizers
        .iter()
        .map(|(obj, _)| *obj)
        .filter(|obj| obj.is_young())
        .collect();

    let result = minor.collect(
        MinorSpace {
            nursery,
            view,
            cache,
            old: &runtime.old,
            kinds: &runtime.kinds,
        },
        MinorRoots {
            stack: shadow_stack,
            remembered: &remembered_objects,
            pinned: &mut pinned,
        },
    )?;

    for (obj, _) in finalizers.iter_mut() {
        if let Some(moved) = minor.forward(*obj) {
            *obj = moved;
        }
    }
    let swept = weakrefs.after_minor(|obj| minor.forward(obj));

    match txn {
        Some(txn) => {
            for copy in minor.promoted() {
                txn.record_new(*copy);
            }
        }
        None if result.objects_promoted > 0 => {
            strand_core::fatal("young objects survived outside a transaction")
        }
        None => {}
    }

    runtime
        .stats
        .record_minor_gc(result.duration, result.objects_promoted, result.bytes_promoted);
    if swept.cleared > 0 {
        debug!(
            segment = %id,
            cleared = swept.cleared,
            "young weak targets died"
        );
    }
    Ok(result)
}

/// Run a major collection. `own` is the caller's segment, already locked by
/// the caller; every other segment is stopped here.
///
/// Returns `None` when another collection is running or a segment could not
/// be stopped in time (the collection is then requested again).
pub(crate) fn collect_major(
    runtime: &Runtime,
    own: Option<&mut Segment>,
) -> Result<Option<MajorResult>> {
    let Some(_gc) = runtime.gc_lock.try_lock() else {
        debug!("major collection already running");
        return Ok(None);
    };
    let own_id = own.as_ref().map(|s| s.id);
    let Some(mut world) = runtime.safe_point.stop(&runtime.pool, own_id) else {
        runtime.stats.record_deferral();
        runtime.request_major();
        return Ok(None);
    };

    let start = Instant::now();
    let mut segments: Vec<&mut Segment> = world.iter_mut().map(|(_, s)| s).chain(own).collect();
    let mut result = MajorResult::default();

    // 1. Empty the nurseries
    let mut scanned_nurseries = 0;
    for segment in segments.iter_mut() {
        let used = segment.nursery.used();
        if used > 0 && runtime.old.can_absorb(used) {
            collect_minor(runtime, segment)?;
        } else if used > 0 {
            scanned_nurseries += 1;
        }
        segment.cache.flush(&runtime.old);
    }

    // 2. Mark
    let roots = gather_roots(runtime, &segments)?;
    let mut major = MajorCollector::new();
    let condemned;
    {
        let graph = HeapSnapshot {
            runtime,
            segments: &segments,
        };
        major.mark(roots, &graph)?;

        // 3. Resurrect unreachable finalizable objects for one more cycle
        let unreachable = runtime.finalizers.take_unreachable(|obj| major.is_marked(obj));
        let mut resurrected = Vec::with_capacity(unreachable.len());
        for (owner, obj, callback) in unreachable {
            resurrected.push(obj);
            runtime.finalizer_queues[owner.index()].push(obj, callback);
        }
        result.objects_resurrected = resurrected.len();
        major.mark(resurrected, &graph)?;

        condemned = runtime.finalizers.take_finalized();
        for obj in condemned.iter().filter(|o| major.is_marked(**o)) {
            warn!(object = %obj, "finalized object is reachable again, reclaiming it anyway");
            result.objects_condemned += 1;
        }
    }

    // 4. Weak references
    let is_live = |obj: ObjRef| major.is_marked(obj) && !condemned.contains(&obj);
    let weak = runtime.weakrefs.process_major(is_live);
    result.weakrefs_cleared = weak.cleared;
    for segment in segments.iter_mut() {
        result.weakrefs_cleared += segment.weakrefs.after_major(is_live).cleared;
    }

    // 5. Sweep
    result.objects_marked = major.marked_count();
    result.sweep = major.sweep(&runtime.old, &condemned);
    let watermark = runtime.old.update_watermark(runtime.config.major_growth);
    runtime.major_requested.store(false, std::sync::atomic::Ordering::Relaxed);
    result.duration = start.elapsed();

    runtime.stats.record_major_gc(
        result.duration,
        result.sweep.objects_freed,
        result.sweep.bytes_freed,
        result.weakrefs_cleared,
    );
    info!(
        marked = result.objects_marked,
        freed = result.sweep.objects_freed,
        bytes_freed = result.sweep.bytes_freed,
        resurrected = result.objects_resurrected,
        weakrefs_cleared = result.weakrefs_cleared,
        scanned_nurseries,
        watermark,
        pause_us = result.duration.as_micros() as u64,
        "major collection"
    );
    Ok(Some(result))
}

fn gather_roots(runtime: &Runtime, segments: &[&mut Segment]) -> Result<Vec<ObjRef>> {
    let mut roots = Vec::new();
    for provider in runtime.roots.read().iter() {
        provider.roots(&mut |obj| roots.push(obj));
    }
    for queue in runtime.finalizer_queues.iter() {
        queue.for_each_object(|obj| roots.push(obj));
    }
    for segment in segments {
        roots.extend(segment.shadow_stack.iter().copied());
        roots.extend(segment.saved_stack.iter().copied());
        roots.extend(segment.finalizers.iter().map(|(obj, _)| *obj));
        if let Some(txn) = &segment.txn {
            // a running transaction may hold anything it read in a local
            roots.extend(txn.read_set.iter().copied());
            roots.extend(txn.write_set.iter().copied());
            roots.extend(txn.new_objects.iter().copied());
        }
        // objects left in a nursery keep their old targets alive
        let mut refs = Vec::new();
        for young in segment.nursery.objects() {
            let bytes = segment.nursery.object(young)?;
            let header = ObjectHeader::decode(bytes);
            runtime
                .kinds
                .references(header.kind, &bytes[HEADER_SIZE..], &mut refs)?;
        }
        roots.extend(refs);
    }
    roots.retain(|obj| obj.is_old());
    Ok(roots)
}

/// Every version of every object: the committed copy plus the private copy
/// of each segment whose transaction owns it.
struct HeapSnapshot<'a, 'w> {
    runtime: &'a Runtime,
    segments: &'a [&'w mut Segment],
}

impl HeapSnapshot<'_, '_> {
    fn trace_version(
        &self,
        obj: ObjRef,
        read: impl Fn(u64, &mut [u8]) -> Result<()>,
        out: &mut Vec<ObjRef>,
    ) -> Result<()> {
        let mut head = [0u8; HEADER_SIZE];
        read(obj.addr(), &mut head)?;
        let header = ObjectHeader::decode(&head);
        if header.size == 0 || !header.flags.contains(ObjectFlags::OLD) {
            return Ok(());
        }
        let mut payload = vec![0u8; header.size as usize];
        read(obj.addr() + HEADER_SIZE as u64, &mut payload)?;
        self.runtime.kinds.references(header.kind, &payload, out)
    }
}

impl HeapGraph for HeapSnapshot<'_, '_> {
    fn references(&self, obj: ObjRef, out: &mut Vec<ObjRef>) -> Result<()> {
        let start = out.len();
        let mut created_privately = false;
        for segment in self.segments.iter() {
            let Some(txn) = &segment.txn else { continue };
            if !txn.owns(obj) {
                continue;
            }
            created_privately |= txn.is_new(obj);
            self.trace_version(obj, |addr, buf| segment.view.read(addr, buf), out)?;
        }
        // a new object's committed bytes belong to whatever used the
        // address before
        if !created_privately {
            self.trace_version(
                obj,
                |addr, buf| self.runtime.heap.read(addr, buf).map(|_| ()),
                out,
            )?;
        }
        // young targets are covered by the nursery scan
        let mut index = start;
        while index < out.len() {
            if out[index].is_old() {
                index += 1;
            } else {
                out.swap_remove(index);
            }
        }
        Ok(())
    }
}

/// Objects reachable from `roots` in `segment`'s view of the heap. Used by
/// tests and diagnostics.
#[cfg(test)]
pub(crate) fn reachable_from(
    runtime: &Runtime,
    segment: &mut Segment,
    roots: &[ObjRef],
) -> Result<rustc_hash::FxHashSet<ObjRef>> {
    let segments = [segment];
    let graph = HeapSnapshot {
        runtime,
        segments: &segments,
    };
    let mut major = MajorCollector::new();
    major.mark(roots.iter().copied(), &graph)?;
    Ok(major.marked().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use strand_core::{ObjectKind, RuntimeConfig};

    fn runtime() -> Arc<Runtime> {
        Runtime::open(RuntimeConfig::compact()).unwrap()
    }

    #[test]
    fn test_minor_promotes_rooted_objects_into_the_transaction() {
        let runtime = runtime();
        let handle = runtime.attach();
        let mut tx = handle.begin().unwrap();
        let list = tx.alloc(ObjectKind::REF_ARRAY, 16).unwrap();
        let leaf = tx.alloc(ObjectKind::OPAQUE, 8).unwrap();
        tx.write_u64(leaf, 0, 77).unwrap();
        tx.write_ref(list, 0, leaf).unwrap();
        tx.alloc(ObjectKind::OPAQUE, 64).unwrap(); // garbage
        tx.push_root(list);

        let result = tx.collect_minor().unwrap();
        assert_eq!(result.objects_promoted, 2);

        let list = tx.root(0).unwrap();
        assert!(list.is_old());
        let leaf = tx.read_ref(list, 0).unwrap();
        assert!(leaf.is_old());
        assert_eq!(tx.read_u64(leaf, 0).unwrap(), 77);
        assert_eq!(tx.pending_operations().new_objects, 2);
    }

    #[test]
    fn test_heap_snapshot_sees_private_references() {
        let runtime = runtime();
        let handle = runtime.attach();
        let mut tx = handle.begin().unwrap();
        let list = tx.alloc(ObjectKind::REF_ARRAY, 8).unwrap();
        let leaf = tx.alloc(ObjectKind::OPAQUE, 8).unwrap();
        tx.write_ref(list, 0, leaf).unwrap();
        tx.push_root(list);
        tx.collect_minor().unwrap();
        let list = tx.root(0).unwrap();
        let leaf = tx.read_ref(list, 0).unwrap();

        let reachable = tx.with_segment(|runtime, segment| reachable_from(runtime, segment, &[list]));
        let reachable = reachable.unwrap();
        assert!(reachable.contains(&list));
        assert!(reachable.contains(&leaf));
    }

    #[test]
    fn test_major_frees_unreachable_committed_objects() {
        let runtime = runtime();
        let mut handle = runtime.attach();
        handle
            .atomically(|tx| {
                let kept = tx.alloc(ObjectKind::OPAQUE, 32)?;
                let dropped = tx.alloc(ObjectKind::OPAQUE, 32)?;
                tx.push_root(kept);
                tx.push_root(dropped);
                Ok(())
            })
            .unwrap();
        let dropped = handle.pop_root().unwrap().unwrap();
        let kept = handle.root(0).unwrap().unwrap();
        assert!(runtime.old_generation().is_allocated(dropped));

        let result = handle.collect_major().unwrap().unwrap();
        assert_eq!(result.sweep.objects_freed, 1);
        assert!(runtime.old_generation().is_allocated(kept));
        assert!(!runtime.old_generation().is_allocated(dropped));
        assert_eq!(runtime.gc_stats().snapshot().major_collections, 1);
    }

    #[test]
    fn test_objects_read_by_a_running_transaction_survive_major() {
        let runtime = runtime();
        let mut handle = runtime.attach();
        handle
            .atomically(|tx| {
                let obj = tx.alloc(ObjectKind::OPAQUE, 8)?;
                tx.write_u64(obj, 0, 7)?;
                tx.push_root(obj);
                Ok(())
            })
            .unwrap();
        let obj = handle.pop_root().unwrap().unwrap();

        let mut tx = handle.begin().unwrap();
        assert_eq!(tx.read_u64(obj, 0).unwrap(), 7);
        let result = tx
            .with_segment(|runtime, segment| collect_major(runtime, Some(segment)))
            .unwrap()
            .unwrap();
        assert_eq!(result.sweep.objects_freed, 0);
        assert!(runtime.old_generation().is_allocated(obj));

        // promotions must not land on the object's slot
        for _ in 0..16 {
            let fresh = tx.alloc(ObjectKind::OPAQUE, 8).unwrap();
            tx.write_u64(fresh, 0, 1000).unwrap();
            tx.push_root(fresh);
        }
        tx.collect_minor().unwrap();
        assert_eq!(tx.read_u64(obj, 0).unwrap(), 7);
        tx.commit().unwrap();

        // unreachable once the reader is gone
        let result = handle.collect_major().unwrap().unwrap();
        assert!(result.sweep.objects_freed >= 1);
        assert!(!runtime.old_generation().is_allocated(obj));
    }
}
