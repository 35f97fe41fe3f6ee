//! Minor (nursery) garbage collection.
//!
//! Minor GC evacuates every reachable young object of one segment into the
//! old generation:
//! 1. Evacuate the young objects referenced by the roots
//! 2. Scan remembered old objects (written since the last minor GC) and
//!    evacuate the young objects they reference
//! 3. Scan each evacuated copy in turn (Cheney's scan), evacuating further
//! 4. Reset the nursery
//!
//! Copies are written through the segment's view, so they live in private
//! pages and become visible to other segments only when the transaction
//! commits. The collection touches nothing outside its segment.
//!
//! ```text
//! ┌──────────────────────────────┐      ┌───────────────────────────────┐
//! │  NURSERY (segment-local)     │      │  OLD GENERATION (private pgs) │
//! │  ┌─────┬─────┬─────┬──────┐  │      │  ┌─────┐     ┌─────┐          │
//! │  │  A  │  B  │  C  │ free │  │ ───▶ │  │  A' │ ... │  C' │          │
//! │  │alive│dead │alive│      │  │      │  └─────┘     └─────┘          │
//! │  └─────┴─────┴─────┴──────┘  │      │                               │
//! └──────────────────────────────┘      └───────────────────────────────┘
//! ```

use crate::nursery::Nursery;
use crate::old_gen::{AllocCache, OldGeneration};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use strand_core::header::{read_word, HEADER_SIZE};
use strand_core::{KindRegistry, ObjRef, ObjectFlags, ObjectHeader, Result, Slots, StrandError};
use strand_memory::SegmentView;

/// Result of a minor collection.
#[derive(Debug, Default, Clone, Copy)]
pub struct MinorResult {
    /// Objects promoted to the old generation.
    pub objects_promoted: usize,
    /// Bytes promoted.
    pub bytes_promoted: usize,
    /// Nursery bytes discarded (dead young objects).
    pub bytes_freed: usize,
    /// Remembered old objects scanned.
    pub remembered_scanned: usize,
    /// Time spent.
    pub duration: Duration,
}

/// Roots of a minor collection. Every slot is updated in place.
pub struct MinorRoots<'a> {
    /// Shadow-stack slots.
    pub stack: &'a mut [ObjRef],
    /// Old objects written since the last minor collection.
    pub remembered: &'a [ObjRef],
    /// Young objects that must survive regardless of reachability
    /// (objects carrying a finalizer).
    pub pinned: &'a mut [ObjRef],
}

/// What a minor collection needs from its segment.
pub struct MinorSpace<'a> {
    /// The segment's nursery.
    pub nursery: &'a mut Nursery,
    /// The segment's private view, receiving the copies.
    pub view: &'a mut SegmentView,
    /// The segment's allocation cache.
    pub cache: &'a mut AllocCache,
    /// The shared old generation.
    pub old: &'a OldGeneration,
    /// Tracing capabilities.
    pub kinds: &'a KindRegistry,
}

/// Copying collector for one segment's nursery.
#[derive(Default)]
pub struct MinorCollector {
    /// Evacuated copies waiting to be scanned (Cheney's scan pointer).
    worklist: VecDeque<ObjRef>,
    /// Forwarding table: young reference → promoted copy.
    forwarding: FxHashMap<ObjRef, ObjRef>,
    /// Copies made by the last collection, in evacuation order.
    promoted: Vec<ObjRef>,
    slots: Slots,
}

impl MinorCollector {
    /// Create a new minor collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Where `young` was evacuated to by the last collection, if it survived.
    pub fn forwarded(&self, young: ObjRef) -> Option<ObjRef> {
        self.forwarding.get(&young).copied()
    }

    /// Forward any reference: old references map to themselves, young ones
    /// to their copy or `None`.
    pub fn forward(&self, obj: ObjRef) -> Option<ObjRef> {
        if obj.is_young() {
            self.forwarded(obj)
        } else {
            Some(obj)
        }
    }

    /// Copies made by the last collection.
    pub fn promoted(&self) -> &[ObjRef] {
        &self.promoted
    }

    /// Run a minor collection.
    pub fn collect(&mut self, space: MinorSpace<'_>, roots: MinorRoots<'_>) -> Result<MinorResult> {
        let start = Instant::now();
        self.worklist.clear();
        self.forwarding.clear();
        self.promoted.clear();

        let MinorSpace {
            nursery,
            view,
            cache,
            old,
            kinds,
        } = space;
        let nursery_used = nursery.used();
        let mut result = MinorResult::default();

        for slot in roots.stack.iter_mut().chain(roots.pinned.iter_mut()) {
            *slot = self.evacuate(*slot, nursery, view, cache, old, &mut result)?;
        }

        for obj in roots.remembered {
            result.remembered_scanned += 1;
            self.scan(*obj, nursery, view, cache, old, kinds, &mut result)?;
        }

        while let Some(obj) = self.worklist.pop_front() {
            self.scan(obj, nursery, view, cache, old, kinds, &mut result)?;
        }

        nursery.reset();
        result.bytes_freed = nursery_used - result.bytes_promoted.min(nursery_used);
        result.duration = start.elapsed();
        tracing::debug!(
            segment = %view.segment(),
            promoted = result.objects_promoted,
            bytes = result.bytes_promoted,
            remembered = result.remembered_scanned,
            "minor collection"
        );
        Ok(result)
    }

    fn evacuate(
        &mut self,
        obj: ObjRef,
        nursery: &Nursery,
        view: &mut SegmentView,
        cache: &mut AllocCache,
        old: &OldGeneration,
        result: &mut MinorResult,
    ) -> Result<ObjRef> {
        if !obj.is_young() {
            return Ok(obj);
        }
        if let Some(copy) = self.forwarding.get(&obj) {
            return Ok(*copy);
        }
        let mut bytes = nursery.object(obj)?.to_vec();
        let mut header = ObjectHeader::decode(&bytes);
        let total = header.total_size();
        let copy = cache.alloc(old, total).ok_or(StrandError::OutOfMemory {
            resource: "old generation",
            requested: total,
        })?;
        header.flags.insert(ObjectFlags::OLD);
        header.encode(&mut bytes[..HEADER_SIZE]);
        view.write(copy.addr(), &bytes)?;

        self.forwarding.insert(obj, copy);
        self.worklist.push_back(copy);
        self.promoted.push(copy);
        result.objects_promoted += 1;
        result.bytes_promoted += total;
        Ok(copy)
    }

    #[allow(clippy::too_many_arguments)]
    fn scan(
        &mut self,
        obj: ObjRef,
        nursery: &Nursery,
        view: &mut SegmentView,
        cache: &mut AllocCache,
        old: &OldGeneration,
        kinds: &KindRegistry,
        result: &mut MinorResult,
    ) -> Result<()> {
        let mut head = [0u8; HEADER_SIZE];
        view.read(obj.addr(), &mut head)?;
        let header = ObjectHeader::decode(&head);
        let mut payload = vec![0u8; header.size as usize];
        view.read(obj.addr() + HEADER_SIZE as u64, &mut payload)?;

        self.slots.clear();
        kinds.slots(header.kind, &payload, &mut self.slots)?;
        let slots = std::mem::take(&mut self.slots);
        for &off in slots.iter() {
            let target = ObjRef::from_raw(read_word(&payload, off));
            if !target.is_young() {
                continue;
            }
            let moved = self.evacuate(target, nursery, view, cache, old, result)?;
            let at = obj.addr() + (HEADER_SIZE + off) as u64;
            view.write(at, &moved.raw().to_le_bytes())?;
        }
        self.slots = slots;
        Ok(())
    }
}

impl std::fmt::Debug for MinorCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MinorCollector")
            .field("forwarded", &self.forwarding.len())
            .field("promoted", &self.promoted.len())
            .finish()
    }
}
