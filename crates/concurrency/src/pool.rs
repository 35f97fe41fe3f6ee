//! Segment pool
//!
//! A fixed set of segments is created when the runtime opens; concurrency is
//! capped by their number. A thread attaches to a free segment, keeps it for
//! as long as it runs transactions and releases it when done. Segment state
//! sits behind one mutex per segment: the attached thread holds it while it
//! runs, and other threads take it only at safe points.
//!
//! Every segment carries an epoch. Resetting a segment from outside (after a
//! fork) bumps the epoch so that handles attached before the reset become
//! inert.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use strand_core::{Result, SegmentId, StrandError};

/// Fixed pool of segments of type `S`.
pub struct SegmentPool<S> {
    segments: Vec<Mutex<S>>,
    epochs: Vec<AtomicU64>,
    attached: Vec<AtomicBool>,
    free: Mutex<VecDeque<SegmentId>>,
    available: Condvar,
}

impl<S> SegmentPool<S> {
    /// Pool over `segments`; segment `i` gets id `i`.
    pub fn new(segments: Vec<S>) -> Self {
        let count = segments.len();
        SegmentPool {
            segments: segments.into_iter().map(Mutex::new).collect(),
            epochs: (0..count).map(|_| AtomicU64::new(0)).collect(),
            attached: (0..count).map(|_| AtomicBool::new(false)).collect(),
            free: Mutex::new((0..count as u32).map(SegmentId).collect()),
            available: Condvar::new(),
        }
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Is the pool empty?
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The lock around one segment.
    ///
    /// # Panics
    /// If `id` is not a segment of this pool.
    pub fn segment(&self, id: SegmentId) -> &Mutex<S> {
        &self.segments[id.index()]
    }

    /// Ids of every segment.
    pub fn ids(&self) -> impl Iterator<Item = SegmentId> {
        (0..self.segments.len() as u32).map(SegmentId)
    }

    /// Number of unattached segments.
    pub fn free_count(&self) -> usize {
        self.free.lock().len()
    }

    /// Is a thread attached to `id`?
    pub fn is_attached(&self, id: SegmentId) -> bool {
        self.attached[id.index()].load(Ordering::Acquire)
    }

    /// Current epoch of `id`.
    pub fn epoch(&self, id: SegmentId) -> u64 {
        self.epochs[id.index()].load(Ordering::Acquire)
    }

    fn take(&self, free: &mut VecDeque<SegmentId>) -> Option<(SegmentId, u64)> {
        let id = free.pop_front()?;
        self.attached[id.index()].store(true, Ordering::Release);
        Some((id, self.epoch(id)))
    }

    /// Attach to a free segment, blocking until one is released. Returns the
    /// segment and its epoch.
    pub fn attach(&self) -> (SegmentId, u64) {
        let mut free = self.free.lock();
        loop {
            if let Some(taken) = self.take(&mut free) {
                return taken;
            }
            self.available.wait(&mut free);
        }
    }

    /// Attach to a free segment without blocking.
    ///
    /// # Errors
    /// `OutOfMemory { resource: "segment" }` when every segment is attached.
    pub fn try_attach(&self) -> Result<(SegmentId, u64)> {
        let mut free = self.free.lock();
        self.take(&mut free).ok_or(StrandError::OutOfMemory {
            resource: "segment",
            requested: 1,
        })
    }

    /// Attach to a free segment, waiting at most `timeout`.
    pub fn attach_timeout(&self, timeout: Duration) -> Result<(SegmentId, u64)> {
        let deadline = Instant::now() + timeout;
        let mut free = self.free.lock();
        loop {
            if let Some(taken) = self.take(&mut free) {
                return Ok(taken);
            }
            if self.available.wait_until(&mut free, deadline).timed_out() {
                return self.take(&mut free).ok_or(StrandError::OutOfMemory {
                    resource: "segment",
                    requested: 1,
                });
            }
        }
    }

    /// Return a segment to the pool. `epoch` must be the epoch returned at
    /// attach; a stale epoch (the segment was reset meanwhile) is ignored.
    pub fn release(&self, id: SegmentId, epoch: u64) -> bool {
        if self.epoch(id) != epoch {
            return false;
        }
        let mut free = self.free.lock();
        self.attached[id.index()].store(false, Ordering::Release);
        free.push_back(id);
        drop(free);
        self.available.notify_one();
        true
    }

    /// Invalidate handles attached to `id` and mark it unattached. The
    /// caller rebuilds the free list.
    pub fn invalidate(&self, id: SegmentId) {
        self.epochs[id.index()].fetch_add(1, Ordering::AcqRel);
        self.attached[id.index()].store(false, Ordering::Release);
    }

    /// Rebuild the free list from the attachment flags.
    pub fn rebuild_free_list(&self) {
        let mut free = self.free.lock();
        free.clear();
        free.extend(self.ids().filter(|id| !self.is_attached(*id)));
        drop(free);
        self.available.notify_all();
    }
}

impl<S> std::fmt::Debug for SegmentPool<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentPool")
            .field("segments", &self.segments.len())
            .field("free", &self.free.lock().len())
            .finish()
    }
}
