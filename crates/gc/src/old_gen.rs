//! Old generation
//!
//! The old-generation region is a fixed range of pages. Large chunks grow
//! upward from the bottom of the region while small-object pages are taken
//! downward from the top:
//!
//! ```text
//! first                 large_top     small_bottom                end
//!   | large chunks ...    |   unclaimed    |   ... small pages       |
//! ```
//!
//! Objects never move once here. Space is reclaimed by the major collector's
//! sweep. Segments allocate small objects through an [`AllocCache`] of
//! reserved slots so the region lock is taken once per batch.

use crate::large::LargeAllocator;
use crate::small::{class_size, size_class, SmallAllocator, SIZE_CLASSES, SMALL_MAX};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use strand_core::{ObjRef, PageId, PAGE_SIZE};

/// Slots reserved per cache refill.
const CACHE_BATCH: usize = 16;

struct PageManager {
    large_top: u32,
    small_bottom: u32,
    free_small: Vec<PageId>,
}

impl PageManager {
    fn take_small_page(&mut self) -> Option<PageId> {
        if let Some(page) = self.free_small.pop() {
            return Some(page);
        }
        if self.small_bottom > self.large_top {
            self.small_bottom -= 1;
            return Some(PageId(self.small_bottom));
        }
        None
    }

    fn grow_large(&mut self, pages: u32) -> Option<u64> {
        if self.small_bottom - self.large_top < pages {
            return None;
        }
        let base = PageId(self.large_top).base();
        self.large_top += pages;
        Some(base)
    }

    fn unclaimed_pages(&self) -> usize {
        (self.small_bottom - self.large_top) as usize + self.free_small.len()
    }
}

struct OldSpace {
    pages: PageManager,
    small: SmallAllocator,
    large: LargeAllocator,
}

impl OldSpace {
    fn alloc_large(&mut self, size: usize) -> Option<u64> {
        if let Some(addr) = self.large.alloc(size) {
            return Some(addr);
        }
        let pages = ((size + PAGE_SIZE - 1) / PAGE_SIZE) as u32;
        let base = self.pages.grow_large(pages)?;
        self.large.add_region(base, pages as usize * PAGE_SIZE);
        self.large.alloc(size)
    }

    fn free(&mut self, addr: u64) -> Option<usize> {
        if let Some((size, released)) = self.small.free(addr) {
            if let Some(page) = released {
                self.pages.free_small.push(page);
            }
            return Some(size);
        }
        self.large.free(addr)
    }
}

/// Outcome of a sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepResult {
    /// Objects reclaimed
    pub objects_freed: usize,
    /// Bytes reclaimed
    pub bytes_freed: usize,
    /// Objects still allocated
    pub objects_live: usize,
    /// Bytes still allocated
    pub bytes_live: usize,
}

/// The shared, non-moving old-generation region.
pub struct OldGeneration {
    first_page: u32,
    end_page: u32,
    space: Mutex<OldSpace>,
    watermark: AtomicUsize,
    base_watermark: usize,
}

impl OldGeneration {
    /// Region covering pages `[first_page, end_page)`, collecting once more
    /// than `watermark_pages` pages are committed.
    pub fn new(first_page: u32, end_page: u32, watermark_pages: usize) -> Self {
        OldGeneration {
            first_page,
            end_page,
            space: Mutex::new(OldSpace {
                pages: PageManager {
                    large_top: first_page,
                    small_bottom: end_page,
                    free_small: Vec::new(),
                },
                small: SmallAllocator::new(),
                large: LargeAllocator::new(),
            }),
            watermark: AtomicUsize::new(watermark_pages),
            base_watermark: watermark_pages,
        }
    }

    /// Pages in the region.
    pub fn capacity_pages(&self) -> usize {
        (self.end_page - self.first_page) as usize
    }

    /// Does `addr` fall inside the region?
    pub fn contains(&self, addr: u64) -> bool {
        addr >= PageId(self.first_page).base() && addr < PageId(self.end_page).base()
    }

    /// Allocate `size` bytes (header included) for an object.
    pub fn alloc(&self, size: usize) -> Option<ObjRef> {
        let mut space = self.space.lock();
        let addr = match size_class(size) {
            Some(class) => {
                let OldSpace { pages, small, .. } = &mut *space;
                small
                    .alloc_batch(class, 1, &mut || pages.take_small_page())
                    .pop()?
            }
            None => space.alloc_large(size)?,
        };
        Some(ObjRef::old(addr))
    }

    fn reserve(&self, class: usize, count: usize) -> Vec<u64> {
        let mut space = self.space.lock();
        let OldSpace { pages, small, .. } = &mut *space;
        small.alloc_batch(class, count, &mut || pages.take_small_page())
    }

    /// Return an object's space. Returns the bytes released.
    pub fn free(&self, obj: ObjRef) -> Option<usize> {
        self.space.lock().free(obj.addr())
    }

    /// Is `obj` the start of a live allocation?
    pub fn is_allocated(&self, obj: ObjRef) -> bool {
        let space = self.space.lock();
        space.small.is_allocated(obj.addr()) || space.large.is_allocated(obj.addr())
    }

    /// Pages holding live data: small pages plus the large bytes in use.
    pub fn committed_pages(&self) -> usize {
        let space = self.space.lock();
        space.small.page_count() + (space.large.live_bytes() + PAGE_SIZE - 1) / PAGE_SIZE
    }

    /// Bytes in live allocations.
    pub fn live_bytes(&self) -> usize {
        let space = self.space.lock();
        space.small.live_bytes() + space.large.live_bytes()
    }

    /// Can the region absorb `bytes` of evacuated objects in the worst case?
    ///
    /// Size-class rounding can double an object, and every class may need
    /// one partially used page.
    pub fn can_absorb(&self, bytes: usize) -> bool {
        let space = self.space.lock();
        let available = space.pages.unclaimed_pages() * PAGE_SIZE + space.large.free_bytes();
        available >= bytes * 2 + SIZE_CLASSES * PAGE_SIZE
    }

    /// Current collection threshold in pages.
    pub fn watermark(&self) -> usize {
        self.watermark.load(Ordering::Relaxed)
    }

    /// Is a major collection due?
    pub fn should_collect(&self) -> bool {
        self.committed_pages() > self.watermark()
    }

    /// Recompute the threshold from the pages that survived a collection.
    pub fn update_watermark(&self, growth: f64) -> usize {
        let grown = (self.committed_pages() as f64 * growth) as usize;
        let next = grown.max(self.base_watermark);
        self.watermark.store(next, Ordering::Relaxed);
        next
    }

    /// Free every allocation not in `marked`, plus every allocation in
    /// `condemned` regardless of marking.
    pub fn sweep(&self, marked: &FxHashSet<ObjRef>, condemned: &FxHashSet<ObjRef>) -> SweepResult {
        let mut space = self.space.lock();
        let mut all = Vec::new();
        space.small.for_each_allocated(|a| all.push(a));
        space.large.for_each_allocated(|a| all.push(a));

        let mut result = SweepResult::default();
        for addr in all {
            let obj = ObjRef::old(addr);
            if marked.contains(&obj) && !condemned.contains(&obj) {
                continue;
            }
            if let Some(bytes) = space.free(addr) {
                result.objects_freed += 1;
                result.bytes_freed += bytes;
            }
        }
        result.bytes_live = space.small.live_bytes() + space.large.live_bytes();
        let mut live = 0;
        space.small.for_each_allocated(|_| live += 1);
        result.objects_live = live + space.large.len();
        result
    }
}

impl std::fmt::Debug for OldGeneration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OldGeneration")
            .field("pages", &(self.first_page..self.end_page))
            .field("committed_pages", &self.committed_pages())
            .field("watermark", &self.watermark())
            .finish()
    }
}

/// Segment-local cache of reserved small-object slots.
///
/// Reserved slots count as allocated; the cache must be flushed before a
/// sweep and when its segment is released.
#[derive(Debug)]
pub struct AllocCache {
    slots: Vec<Vec<u64>>,
}

impl AllocCache {
    /// Empty cache.
    pub fn new() -> Self {
        AllocCache {
            slots: (0..SIZE_CLASSES).map(|_| Vec::new()).collect(),
        }
    }

    /// Allocate `size` bytes (header included) in the old generation.
    pub fn alloc(&mut self, old: &OldGeneration, size: usize) -> Option<ObjRef> {
        let Some(class) = size_class(size) else {
            debug_assert!(size > SMALL_MAX);
            return old.alloc(size);
        };
        if self.slots[class].is_empty() {
            let mut batch = old.reserve(class, CACHE_BATCH);
            // hand out lowest addresses first
            batch.reverse();
            self.slots[class] = batch;
        }
        self.slots[class].pop().map(ObjRef::old)
    }

    /// Number of reserved, unused slots.
    pub fn cached(&self) -> usize {
        self.slots.iter().map(Vec::len).sum()
    }

    /// Bytes held in reserved, unused slots.
    pub fn cached_bytes(&self) -> usize {
        self.slots
            .iter()
            .enumerate()
            .map(|(class, s)| s.len() * class_size(class))
            .sum()
    }

    /// Return every reserved slot to the old generation.
    pub fn flush(&mut self, old: &OldGeneration) {
        for class in self.slots.iter_mut() {
            for addr in class.drain(..) {
                old.free(ObjRef::old(addr));
            }
        }
    }

    /// Forget reserved slots without freeing them (the region is being
    /// rebuilt by the caller).
    pub fn clear(&mut self) {
        for class in self.slots.iter_mut() {
            class.clear();
        }
    }
}

impl Default for AllocCache {
    fn default() -> Self {
        Self::new()
    }
}
