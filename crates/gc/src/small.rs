//! Small-object allocator
//!
//! Objects up to [`SMALL_MAX`] bytes are grouped by 16-byte size class. Each
//! small page holds slots of a single class and keeps an allocation bitmap;
//! freeing the last slot of a page hands the page back to the page manager.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use strand_core::{PageId, PAGE_SIZE};

/// Size-class granularity.
pub const SMALL_GRANULE: usize = 16;

/// Largest object (header included) served by the small allocator.
pub const SMALL_MAX: usize = 1024;

/// Number of size classes.
pub const SIZE_CLASSES: usize = SMALL_MAX / SMALL_GRANULE;

const BITMAP_WORDS: usize = PAGE_SIZE / SMALL_GRANULE / 64;

/// Size class serving objects of `size` bytes.
#[inline]
pub fn size_class(size: usize) -> Option<usize> {
    if size == 0 || size > SMALL_MAX {
        None
    } else {
        Some((size + SMALL_GRANULE - 1) / SMALL_GRANULE - 1)
    }
}

/// Slot size of a class.
#[inline]
pub const fn class_size(class: usize) -> usize {
    (class + 1) * SMALL_GRANULE
}

struct SmallPage {
    class: usize,
    slots: usize,
    allocated: [u64; BITMAP_WORDS],
    free: SmallVec<[u16; 16]>,
}

impl SmallPage {
    fn new(class: usize) -> Self {
        let slots = PAGE_SIZE / class_size(class);
        SmallPage {
            class,
            slots,
            allocated: [0; BITMAP_WORDS],
            // pop() hands out the lowest slot first
            free: (0..slots as u16).rev().collect(),
        }
    }

    fn live(&self) -> usize {
        self.slots - self.free.len()
    }

    fn is_set(&self, slot: usize) -> bool {
        self.allocated[slot / 64] & (1 << (slot % 64)) != 0
    }

    fn set(&mut self, slot: usize, on: bool) {
        if on {
            self.allocated[slot / 64] |= 1 << (slot % 64);
        } else {
            self.allocated[slot / 64] &= !(1 << (slot % 64));
        }
    }
}

/// Size-class allocator over whole pages.
pub struct SmallAllocator {
    pages: FxHashMap<PageId, SmallPage>,
    partial: Vec<Vec<PageId>>,
    live_bytes: usize,
}

impl SmallAllocator {
    /// Empty allocator.
    pub fn new() -> Self {
        SmallAllocator {
            pages: FxHashMap::default(),
            partial: (0..SIZE_CLASSES).map(|_| Vec::new()).collect(),
            live_bytes: 0,
        }
    }

    /// Pages currently owned by the allocator.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Bytes in allocated slots.
    pub fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    /// Allocate up to `count` slots of `class`, taking fresh pages from
    /// `next_page` as needed. Returns the slot addresses (possibly fewer than
    /// `count` when no page is available).
    pub fn alloc_batch(
        &mut self,
        class: usize,
        count: usize,
        next_page: &mut dyn FnMut() -> Option<PageId>,
    ) -> Vec<u64> {
        let mut out = Vec::with_capacity(count);
        while out.len() < count {
            let page_id = match self.partial_page(class) {
                Some(id) => id,
                None => match next_page() {
                    Some(id) => {
                        self.pages.insert(id, SmallPage::new(class));
                        self.partial[class].push(id);
                        id
                    }
                    None => break,
                },
            };
            let Some(page) = self.pages.get_mut(&page_id) else {
                break;
            };
            while out.len() < count {
                let Some(slot) = page.free.pop() else {
                    break;
                };
                let slot = slot as usize;
                page.set(slot, true);
                out.push(page_id.base() + (slot * class_size(class)) as u64);
            }
            if page.free.is_empty() {
                self.partial[class].retain(|p| *p != page_id);
            }
        }
        self.live_bytes += out.len() * class_size(class);
        out
    }

    fn partial_page(&mut self, class: usize) -> Option<PageId> {
        while let Some(&id) = self.partial[class].last() {
            match self.pages.get(&id) {
                Some(page) if page.class == class && !page.free.is_empty() => return Some(id),
                _ => {
                    self.partial[class].pop();
                }
            }
        }
        None
    }

    /// Is `addr` the start of an allocated slot?
    pub fn is_allocated(&self, addr: u64) -> bool {
        let page_id = PageId::containing(addr);
        self.pages
            .get(&page_id)
            .map(|page| {
                let off = (addr - page_id.base()) as usize;
                let size = class_size(page.class);
                off % size == 0 && off / size < page.slots && page.is_set(off / size)
            })
            .unwrap_or(false)
    }

    /// Free the slot at `addr`. Returns the slot size and, when the page
    /// became empty, the page to hand back.
    pub fn free(&mut self, addr: u64) -> Option<(usize, Option<PageId>)> {
        let page_id = PageId::containing(addr);
        let page = self.pages.get_mut(&page_id)?;
        let size = class_size(page.class);
        let off = (addr - page_id.base()) as usize;
        let slot = off / size;
        if off % size != 0 || slot >= page.slots || !page.is_set(slot) {
            return None;
        }
        page.set(slot, false);
        page.free.push(slot as u16);
        self.live_bytes -= size;
        let class = page.class;
        if page.live() == 0 {
            self.pages.remove(&page_id);
            return Some((size, Some(page_id)));
        }
        if page.free.len() == 1 {
            self.partial[class].push(page_id);
        }
        Some((size, None))
    }

    /// Visit every allocated slot address.
    pub fn for_each_allocated(&self, mut visit: impl FnMut(u64)) {
        for (id, page) in &self.pages {
            let size = class_size(page.class);
            for slot in (0..page.slots).filter(|s| page.is_set(*s)) {
                visit(id.base() + (slot * size) as u64);
            }
        }
    }
}

impl Default for SmallAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SmallAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmallAllocator")
            .field("pages", &self.pages.len())
            .field("live_bytes", &self.live_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pages_from(start: u32) -> impl FnMut() -> Option<PageId> {
        let mut next = start;
        move || {
            let id = PageId(next);
            next += 1;
            Some(id)
        }
    }

    #[test]
    fn test_size_classes() {
        assert_eq!(size_class(0), None);
        assert_eq!(size_class(1), Some(0));
        assert_eq!(size_class(16), Some(0));
        assert_eq!(size_class(17), Some(1));
        assert_eq!(size_class(SMALL_MAX), Some(SIZE_CLASSES - 1));
        assert_eq!(size_class(SMALL_MAX + 1), None);
        assert_eq!(class_size(1), 32);
    }

    #[test]
    fn test_batch_fills_page_then_takes_another() {
        let mut small = SmallAllocator::new();
        let mut source = pages_from(10);
        let class = size_class(1024).unwrap();
        let slots = small.alloc_batch(class, 5, &mut source);
        assert_eq!(slots.len(), 5);
        assert_eq!(small.page_count(), 2);
        assert_eq!(slots[0], PageId(10).base());
        assert!(slots.iter().all(|a| small.is_allocated(*a)));
        assert_eq!(small.live_bytes(), 5 * 1024);
    }

    #[test]
    fn test_freeing_last_slot_releases_page() {
        let mut small = SmallAllocator::new();
        let mut source = pages_from(3);
        let slots = small.alloc_batch(size_class(32).unwrap(), 2, &mut source);
        assert_eq!(small.free(slots[0]), Some((32, None)));
        assert_eq!(small.free(slots[1]), Some((32, Some(PageId(3)))));
        assert_eq!(small.page_count(), 0);
        assert_eq!(small.free(slots[1]), None);
    }

    #[test]
    fn test_freed_slot_is_reused() {
        let mut small = SmallAllocator::new();
        let mut source = pages_from(3);
        let class = size_class(64).unwrap();
        let first = small.alloc_batch(class, 3, &mut source);
        small.free(first[1]).unwrap();
        let again = small.alloc_batch(class, 1, &mut source);
        assert_eq!(again, vec![first[1]]);
        assert_eq!(small.page_count(), 1);
    }

    #[test]
    fn test_interior_address_is_not_allocated() {
        let mut small = SmallAllocator::new();
        let mut source = pages_from(1);
        let slots = small.alloc_batch(size_class(48).unwrap(), 1, &mut source);
        assert!(!small.is_allocated(slots[0] + 16));
        assert_eq!(small.free(slots[0] + 16), None);
    }

    proptest! {
        #[test]
        fn prop_live_bytes_track_allocations(sizes in proptest::collection::vec(1usize..=SMALL_MAX, 1..64)) {
            let mut small = SmallAllocator::new();
            let mut source = pages_from(1);
            let mut expected = 0;
            let mut addrs = Vec::new();
            for size in &sizes {
                let class = size_class(*size).unwrap();
                let got = small.alloc_batch(class, 1, &mut source);
                prop_assert_eq!(got.len(), 1);
                expected += class_size(class);
                addrs.push(got[0]);
            }
            prop_assert_eq!(small.live_bytes(), expected);

            let mut unique = addrs.clone();
            unique.sort_unstable();
            unique.dedup();
            prop_assert_eq!(unique.len(), addrs.len());

            for addr in addrs {
                prop_assert!(small.free(addr).is_some());
            }
            prop_assert_eq!(small.live_bytes(), 0);
            prop_assert_eq!(small.page_count(), 0);
        }
    }
}
