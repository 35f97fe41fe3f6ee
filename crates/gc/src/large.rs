//! Large-object allocator
//!
//! First-fit over address-ordered free chunks. Chunks are split on allocation
//! and coalesced with their neighbours on free. The region only grows, in
//! whole pages handed over by the page manager.

use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use strand_core::align_up;

/// Alignment and minimum size of a large chunk.
pub const LARGE_ALIGN: usize = 16;

/// Remainders smaller than this are not split off.
const MIN_SPLIT: usize = 64;

/// First-fit chunk allocator.
#[derive(Default)]
pub struct LargeAllocator {
    free: BTreeMap<u64, usize>,
    allocated: FxHashMap<u64, usize>,
    live_bytes: usize,
    region_bytes: usize,
}

impl LargeAllocator {
    /// Empty allocator with no region.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes in allocated chunks.
    pub fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    /// Bytes handed to the allocator so far.
    pub fn region_bytes(&self) -> usize {
        self.region_bytes
    }

    /// Bytes in free chunks.
    pub fn free_bytes(&self) -> usize {
        self.free.values().sum()
    }

    /// Number of allocated chunks.
    pub fn len(&self) -> usize {
        self.allocated.len()
    }

    /// Is nothing allocated?
    pub fn is_empty(&self) -> bool {
        self.allocated.is_empty()
    }

    /// Add fresh memory `[addr, addr + len)` to the free list.
    pub fn add_region(&mut self, addr: u64, len: usize) {
        self.region_bytes += len;
        self.insert_free(addr, len);
    }

    /// Allocate a chunk of at least `size` bytes.
    pub fn alloc(&mut self, size: usize) -> Option<u64> {
        let size = align_up(size.max(LARGE_ALIGN), LARGE_ALIGN);
        let (addr, len) = self
            .free
            .iter()
            .find(|(_, len)| **len >= size)
            .map(|(a, l)| (*a, *l))?;
        self.free.remove(&addr);
        let taken = if len - size >= MIN_SPLIT {
            self.free.insert(addr + size as u64, len - size);
            size
        } else {
            len
        };
        self.allocated.insert(addr, taken);
        self.live_bytes += taken;
        Some(addr)
    }

    /// Size of the chunk allocated at `addr`.
    pub fn chunk_size(&self, addr: u64) -> Option<usize> {
        self.allocated.get(&addr).copied()
    }

    /// Is `addr` the start of an allocated chunk?
    pub fn is_allocated(&self, addr: u64) -> bool {
        self.allocated.contains_key(&addr)
    }

    /// Free the chunk at `addr`, returning its size.
    pub fn free(&mut self, addr: u64) -> Option<usize> {
        let len = self.allocated.remove(&addr)?;
        self.live_bytes -= len;
        self.insert_free(addr, len);
        Some(len)
    }

    fn insert_free(&mut self, addr: u64, len: usize) {
        let (mut start, mut len) = (addr, len);
        if let Some((&prev, &prev_len)) = self.free.range(..start).next_back() {
            if prev + prev_len as u64 == start {
                self.free.remove(&prev);
                start = prev;
                len += prev_len;
            }
        }
        let end = start + len as u64;
        if let Some(next_len) = self.free.remove(&end) {
            len += next_len;
        }
        self.free.insert(start, len);
    }

    /// Visit every allocated chunk address.
    pub fn for_each_allocated(&self, mut visit: impl FnMut(u64)) {
        for addr in self.allocated.keys() {
            visit(*addr);
        }
    }
}

impl std::fmt::Debug for LargeAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LargeAllocator")
            .field("chunks", &self.allocated.len())
            .field("free_chunks", &self.free.len())
            .field("live_bytes", &self.live_bytes)
            .finish()
    }
}
