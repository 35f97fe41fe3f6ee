//! Per-segment view of the heap
//!
//! A `SegmentView` redirects a segment's provisional writes into private page
//! copies. The first write to a page copies the shared page (copy-on-write)
//! and marks the row `PrivateDirty`. Every written byte range is remembered so
//! that commit can merge exactly those ranges into the shared store, and so a
//! `RemoteDirty` page can be rebuilt from fresh shared content plus the
//! segment's own writes.
//!
//! Reads through the view see the private copy where one exists and the
//! shared store elsewhere; transactions only read through the view for
//! objects they wrote or created.

use crate::page_table::{PageState, PageTable};
use crate::shared::SharedHeap;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::sync::Arc;
use strand_core::{fatal, PageId, Result, SegmentId, StrandError, ObjRef, PAGE_SIZE};

/// Byte ranges (page-relative, half-open) written on one page.
pub type DirtyRanges = SmallVec<[(u32, u32); 4]>;

/// A segment's private pages and write log.
pub struct SegmentView {
    segment: SegmentId,
    shared: Arc<SharedHeap>,
    table: Arc<PageTable>,
    private: FxHashMap<PageId, Box<[u8]>>,
    dirty: FxHashMap<PageId, DirtyRanges>,
    resyncs: u64,
}

impl SegmentView {
    /// Empty view for `segment`.
    pub fn new(segment: SegmentId, shared: Arc<SharedHeap>, table: Arc<PageTable>) -> Self {
        SegmentView {
            segment,
            shared,
            table,
            private: FxHashMap::default(),
            dirty: FxHashMap::default(),
            resyncs: 0,
        }
    }

    /// Owning segment.
    pub fn segment(&self) -> SegmentId {
        self.segment
    }

    /// The shared store behind this view.
    pub fn shared(&self) -> &Arc<SharedHeap> {
        &self.shared
    }

    /// The page ownership table.
    pub fn table(&self) -> &Arc<PageTable> {
        &self.table
    }

    /// Does the view hold a private copy of `page`?
    pub fn is_private(&self, page: PageId) -> bool {
        self.private.contains_key(&page)
    }

    /// Number of private pages.
    pub fn private_pages(&self) -> usize {
        self.private.len()
    }

    /// Number of `RemoteDirty` pages rebuilt so far.
    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }

    /// Make sure the segment holds an up-to-date private copy of `page`.
    pub fn ensure_private(&mut self, page: PageId) -> Result<()> {
        if self.private.contains_key(&page) {
            if self.table.get(self.segment, page) == PageState::RemoteDirty {
                self.resync(page)?;
            }
            return Ok(());
        }
        let content: Box<[u8]> = self.shared.page(page)?.to_vec().into_boxed_slice();
        self.private.insert(page, content);
        self.table.set(self.segment, page, PageState::PrivateDirty);
        Ok(())
    }

    /// Rebuild a `RemoteDirty` page: fresh shared content overlaid with the
    /// segment's own writes.
    fn resync(&mut self, page: PageId) -> Result<()> {
        let mut fresh = self.shared.page(page)?.to_vec().into_boxed_slice();
        let Some(old) = self.private.get(&page) else {
            fatal("resync of a page without a private copy");
        };
        if let Some(ranges) = self.dirty.get(&page) {
            for &(start, end) in ranges {
                let (start, end) = (start as usize, end as usize);
                fresh[start..end].copy_from_slice(&old[start..end]);
            }
        }
        self.private.insert(page, fresh);
        self.table.set(self.segment, page, PageState::PrivateDirty);
        self.resyncs += 1;
        tracing::trace!(segment = %self.segment, page = page.0, "resynced remote-dirty page");
        Ok(())
    }

    fn check_range(&self, addr: u64, len: usize) -> Result<()> {
        let limit = (self.shared.page_count() * PAGE_SIZE) as u64;
        if addr < PAGE_SIZE as u64 || addr + len as u64 > limit {
            return Err(StrandError::InvalidReference(ObjRef::from_raw(addr)));
        }
        Ok(())
    }

    /// Write `data` at `addr` into private pages, recording the range.
    pub fn write(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        self.check_range(addr, data.len())?;
        let mut done = 0;
        while done < data.len() {
            let at = addr + done as u64;
            let page = PageId::containing(at);
            let off = (at % PAGE_SIZE as u64) as usize;
            let n = (PAGE_SIZE - off).min(data.len() - done);
            self.ensure_private(page)?;
            if let Some(buf) = self.private.get_mut(&page) {
                buf[off..off + n].copy_from_slice(&data[done..done + n]);
            }
            record_range(self.dirty.entry(page).or_default(), off as u32, (off + n) as u32);
            done += n;
        }
        Ok(())
    }

    /// Read `[addr, addr + buf.len())`, private copies first.
    pub fn read(&self, addr: u64, buf: &mut [u8]) -> Result<()> {
        self.check_range(addr, buf.len())?;
        let mut done = 0;
        while done < buf.len() {
            let at = addr + done as u64;
            let page = PageId::containing(at);
            let off = (at % PAGE_SIZE as u64) as usize;
            let n = (PAGE_SIZE - off).min(buf.len() - done);
            match self.private.get(&page) {
                Some(private) => buf[done..done + n].copy_from_slice(&private[off..off + n]),
                None => {
                    self.shared.read(at, &mut buf[done..done + n])?;
                }
            }
            done += n;
        }
        Ok(())
    }

    /// Pages with recorded writes.
    pub fn dirty_pages(&self) -> impl Iterator<Item = PageId> + '_ {
        self.dirty.keys().copied()
    }

    /// Has anything been written since the last commit or discard?
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Private content and written ranges of a dirty page.
    pub(crate) fn dirty_page(&self, page: PageId) -> Option<(&[u8], &DirtyRanges)> {
        let ranges = self.dirty.get(&page)?;
        match self.private.get(&page) {
            Some(content) => Some((content, ranges)),
            None => fatal("written range on a page without a private copy"),
        }
    }

    /// Drop every private page and write record; rows return to
    /// `SharedClean`.
    pub fn discard(&mut self) {
        for page in self.private.keys() {
            self.table.set(self.segment, *page, PageState::SharedClean);
        }
        self.private.clear();
        self.dirty.clear();
    }

    /// Forget all state without touching the page table (the caller resets
    /// the segment's rows itself).
    pub fn reset(&mut self) {
        self.private.clear();
        self.dirty.clear();
    }
}

impl std::fmt::Debug for SegmentView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentView")
            .field("segment", &self.segment)
            .field("private_pages", &self.private.len())
            .field("dirty_pages", &self.dirty.len())
            .finish()
    }
}

/// Add `[start, end)` to a range list, merging overlapping or adjacent ranges.
fn record_range(ranges: &mut DirtyRanges, start: u32, end: u32) {
    let (mut start, mut end) = (start, end);
    ranges.retain(|&mut (s, e)| {
        if s <= end && start <= e {
            start = start.min(s);
            end = end.max(e);
            false
        } else {
            true
        }
    });
    ranges.push((start, end));
}
