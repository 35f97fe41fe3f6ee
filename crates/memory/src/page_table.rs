//! Page ownership table
//!
//! One state per (segment, page). The owning segment moves its own rows
//! between `SharedClean` and `PrivateDirty`; committers of other segments move
//! `PrivateDirty` rows to `RemoteDirty` with a compare-and-swap. Rows are plain
//! atomics so no lock is needed on the read or write barrier.

use std::sync::atomic::{AtomicU8, Ordering};
use strand_core::{PageId, SegmentId};

/// Ownership state of a page as seen by one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PageState {
    /// Never accessed by this segment
    Absent = 0,
    /// Reads go to the shared store
    SharedClean = 1,
    /// The segment holds a private copy with provisional writes
    PrivateDirty = 2,
    /// The segment holds a private copy and the shared page changed since
    RemoteDirty = 3,
}

impl PageState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => PageState::SharedClean,
            2 => PageState::PrivateDirty,
            3 => PageState::RemoteDirty,
            _ => PageState::Absent,
        }
    }

    /// Does the segment hold a private copy?
    pub fn is_private(self) -> bool {
        matches!(self, PageState::PrivateDirty | PageState::RemoteDirty)
    }
}

/// (segment, page) → [`PageState`].
pub struct PageTable {
    segments: usize,
    pages: usize,
    states: Box<[AtomicU8]>,
}

impl PageTable {
    /// Table for `segments` segments over `pages` pages, all `Absent`.
    pub fn new(segments: usize, pages: usize) -> Self {
        let states = (0..segments * pages)
            .map(|_| AtomicU8::new(PageState::Absent as u8))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        PageTable {
            segments,
            pages,
            states,
        }
    }

    #[inline]
    fn slot(&self, segment: SegmentId, page: PageId) -> &AtomicU8 {
        debug_assert!(segment.index() < self.segments && page.index() < self.pages);
        &self.states[segment.index() * self.pages + page.index()]
    }

    /// Number of segments.
    pub fn segments(&self) -> usize {
        self.segments
    }

    /// Current state of `page` for `segment`.
    #[inline]
    pub fn get(&self, segment: SegmentId, page: PageId) -> PageState {
        PageState::from_u8(self.slot(segment, page).load(Ordering::Acquire))
    }

    /// Set the state of one of the caller's own rows.
    #[inline]
    pub fn set(&self, segment: SegmentId, page: PageId, state: PageState) {
        self.slot(segment, page).store(state as u8, Ordering::Release);
    }

    /// Record that the shared copy of `page` changed under `segment`'s
    /// private copy. Returns true when the row transitioned.
    pub fn mark_remote_dirty(&self, segment: SegmentId, page: PageId) -> bool {
        self.slot(segment, page)
            .compare_exchange(
                PageState::PrivateDirty as u8,
                PageState::RemoteDirty as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Mark `page` remote-dirty for every segment except `committer`.
    /// Returns the number of rows that transitioned.
    pub fn mark_remote_dirty_except(&self, committer: SegmentId, page: PageId) -> usize {
        (0..self.segments as u32)
            .map(SegmentId)
            .filter(|s| *s != committer)
            .filter(|s| self.mark_remote_dirty(*s, page))
            .count()
    }

    /// Reset every row of `segment` to `Absent`.
    pub fn reset_segment(&self, segment: SegmentId) {
        let start = segment.index() * self.pages;
        for slot in &self.states[start..start + self.pages] {
            slot.store(PageState::Absent as u8, Ordering::Release);
        }
    }

    /// Number of rows of `segment` holding a private copy.
    pub fn private_pages(&self, segment: SegmentId) -> usize {
        let start = segment.index() * self.pages;
        self.states[start..start + self.pages]
            .iter()
            .filter(|s| PageState::from_u8(s.load(Ordering::Relaxed)).is_private())
            .count()
    }
}

impl std::fmt::Debug for PageTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageTable")
            .field("segments", &self.segments)
            .field("pages", &self.pages)
            .finish()
    }
}
