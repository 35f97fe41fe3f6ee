//! Core types for the transactional heap
//!
//! This module defines the fundamental identifiers used throughout the system:
//! - [`ObjRef`]: Address of a heap object (old generation or nursery)
//! - [`SegmentId`]: Index of a per-thread memory segment
//! - [`PageId`]: Index of a page of the old-generation region
//!
//! ## Address layout
//!
//! ```text
//! 0                         null
//! [PAGE_SIZE, ...)          old generation, page N covers [N*PAGE_SIZE, (N+1)*PAGE_SIZE)
//! YOUNG_TAG | seg<<40 | off nursery of segment `seg`, offset `off`
//! ```
//!
//! Page 0 is never handed out, so a zero address can only mean null.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of a page, the unit of copy-on-write and replication.
pub const PAGE_SIZE: usize = 4096;

/// Alignment of every object start and every object size.
pub const OBJECT_ALIGN: usize = 8;

/// Maximum number of segments a runtime can be configured with.
pub const MAX_SEGMENTS: usize = 255;

const YOUNG_TAG: u64 = 1 << 62;
const SEGMENT_SHIFT: u32 = 40;
const SEGMENT_MASK: u64 = 0xFF;
const OFFSET_MASK: u64 = (1 << SEGMENT_SHIFT) - 1;

/// Commit version. Monotonically increasing, one per committed transaction.
pub type Version = u64;

/// Transaction identifier, unique per `begin`.
pub type TxnId = u64;

/// Round `value` up to the next multiple of `align` (a power of two).
#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Reference to a heap object.
///
/// Old-generation references are plain byte addresses into the shared heap and
/// are meaningful to every segment. Young references point into the nursery of
/// exactly one segment and are only valid inside that segment until the next
/// minor collection.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ObjRef(u64);

impl ObjRef {
    /// The null reference.
    pub const NULL: ObjRef = ObjRef(0);

    /// Build a reference from its raw encoding (as stored in reference slots).
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        ObjRef(raw)
    }

    /// Raw encoding of this reference.
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Old-generation reference at byte address `addr`.
    #[inline]
    pub fn old(addr: u64) -> Self {
        debug_assert!(addr & YOUNG_TAG == 0, "old address collides with young tag");
        ObjRef(addr)
    }

    /// Young reference into the nursery of `segment`.
    #[inline]
    pub fn young(segment: SegmentId, offset: usize) -> Self {
        debug_assert!((offset as u64) <= OFFSET_MASK);
        ObjRef(YOUNG_TAG | ((segment.0 as u64 & SEGMENT_MASK) << SEGMENT_SHIFT) | offset as u64)
    }

    /// Is this the null reference?
    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Does this reference point into a nursery?
    #[inline]
    pub fn is_young(self) -> bool {
        self.0 & YOUNG_TAG != 0
    }

    /// Does this reference point into the old generation?
    #[inline]
    pub fn is_old(self) -> bool {
        !self.is_null() && !self.is_young()
    }

    /// Segment owning the nursery a young reference points into.
    pub fn young_segment(self) -> Option<SegmentId> {
        if self.is_young() {
            Some(SegmentId(((self.0 >> SEGMENT_SHIFT) & SEGMENT_MASK) as u32))
        } else {
            None
        }
    }

    /// Offset of a young reference inside its nursery.
    #[inline]
    pub fn young_offset(self) -> usize {
        (self.0 & OFFSET_MASK) as usize
    }

    /// Byte address of an old reference.
    #[inline]
    pub fn addr(self) -> u64 {
        self.0
    }

    /// Page holding the first byte (the header) of an old object.
    #[inline]
    pub fn page(self) -> PageId {
        PageId((self.0 / PAGE_SIZE as u64) as u32)
    }

    /// Offset of an old object inside its first page.
    #[inline]
    pub fn page_offset(self) -> usize {
        (self.0 % PAGE_SIZE as u64) as usize
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "ObjRef(null)")
        } else if let Some(seg) = self.young_segment() {
            write!(f, "ObjRef(young {}+{:#x})", seg, self.young_offset())
        } else {
            write!(f, "ObjRef({:#x})", self.0)
        }
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Index of a segment in the runtime's fixed segment pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentId(pub u32);

impl SegmentId {
    /// Index into per-segment tables.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seg{}", self.0)
    }
}

/// Index of a page in the heap address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(pub u32);

impl PageId {
    /// Index into per-page tables.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Address of the first byte of the page.
    #[inline]
    pub fn base(self) -> u64 {
        self.0 as u64 * PAGE_SIZE as u64
    }

    /// Page containing byte address `addr`.
    #[inline]
    pub fn containing(addr: u64) -> Self {
        PageId((addr / PAGE_SIZE as u64) as u32)
    }
}

/// Pages touched by the byte range `[addr, addr + len)`.
pub fn pages_spanned(addr: u64, len: usize) -> impl Iterator<Item = PageId> {
    let first = addr / PAGE_SIZE as u64;
    let last = if len == 0 {
        first
    } else {
        (addr + len as u64 - 1) / PAGE_SIZE as u64
    };
    (first..=last).map(|p| PageId(p as u32))
}
