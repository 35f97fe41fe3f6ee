//! Nursery (young generation) with bump-pointer allocation.
//!
//! Each segment owns one nursery. Objects are never shared between segments
//! while young, so the nursery is a plain buffer with no synchronization:
//! ```text
//! top += size;
//! return top - size;
//! ```
//! A minor collection evacuates survivors and resets `top`.

use strand_core::{
    align_up, ObjRef, ObjectHeader, ObjectKind, Result, SegmentId, StrandError, HEADER_SIZE,
    OBJECT_ALIGN,
};

/// Segment-local bump allocator for young objects.
pub struct Nursery {
    segment: SegmentId,
    buf: Vec<u8>,
    top: usize,
}

impl Nursery {
    /// Nursery of `size` bytes for `segment`.
    pub fn new(segment: SegmentId, size: usize) -> Self {
        Nursery {
            segment,
            buf: vec![0u8; size],
            top: 0,
        }
    }

    /// Total capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes handed out since the last reset.
    #[inline]
    pub fn used(&self) -> usize {
        self.top
    }

    /// Bytes still available.
    #[inline]
    pub fn free(&self) -> usize {
        self.buf.len() - self.top
    }

    /// Usage ratio (0.0 to 1.0).
    pub fn usage_ratio(&self) -> f64 {
        self.top as f64 / self.buf.len() as f64
    }

    /// Allocate a zeroed object with a fresh header, or `None` when full.
    pub fn alloc(&mut self, kind: ObjectKind, payload: u32) -> Option<ObjRef> {
        let header = ObjectHeader::new(kind, payload);
        let total = header.total_size();
        debug_assert_eq!(align_up(total, OBJECT_ALIGN), total);
        if total > self.free() {
            return None;
        }
        let offset = self.top;
        self.top += total;
        header.encode(&mut self.buf[offset..offset + HEADER_SIZE]);
        Some(ObjRef::young(self.segment, offset))
    }

    /// Does `obj` point into this nursery's live range?
    #[inline]
    pub fn contains(&self, obj: ObjRef) -> bool {
        obj.young_segment() == Some(self.segment) && obj.young_offset() < self.top
    }

    fn span(&self, obj: ObjRef) -> Result<(usize, usize)> {
        if !self.contains(obj) {
            return Err(StrandError::InvalidReference(obj));
        }
        let start = obj.young_offset();
        let header = ObjectHeader::decode(&self.buf[start..start + HEADER_SIZE]);
        Ok((start, start + header.total_size()))
    }

    /// Header and payload bytes of a young object.
    pub fn object(&self, obj: ObjRef) -> Result<&[u8]> {
        let (start, end) = self.span(obj)?;
        Ok(&self.buf[start..end])
    }

    /// Mutable header and payload bytes of a young object.
    pub fn object_mut(&mut self, obj: ObjRef) -> Result<&mut [u8]> {
        let (start, end) = self.span(obj)?;
        Ok(&mut self.buf[start..end])
    }

    /// Every object allocated since the last reset, in allocation order.
    pub fn objects(&self) -> impl Iterator<Item = ObjRef> + '_ {
        let mut offset = 0;
        std::iter::from_fn(move || {
            if offset >= self.top {
                return None;
            }
            let header = ObjectHeader::decode(&self.buf[offset..offset + HEADER_SIZE]);
            let obj = ObjRef::young(self.segment, offset);
            offset += header.total_size();
            Some(obj)
        })
    }

    /// Discard every young object. Freed bytes are zeroed so new objects
    /// start with a zero payload.
    pub fn reset(&mut self) {
        self.buf[..self.top].fill(0);
        self.top = 0;
    }
}

impl std::fmt::Debug for Nursery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Nursery")
            .field("segment", &self.segment)
            .field("used", &self.top)
            .field("capacity", &self.buf.len())
            .finish()
    }
}
