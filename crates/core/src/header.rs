//! Object header encoding
//!
//! Every object starts with a fixed 24-byte little-endian header:
//!
//! ```text
//! 0..4    size      payload bytes (u32)
//! 4..6    kind      tracing capability id (u16)
//! 6..8    flags     ObjectFlags (u16)
//! 8..16   hash      identity hash, 0 until requested (u64)
//! 16..24  revision  commit version that last published the object (u64)
//! ```
//!
//! The payload follows immediately. Object sizes are rounded to
//! [`OBJECT_ALIGN`](crate::types::OBJECT_ALIGN).

use crate::trace::ObjectKind;
use crate::types::{align_up, Version, OBJECT_ALIGN};
use byteorder::{ByteOrder, LittleEndian};

/// Size of the object header in bytes.
pub const HEADER_SIZE: usize = 24;

/// Byte offset of the identity hash inside the header.
pub const HASH_OFFSET: usize = 8;

/// Byte offset of the revision inside the header.
pub const REVISION_OFFSET: usize = 16;

/// Total footprint of an object with `payload` bytes of payload.
#[inline]
pub const fn object_size(payload: usize) -> usize {
    HEADER_SIZE + align_up(payload, OBJECT_ALIGN)
}

/// Per-object flag bits stored in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ObjectFlags(u16);

impl ObjectFlags {
    /// Object lives in the old generation.
    pub const OLD: ObjectFlags = ObjectFlags(1 << 0);
    /// A finalizer was registered for the object.
    pub const HAS_FINALIZER: ObjectFlags = ObjectFlags(1 << 1);
    /// Object is the holder of a weak reference.
    pub const WEAKREF: ObjectFlags = ObjectFlags(1 << 2);

    /// No flags set.
    pub const fn empty() -> Self {
        ObjectFlags(0)
    }

    /// Raw bits.
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Rebuild from raw bits.
    pub const fn from_bits(bits: u16) -> Self {
        ObjectFlags(bits)
    }

    /// Are all bits of `other` set?
    pub const fn contains(self, other: ObjectFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the bits of `other`.
    pub fn insert(&mut self, other: ObjectFlags) {
        self.0 |= other.0;
    }

    /// Clear the bits of `other`.
    pub fn remove(&mut self, other: ObjectFlags) {
        self.0 &= !other.0;
    }
}

/// Decoded object header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    /// Payload size in bytes
    pub size: u32,
    /// Tracing capability of the payload
    pub kind: ObjectKind,
    /// Generation and registration flags
    pub flags: ObjectFlags,
    /// Identity hash, 0 when never taken
    pub hash: u64,
    /// Version of the commit that last published this object
    pub revision: Version,
}

impl ObjectHeader {
    /// Header of a fresh young object.
    pub fn new(kind: ObjectKind, payload: u32) -> Self {
        ObjectHeader {
            size: payload,
            kind,
            flags: ObjectFlags::empty(),
            hash: 0,
            revision: 0,
        }
    }

    /// Total footprint (header plus aligned payload).
    #[inline]
    pub fn total_size(&self) -> usize {
        object_size(self.size as usize)
    }

    /// Write the header into the first [`HEADER_SIZE`] bytes of `out`.
    pub fn encode(&self, out: &mut [u8]) {
        LittleEndian::write_u32(&mut out[0..4], self.size);
        LittleEndian::write_u16(&mut out[4..6], self.kind.0);
        LittleEndian::write_u16(&mut out[6..8], self.flags.bits());
        LittleEndian::write_u64(&mut out[HASH_OFFSET..HASH_OFFSET + 8], self.hash);
        LittleEndian::write_u64(&mut out[REVISION_OFFSET..REVISION_OFFSET + 8], self.revision);
    }

    /// Read a header from the first [`HEADER_SIZE`] bytes of `bytes`.
    pub fn decode(bytes: &[u8]) -> Self {
        ObjectHeader {
            size: LittleEndian::read_u32(&bytes[0..4]),
            kind: ObjectKind(LittleEndian::read_u16(&bytes[4..6])),
            flags: ObjectFlags::from_bits(LittleEndian::read_u16(&bytes[6..8])),
            hash: LittleEndian::read_u64(&bytes[HASH_OFFSET..HASH_OFFSET + 8]),
            revision: LittleEndian::read_u64(&bytes[REVISION_OFFSET..REVISION_OFFSET + 8]),
        }
    }

    /// Read only the revision field.
    #[inline]
    pub fn read_revision(bytes: &[u8]) -> Version {
        LittleEndian::read_u64(&bytes[REVISION_OFFSET..REVISION_OFFSET + 8])
    }

    /// Overwrite only the revision field.
    #[inline]
    pub fn write_revision(bytes: &mut [u8], revision: Version) {
        LittleEndian::write_u64(&mut bytes[REVISION_OFFSET..REVISION_OFFSET + 8], revision);
    }
}

/// Read a little-endian word from a payload.
#[inline]
pub fn read_word(payload: &[u8], offset: usize) -> u64 {
    LittleEndian::read_u64(&payload[offset..offset + 8])
}

/// Write a little-endian word into a payload.
#[inline]
pub fn write_word(payload: &mut [u8], offset: usize, value: u64) {
    LittleEndian::write_u64(&mut payload[offset..offset + 8], value);
}
