//! Core types for the strand runtime
//!
//! This crate defines the vocabulary shared by every layer:
//! - Addresses and identifiers ([`ObjRef`], [`SegmentId`], [`PageId`])
//! - The object header layout ([`ObjectHeader`])
//! - Reference tracing capabilities ([`Traceable`], [`KindRegistry`])
//! - Configuration ([`RuntimeConfig`])
//! - Errors ([`StrandError`])

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod header;
pub mod trace;
pub mod types;

pub use config::RuntimeConfig;
pub use error::{fatal, Result, StrandError};
pub use header::{object_size, ObjectFlags, ObjectHeader, HEADER_SIZE};
pub use trace::{
    FixedSlots, GlobalRoots, KindRegistry, ObjectKind, Opaque, RefArray, RootProvider, Slots,
    Traceable,
};
pub use types::{
    align_up, pages_spanned, ObjRef, PageId, SegmentId, TxnId, Version, MAX_SEGMENTS,
    OBJECT_ALIGN, PAGE_SIZE,
};
