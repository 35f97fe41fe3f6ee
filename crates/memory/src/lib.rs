//! Segment memory manager for the strand runtime
//!
//! This crate models copy-on-write over the shared heap explicitly:
//! - [`SharedHeap`]: authoritative committed pages
//! - [`PageTable`]: per (segment, page) ownership state
//! - [`SegmentView`]: a segment's private page copies and write record
//! - [`replicate`]: publication of a segment's writes at commit

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod page_table;
pub mod replication;
pub mod shared;
pub mod view;

pub use page_table::{PageState, PageTable};
pub use replication::{replicate, ReplicationReport};
pub use shared::{SharedHeap, SharedPage};
pub use view::{DirtyRanges, SegmentView};
