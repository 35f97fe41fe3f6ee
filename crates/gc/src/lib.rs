//! Generational memory management for the strand runtime
//!
//! # Architecture
//!
//! - **Nursery**: per-segment bump allocation, evacuated by minor GC
//! - **Old generation**: non-moving region split between a size-class
//!   allocator (small objects) and a first-fit allocator (large objects)
//! - **Minor GC**: segment-local copying collection into private pages
//! - **Major GC**: mark-sweep over every version of every object, run at a
//!   safe point
//! - **Weak references and finalizers**: identity-keyed registrations
//!   processed by both collectors

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod finalizer;
pub mod hash;
pub mod large;
pub mod major;
pub mod minor;
pub mod nursery;
pub mod old_gen;
pub mod small;
pub mod stats;
pub mod weakref;

pub use finalizer::{FinalizerQueue, FinalizerTable};
pub use hash::{address_hash, identity_hash};
pub use large::LargeAllocator;
pub use major::{HeapGraph, MajorCollector, MajorResult};
pub use minor::{MinorCollector, MinorResult, MinorRoots, MinorSpace};
pub use nursery::Nursery;
pub use old_gen::{AllocCache, OldGeneration, SweepResult};
pub use small::{size_class, SmallAllocator, SMALL_MAX};
pub use stats::{GcSnapshot, GcStats};
pub use weakref::{PendingWeakRefs, WeakRegistry, WeakSweep, WeakTarget};
