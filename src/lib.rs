//! # Strand
//!
//! Software transactional memory with an integrated generational garbage
//! collector.
//!
//! Threads attach to a shared heap and run transactions over heap objects.
//! Each transaction works on a private copy-on-write view of the heap and
//! publishes its writes atomically at commit; conflicting transactions are
//! re-executed. Young objects live in a per-thread nursery and are promoted
//! at commit or when the nursery fills; a stop-the-world major collection
//! reclaims old objects no version of the heap references.
//!
//! ## Quick Start
//!
//! ```
//! use strand::prelude::*;
//!
//! let strand = Strand::open()?;
//! let mut handle = strand.attach();
//!
//! let total = handle.atomically(|tx| {
//!     let list = tx.alloc(ObjectKind::REF_ARRAY, 16)?;
//!     let item = tx.alloc(ObjectKind::OPAQUE, 8)?;
//!     tx.write_u64(item, 0, 21)?;
//!     tx.write_ref(list, 0, item)?;
//!     let item = tx.read_ref(list, 0)?;
//!     Ok(tx.read_u64(item, 0)? * 2)
//! })?;
//! assert_eq!(total, 42);
//! # Ok::<(), strand::Error>(())
//! ```
//!
//! ## Concepts
//!
//! - [`Strand`] - the runtime; hands out [`ThreadHandle`]s
//! - [`ThreadHandle::atomically`] - run a closure as a transaction until it
//!   commits
//! - [`Transaction`] - object access with read and write barriers, weak
//!   references, finalizers and the shadow stack of roots
//! - [`TransactionQueue`] - transactional jobs drained by worker threads
//! - [`ForkPreparation`] - keeping the runtime consistent across `fork()`

#![warn(missing_docs)]

mod error;
mod runtime;

pub mod prelude;

// Re-export main entry points
pub use error::{Error, Result};
pub use runtime::{Strand, StrandBuilder, StrandMetrics};

// Re-export the runtime surface
pub use strand_core::{
    FixedSlots, GlobalRoots, ObjRef, ObjectKind, Opaque, RefArray, RootProvider, RuntimeConfig,
    SegmentId, Slots, StrandError, Traceable, Version,
};
pub use strand_engine::{
    retry, Finalizer, ForkPreparation, Job, JobContext, RetryHook, ThreadHandle, Transaction,
    TransactionQueue,
};
pub use strand_gc::MajorResult;
