//! Transactional runtime for strand
//!
//! This crate ties the layers together into a usable runtime:
//! - [`Runtime`]: the shared heap, segment pool, collectors and global tables
//! - [`ThreadHandle`]: a thread's attachment to a segment and its retry loop
//! - [`Transaction`]: object access with read and write barriers
//! - Collection entry points running minor and major collections at safe points
//! - [`ForkPreparation`]: making the runtime survive `fork()`
//! - [`TransactionQueue`]: transactional jobs drained by worker threads
//!
//! # Example
//!
//! ```
//! use strand_core::{ObjectKind, RuntimeConfig};
//! use strand_engine::Runtime;
//!
//! let runtime = Runtime::open(RuntimeConfig::compact()).unwrap();
//! let mut handle = runtime.attach();
//! let value = handle
//!     .atomically(|tx| {
//!         let obj = tx.alloc(ObjectKind::OPAQUE, 8)?;
//!         tx.write_u64(obj, 0, 42)?;
//!         tx.read_u64(obj, 0)
//!     })
//!     .unwrap();
//! assert_eq!(value, 42);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod collect;
pub mod fork;
pub mod handle;
pub mod metrics;
pub mod queue;
pub mod runtime;
pub mod segment;
pub mod transaction;

pub use fork::ForkPreparation;
pub use handle::{RetryHook, ThreadHandle};
pub use metrics::RuntimeMetrics;
pub use queue::{Job, JobContext, TransactionQueue};
pub use runtime::Runtime;
pub use segment::{Finalizer, Segment};
pub use transaction::{retry, Transaction};
