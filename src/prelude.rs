//! Convenient imports for Strand.
//!
//! ```
//! use strand::prelude::*;
//!
//! let strand = Strand::builder().compact().open()?;
//! let mut handle = strand.attach();
//! handle.atomically(|tx| tx.alloc(ObjectKind::OPAQUE, 8).map(|_| ()))?;
//! # Ok::<(), strand::Error>(())
//! ```

// Main entry point
pub use crate::runtime::{Strand, StrandBuilder};

// Error handling
pub use crate::error::{Error, Result};

// Transactions
pub use strand_engine::{retry, JobContext, ThreadHandle, Transaction, TransactionQueue};

// Objects
pub use strand_core::{ObjRef, ObjectKind, RootProvider, Traceable};
