//! Runtime Integration Tests
//!
//! Transactions across threads: isolation, conflicts, inevitable
//! transactions, retry policy, fork and the transaction queue.

#[path = "../common/mod.rs"]
mod common;

mod conflicts;
mod fork;
mod isolation;
mod queue;
mod retry;
