//! Collection Integration Tests
//!
//! Nursery evacuation, major collection, weak references, finalizers and
//! the atomicity of page replication.

#[path = "../common/mod.rs"]
mod common;

mod finalizers;
mod major;
mod nursery;
mod replication;
mod weakrefs;
