//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::Once;
use strand::{ObjRef, ObjectKind, Strand, ThreadHandle};

static TRACING: Once = Once::new();

/// Route runtime logs through the test harness (shown for failing tests).
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

/// Runtime with a small heap, so collections happen during tests.
pub fn compact() -> Strand {
    init_tracing();
    Strand::builder().compact().open().unwrap()
}

/// Runtime with `segments` segments.
pub fn with_segments(segments: usize) -> Strand {
    init_tracing();
    Strand::builder().compact().segments(segments).open().unwrap()
}

/// Commit a zeroed object of `size` bytes and keep it rooted on `handle`.
/// Returns its committed address.
pub fn rooted_object(handle: &mut ThreadHandle, kind: ObjectKind, size: usize) -> ObjRef {
    handle
        .atomically(|tx| {
            let obj = tx.alloc(kind, size)?;
            tx.push_root(obj);
            Ok(())
        })
        .unwrap();
    let top = handle.root_count().unwrap() - 1;
    handle.root(top).unwrap().unwrap()
}

/// Commit a one-word counter holding `value`, rooted on `handle`.
pub fn counter(handle: &mut ThreadHandle, value: u64) -> ObjRef {
    let obj = rooted_object(handle, ObjectKind::OPAQUE, 8);
    handle.atomically(|tx| tx.write_u64(obj, 0, value)).unwrap();
    obj
}

/// Read the word at offset 0 in a fresh transaction.
pub fn read_word(handle: &mut ThreadHandle, obj: ObjRef) -> u64 {
    handle.atomically(|tx| tx.read_u64(obj, 0)).unwrap()
}
