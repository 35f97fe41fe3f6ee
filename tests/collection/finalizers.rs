//! Finalizer Tests
//!
//! An unreachable object with a finalizer survives one major collection,
//! its callback runs on the registering thread, and the next major
//! collection reclaims it.

use crate::common::*;
use strand::{ObjRef, ObjectKind, Strand, ThreadHandle};

/// Commit an object whose finalizer bumps `log`, then drop its root.
fn finalizable(handle: &mut ThreadHandle, log: ObjRef) -> ObjRef {
    let obj = rooted_object(handle, ObjectKind::OPAQUE, 16);
    handle
        .atomically(|tx| {
            tx.register_finalizer(obj, move |tx, _| {
                let runs = tx.read_u64(log, 0)?;
                tx.write_u64(log, 0, runs + 1)
            })
        })
        .unwrap();
    assert_eq!(handle.pop_root().unwrap(), Some(obj));
    obj
}

fn pending(strand: &Strand, handle: &ThreadHandle) -> usize {
    strand.runtime().finalizer_queue(handle.segment()).len()
}

#[test]
fn unreachable_object_is_finalized_then_freed() {
    let strand = compact();
    let mut handle = strand.attach();
    let log = counter(&mut handle, 0);
    let obj = finalizable(&mut handle, log);

    // first cycle: kept alive and queued
    let first = strand.collect_major().unwrap().unwrap();
    assert_eq!(first.objects_resurrected, 1);
    assert_eq!(pending(&strand, &handle), 1);
    assert!(strand.runtime().old_generation().is_allocated(obj));
    assert_eq!(strand.metrics().finalizers_run, 0);

    // the next transaction on the owning thread runs the callback
    handle.atomically(|_| Ok(())).unwrap();
    assert_eq!(pending(&strand, &handle), 0);
    assert_eq!(read_word(&mut handle, log), 1);
    assert_eq!(strand.metrics().finalizers_run, 1);
    assert!(strand.runtime().old_generation().is_allocated(obj));

    // second cycle: reclaimed, callback not run again
    let second = strand.collect_major().unwrap().unwrap();
    assert_eq!(second.objects_resurrected, 0);
    assert!(second.sweep.objects_freed >= 1);
    assert!(!strand.runtime().old_generation().is_allocated(obj));
    assert_eq!(read_word(&mut handle, log), 1);
}

#[test]
fn reachable_object_is_not_finalized() {
    let strand = compact();
    let mut handle = strand.attach();
    let log = counter(&mut handle, 0);
    let obj = rooted_object(&mut handle, ObjectKind::OPAQUE, 16);
    handle
        .atomically(|tx| {
            tx.register_finalizer(obj, move |tx, _| tx.write_u64(log, 0, 99))
        })
        .unwrap();

    let result = strand.collect_major().unwrap().unwrap();
    assert_eq!(result.objects_resurrected, 0);
    assert_eq!(pending(&strand, &handle), 0);
    assert_eq!(read_word(&mut handle, log), 0);
    assert!(strand.runtime().finalizers().contains(obj));
}

#[test]
fn queued_finalizers_can_be_run_explicitly() {
    let strand = compact();
    let mut handle = strand.attach();
    let log = counter(&mut handle, 0);
    finalizable(&mut handle, log);
    finalizable(&mut handle, log);

    let result = strand.collect_major().unwrap().unwrap();
    assert_eq!(result.objects_resurrected, 2);
    assert_eq!(handle.run_pending_finalizers().unwrap(), 2);
    assert_eq!(handle.run_pending_finalizers().unwrap(), 0);
    assert_eq!(read_word(&mut handle, log), 2);
}

#[test]
fn young_object_finalizer_follows_promotion() {
    let strand = compact();
    let mut handle = strand.attach();
    let log = counter(&mut handle, 0);

    // registered while young, unreachable right after commit
    handle
        .atomically(|tx| {
            let obj = tx.alloc(ObjectKind::OPAQUE, 16)?;
            tx.register_finalizer(obj, move |tx, finalized| {
                assert!(finalized.is_old());
                tx.write_u64(log, 0, 7)
            })
        })
        .unwrap();
    assert_eq!(strand.runtime().finalizers().len(), 1);

    strand.collect_major().unwrap().unwrap();
    assert_eq!(handle.run_pending_finalizers().unwrap(), 1);
    assert_eq!(read_word(&mut handle, log), 7);
}
