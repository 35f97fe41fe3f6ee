//! Fork Tests
//!
//! The child keeps only the forking thread: its segment and its running
//! transaction survive, every other segment is reset.

use crate::common::*;
use strand::ObjectKind;

#[test]
fn child_keeps_the_forking_transaction() {
    let strand = with_segments(4);
    let mut forker = strand.attach();
    let mut other = strand.attach();
    let shared = counter(&mut forker, 1);
    let orphan = counter(&mut other, 5);

    let tx_handle = strand.attach();
    let mut tx = tx_handle.begin().unwrap();
    tx.write_u64(shared, 0, 2).unwrap();
    let young = tx.alloc(ObjectKind::OPAQUE, 8).unwrap();
    tx.write_u64(young, 0, 3).unwrap();
    tx.push_root(young);

    let prep = tx_handle.prepare_fork();
    assert_eq!(prep.segments_held(), 3);
    let reset = prep.in_child();
    assert_eq!(reset, 2);

    // the forking transaction is untouched and still commits
    assert_eq!(tx.read_u64(shared, 0).unwrap(), 2);
    assert_eq!(tx.read_u64(young, 0).unwrap(), 3);
    tx.commit().unwrap();
    assert!(tx_handle.is_valid());

    // every other thread is gone
    assert!(!forker.is_valid());
    assert!(!other.is_valid());
    assert!(other.begin().is_err());
    assert_eq!(strand.metrics().segments_attached, 1);

    // their committed objects are still in the heap
    let mut fresh = strand.attach();
    assert_eq!(read_word(&mut fresh, shared), 2);
    assert_eq!(read_word(&mut fresh, orphan), 5);
}

#[test]
fn parent_continues_unchanged() {
    let strand = with_segments(3);
    let mut a = strand.attach();
    let mut b = strand.attach();
    let obj = counter(&mut b, 4);

    a.prepare_fork().in_parent();

    assert!(a.is_valid());
    assert!(b.is_valid());
    assert_eq!(read_word(&mut b, obj), 4);
    assert_eq!(read_word(&mut a, obj), 4);
}
