//! Nursery Tests
//!
//! Objects survive minor collections that happen in the middle of a
//! transaction, keep their identity hash, and vanish with a rollback.

use crate::common::*;
use std::sync::Arc;
use strand::{FixedSlots, ObjRef, ObjectKind, Transaction};

/// node payload: [next ref][value]
fn node_kind(strand: &strand::Strand) -> ObjectKind {
    strand
        .register_kind(Arc::new(FixedSlots::new("node", vec![0])))
        .unwrap()
}

fn walk(tx: &mut Transaction<'_>, head: ObjRef) -> Result<(usize, u64), strand::StrandError> {
    let (mut len, mut sum) = (0, 0);
    let mut node = head;
    while !node.is_null() {
        len += 1;
        sum += tx.read_u64(node, 8)?;
        node = tx.read_ref(node, 0)?;
    }
    Ok((len, sum))
}

#[test]
fn list_survives_minor_collections_mid_transaction() {
    let strand = compact();
    let node = node_kind(&strand);
    let mut handle = strand.attach();
    const NODES: u64 = 1_000;

    let (len, sum) = handle
        .atomically(|tx| {
            tx.push_root(ObjRef::NULL);
            for i in 0..NODES {
                // allocation may move everything; reload the head afterwards
                let fresh = tx.alloc(node, 16)?;
                let head = tx.root(0).unwrap_or(ObjRef::NULL);
                tx.write_ref(fresh, 0, head)?;
                tx.write_u64(fresh, 8, i)?;
                tx.set_root(0, fresh)?;
            }
            let head = tx.root(0).unwrap_or(ObjRef::NULL);
            walk(tx, head)
        })
        .unwrap();
    assert_eq!(len, NODES as usize);
    assert_eq!(sum, NODES * (NODES - 1) / 2);
    assert!(strand.metrics().minor_collections >= 1);

    // and again from the committed heap
    let head = handle.root(0).unwrap().unwrap();
    assert!(head.is_old());
    let (len, sum) = handle.atomically(|tx| walk(tx, head)).unwrap();
    assert_eq!(len, NODES as usize);
    assert_eq!(sum, NODES * (NODES - 1) / 2);
}

#[test]
fn identity_hash_is_stable_across_promotion() {
    let strand = compact();
    let mut handle = strand.attach();

    let before = handle
        .atomically(|tx| {
            let obj = tx.alloc(ObjectKind::OPAQUE, 8)?;
            let hash = tx.identity_hash(obj)?;
            tx.push_root(obj);
            tx.collect_minor()?;
            let moved = tx.root(0).unwrap_or(ObjRef::NULL);
            assert!(moved.is_old());
            assert_eq!(tx.identity_hash(moved)?, hash);
            Ok(hash)
        })
        .unwrap();

    let obj = handle.root(0).unwrap().unwrap();
    let after = handle.atomically(|tx| tx.identity_hash(obj)).unwrap();
    assert_eq!(after, before);
}

#[test]
fn hash_of_never_hashed_object_uses_its_old_address() {
    let strand = compact();
    let mut handle = strand.attach();
    let a = rooted_object(&mut handle, ObjectKind::OPAQUE, 8);
    let b = rooted_object(&mut handle, ObjectKind::OPAQUE, 8);
    let (ha, hb) = handle
        .atomically(|tx| Ok((tx.identity_hash(a)?, tx.identity_hash(b)?)))
        .unwrap();
    assert_ne!(ha, hb);
    assert_eq!(handle.atomically(|tx| tx.identity_hash(a)).unwrap(), ha);
}

#[test]
fn rollback_frees_promoted_objects() {
    let strand = compact();
    let handle = strand.attach();
    let mut tx = handle.begin().unwrap();
    let obj = tx.alloc(ObjectKind::OPAQUE, 32).unwrap();
    tx.push_root(obj);
    tx.collect_minor().unwrap();
    let promoted = tx.root(0).unwrap();
    assert!(promoted.is_old());
    assert!(strand.runtime().old_generation().is_allocated(promoted));

    tx.abort("changed my mind");
    assert!(!strand.runtime().old_generation().is_allocated(promoted));
    assert_eq!(handle.root_count().unwrap(), 0);
}

#[test]
fn large_objects_skip_the_nursery() {
    let strand = compact();
    let mut handle = strand.attach();
    let threshold = strand.config().large_object_threshold;
    let obj = handle
        .atomically(|tx| {
            let obj = tx.alloc(ObjectKind::OPAQUE, threshold)?;
            assert!(obj.is_old());
            tx.write_u64(obj, threshold - 8, 9)?;
            tx.push_root(obj);
            Ok(obj)
        })
        .unwrap();
    // not moved by the commit
    assert_eq!(handle.root(0).unwrap(), Some(obj));
    let value = handle.atomically(|tx| tx.read_u64(obj, threshold - 8)).unwrap();
    assert_eq!(value, 9);
}
