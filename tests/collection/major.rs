//! Major Collection Tests
//!
//! Reachability from every kind of root, caller-defined layouts, deferral
//! while a segment is busy, and collections triggered by heap growth.

use crate::common::*;
use std::sync::Arc;
use strand::{FixedSlots, GlobalRoots, ObjRef, ObjectKind};

#[test]
fn global_roots_keep_objects_alive() {
    let strand = compact();
    let globals = Arc::new(GlobalRoots::new());
    strand.add_root_provider(globals.clone());

    let mut handle = strand.attach();
    let obj = rooted_object(&mut handle, ObjectKind::OPAQUE, 32);
    globals.push(obj);
    handle.pop_root().unwrap();

    strand.collect_major().unwrap().unwrap();
    assert!(strand.runtime().old_generation().is_allocated(obj));

    globals.set(0, ObjRef::NULL);
    let result = strand.collect_major().unwrap().unwrap();
    assert_eq!(result.sweep.objects_freed, 1);
    assert!(!strand.runtime().old_generation().is_allocated(obj));
}

#[test]
fn only_declared_slots_are_traced() {
    let strand = compact();
    // slot 0 is a reference, the word at offset 8 is plain data
    let pair = strand
        .register_kind(Arc::new(FixedSlots::new("pair", vec![0])))
        .unwrap();
    let mut handle = strand.attach();

    let holder = rooted_object(&mut handle, pair, 16);
    let traced = rooted_object(&mut handle, ObjectKind::OPAQUE, 8);
    let untraced = rooted_object(&mut handle, ObjectKind::OPAQUE, 8);
    handle
        .atomically(|tx| {
            tx.write_ref(holder, 0, traced)?;
            tx.write_u64(holder, 8, untraced.raw())
        })
        .unwrap();
    handle.pop_root().unwrap();
    handle.pop_root().unwrap();
    assert_eq!(handle.root_count().unwrap(), 1);

    strand.collect_major().unwrap().unwrap();
    let old = strand.runtime().old_generation();
    assert!(old.is_allocated(holder));
    assert!(old.is_allocated(traced));
    assert!(!old.is_allocated(untraced));
    assert_eq!(
        handle.atomically(|tx| tx.kind_of(holder)).unwrap(),
        pair
    );
}

#[test]
fn busy_segment_defers_the_collection() {
    let strand = compact();
    let handle = strand.attach();
    let tx = handle.begin().unwrap();

    // the open transaction keeps its segment from reaching a safe point
    assert!(strand.collect_major().unwrap().is_none());
    assert_eq!(strand.runtime().gc_stats().snapshot().major_deferrals, 1);
    assert_eq!(strand.metrics().major_collections, 0);

    tx.abort("let the collector in");
    assert!(strand.collect_major().unwrap().is_some());
    assert_eq!(strand.metrics().major_collections, 1);
}

#[test]
fn heap_growth_triggers_collections() {
    let strand = compact();
    let mut handle = strand.attach();
    let list = rooted_object(&mut handle, ObjectKind::REF_ARRAY, 8);

    for i in 0..1000u64 {
        handle
            .atomically(|tx| {
                let obj = tx.alloc(ObjectKind::OPAQUE, 512)?;
                tx.write_u64(obj, 0, i)?;
                tx.write_ref(list, 0, obj)
            })
            .unwrap();
    }
    assert!(strand.metrics().major_collections >= 1);

    // only the last object is still reachable
    let last = handle.atomically(|tx| tx.read_ref(list, 0)).unwrap();
    assert_eq!(read_word(&mut handle, last), 999);
    strand.collect_major().unwrap().unwrap();
    let metrics = strand.metrics();
    assert!(metrics.objects_swept >= 900);
    assert!(metrics.old_live_bytes < 64 * 1024);
}
