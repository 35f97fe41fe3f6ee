//! Weak Reference Tests
//!
//! A weak reference reports its target until the target is collected,
//! then reports nothing forever.

use crate::common::*;
use strand::{ObjRef, ObjectKind};

/// Commit a rooted holder weakly referencing an unrooted target.
fn holder_with_dead_target(handle: &mut strand::ThreadHandle) -> ObjRef {
    let holder = rooted_object(handle, ObjectKind::OPAQUE, 8);
    let target = rooted_object(handle, ObjectKind::OPAQUE, 8);
    handle
        .atomically(|tx| tx.register_weakref(holder, target))
        .unwrap();
    assert_eq!(handle.pop_root().unwrap(), Some(target));
    holder
}

#[test]
fn weakref_is_cleared_by_major_collection() {
    let strand = compact();
    let mut handle = strand.attach();
    let holder = holder_with_dead_target(&mut handle);
    assert!(handle
        .atomically(|tx| tx.weakref_get(holder))
        .unwrap()
        .is_some());

    let result = strand.collect_major().unwrap().unwrap();
    assert_eq!(result.weakrefs_cleared, 1);
    assert_eq!(handle.atomically(|tx| tx.weakref_get(holder)).unwrap(), None);

    // never live again
    strand.collect_major().unwrap().unwrap();
    assert_eq!(handle.atomically(|tx| tx.weakref_get(holder)).unwrap(), None);
    assert_eq!(strand.metrics().weakrefs_cleared, 1);
}

#[test]
fn strongly_reachable_target_stays() {
    let strand = compact();
    let mut handle = strand.attach();
    let holder = rooted_object(&mut handle, ObjectKind::OPAQUE, 8);
    let list = rooted_object(&mut handle, ObjectKind::REF_ARRAY, 8);

    handle
        .atomically(|tx| {
            let target = tx.alloc(ObjectKind::OPAQUE, 8)?;
            tx.write_ref(list, 0, target)?;
            tx.register_weakref(holder, target)
        })
        .unwrap();
    let target = handle.atomically(|tx| tx.read_ref(list, 0)).unwrap();
    assert!(target.is_old());

    strand.collect_major().unwrap().unwrap();
    assert_eq!(
        handle.atomically(|tx| tx.weakref_get(holder)).unwrap(),
        Some(target)
    );
}

#[test]
fn young_target_dies_with_the_nursery() {
    let strand = compact();
    let mut handle = strand.attach();
    let holder = rooted_object(&mut handle, ObjectKind::OPAQUE, 8);

    handle
        .atomically(|tx| {
            let target = tx.alloc(ObjectKind::OPAQUE, 8)?;
            tx.register_weakref(holder, target)?;
            assert_eq!(tx.weakref_get(holder)?, Some(target));
            Ok(())
        })
        .unwrap();
    // nothing kept the target alive through the commit's minor collection
    assert_eq!(handle.atomically(|tx| tx.weakref_get(holder)).unwrap(), None);
}

#[test]
fn plain_object_is_not_a_weakref() {
    let strand = compact();
    let mut handle = strand.attach();
    let plain = rooted_object(&mut handle, ObjectKind::OPAQUE, 8);
    let err = handle.atomically(|tx| tx.weakref_get(plain)).unwrap_err();
    assert_eq!(err, strand::StrandError::InvalidReference(plain));
}

#[test]
fn reregistration_after_snapshot_conflicts_with_reader() {
    let strand = with_segments(2);
    let mut setup = strand.attach();
    let other = strand.attach();
    let holder = rooted_object(&mut setup, ObjectKind::OPAQUE, 8);
    let first = rooted_object(&mut setup, ObjectKind::OPAQUE, 8);
    let second = rooted_object(&mut setup, ObjectKind::OPAQUE, 8);
    let flag = counter(&mut setup, 0);
    setup
        .atomically(|tx| tx.register_weakref(holder, first))
        .unwrap();

    let mut reader = setup.begin().unwrap();
    assert_eq!(reader.weakref_get(holder).unwrap(), Some(first));

    let mut writer = other.begin().unwrap();
    assert_eq!(writer.read_u64(flag, 0).unwrap(), 0);
    writer.register_weakref(holder, second).unwrap();
    writer.commit().unwrap();

    // acting on the stale target must not commit
    reader.write_u64(flag, 0, 1).unwrap();
    let err = reader.commit().unwrap_err();
    assert!(err.is_conflict(), "unexpected error: {err}");
    assert_eq!(read_word(&mut setup, flag), 0);
    assert_eq!(
        setup.atomically(|tx| tx.weakref_get(holder)).unwrap(),
        Some(second)
    );
}

#[test]
fn reader_never_sees_two_targets() {
    let strand = with_segments(2);
    let mut setup = strand.attach();
    let other = strand.attach();
    let holder = rooted_object(&mut setup, ObjectKind::OPAQUE, 8);
    let first = rooted_object(&mut setup, ObjectKind::OPAQUE, 8);
    let second = rooted_object(&mut setup, ObjectKind::OPAQUE, 8);
    setup
        .atomically(|tx| tx.register_weakref(holder, first))
        .unwrap();

    let mut reader = setup.begin().unwrap();
    assert_eq!(reader.weakref_get(holder).unwrap(), Some(first));
    other
        .begin()
        .and_then(|mut tx| {
            tx.register_weakref(holder, second)?;
            tx.commit()
        })
        .unwrap();

    let err = reader.weakref_get(holder).unwrap_err();
    assert!(err.is_conflict(), "unexpected error: {err}");
}
