//! Isolation Tests
//!
//! Concurrent transactions never lose updates and never see each other's
//! uncommitted writes.

use crate::common::*;
use std::sync::{Arc, Barrier};
use std::thread;
use strand::ObjectKind;

#[test]
fn concurrent_increments_are_never_lost() {
    let strand = with_segments(5);
    let mut main = strand.attach();
    let obj = counter(&mut main, 0);

    const THREADS: usize = 4;
    const INCREMENTS: u64 = 200;
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let strand = strand.clone();
            thread::spawn(move || {
                let mut handle = strand.attach();
                for _ in 0..INCREMENTS {
                    handle
                        .atomically(|tx| {
                            let value = tx.read_u64(obj, 0)?;
                            tx.write_u64(obj, 0, value + 1)
                        })
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(read_word(&mut main, obj), THREADS as u64 * INCREMENTS);
    let metrics = strand.metrics();
    assert!(metrics.transactions_committed >= THREADS as u64 * INCREMENTS);
    assert_eq!(metrics.retries, metrics.conflicts);
}

#[test]
fn disjoint_writers_never_conflict() {
    let strand = with_segments(5);
    let mut main = strand.attach();
    // neighbouring objects share pages
    let objects: Vec<_> = (0..4).map(|_| counter(&mut main, 0)).collect();

    let handles: Vec<_> = objects
        .iter()
        .map(|&obj| {
            let strand = strand.clone();
            thread::spawn(move || {
                let mut handle = strand.attach();
                for _ in 0..100 {
                    handle
                        .atomically(|tx| {
                            let value = tx.read_u64(obj, 0)?;
                            tx.write_u64(obj, 0, value + 1)
                        })
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    for obj in objects {
        assert_eq!(read_word(&mut main, obj), 100);
    }
    assert_eq!(strand.metrics().conflicts, 0);
}

#[test]
fn uncommitted_writes_are_invisible() {
    let strand = with_segments(3);
    let mut main = strand.attach();
    let obj = counter(&mut main, 7);

    let written = Arc::new(Barrier::new(2));
    let checked = Arc::new(Barrier::new(2));
    let writer = {
        let strand = strand.clone();
        let (written, checked) = (written.clone(), checked.clone());
        thread::spawn(move || {
            let handle = strand.attach();
            let mut tx = handle.begin().unwrap();
            tx.write_u64(obj, 0, 99).unwrap();
            assert_eq!(tx.read_u64(obj, 0).unwrap(), 99);
            written.wait();
            checked.wait();
            tx.abort("never meant to commit");
        })
    };

    written.wait();
    assert_eq!(read_word(&mut main, obj), 7);
    checked.wait();
    writer.join().unwrap();
    assert_eq!(read_word(&mut main, obj), 7);
}

#[test]
fn snapshot_moves_forward_when_nothing_read_changed() {
    let strand = with_segments(3);
    let mut main = strand.attach();
    let a = counter(&mut main, 1);
    let b = counter(&mut main, 2);

    let other = strand.attach();
    let reader_handle = strand.attach();
    let mut reader = reader_handle.begin().unwrap();
    assert_eq!(reader.read_u64(a, 0).unwrap(), 1);
    let start = reader.start_version();

    let mut tx = other.begin().unwrap();
    tx.write_u64(b, 0, 20).unwrap();
    tx.commit().unwrap();

    // b changed after the snapshot but a did not: the reader extends
    assert_eq!(reader.read_u64(b, 0).unwrap(), 20);
    assert!(reader.start_version() > start);
    reader.commit().unwrap();
}

#[test]
fn nested_structure_commits_atomically() {
    let strand = compact();
    let mut handle = strand.attach();
    let list = rooted_object(&mut handle, ObjectKind::REF_ARRAY, 8 * 8);

    handle
        .atomically(|tx| {
            for slot in 0..8 {
                let item = tx.alloc(ObjectKind::OPAQUE, 8)?;
                tx.write_u64(item, 0, slot as u64 * 10)?;
                tx.write_ref(list, slot * 8, item)?;
            }
            Ok(())
        })
        .unwrap();

    let sum = handle
        .atomically(|tx| {
            let mut sum = 0;
            for slot in 0..8 {
                let item = tx.read_ref(list, slot * 8)?;
                assert!(item.is_old());
                sum += tx.read_u64(item, 0)?;
            }
            Ok(sum)
        })
        .unwrap();
    assert_eq!(sum, 280);
}
