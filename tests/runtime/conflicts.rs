//! Conflict Tests
//!
//! First committer wins; losers re-execute against the new state.
//! Inevitable transactions never lose.

use crate::common::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn loser_reexecutes_against_the_winner() {
    let strand = with_segments(3);
    let mut main = strand.attach();
    let x = counter(&mut main, 0);

    let a_wrote = Arc::new(Barrier::new(2));
    let b_committed = Arc::new(Barrier::new(2));
    let runs = Arc::new(AtomicU32::new(0));

    let a = {
        let strand = strand.clone();
        let (a_wrote, b_committed, runs) = (a_wrote.clone(), b_committed.clone(), runs.clone());
        thread::spawn(move || {
            let mut handle = strand.attach();
            handle
                .atomically(|tx| {
                    let run = runs.fetch_add(1, Ordering::SeqCst) + 1;
                    let value = tx.read_u64(x, 0)?;
                    tx.write_u64(x, 0, value + 1)?;
                    if run == 1 {
                        // stall until B committed its own write
                        a_wrote.wait();
                        b_committed.wait();
                    }
                    Ok(())
                })
                .unwrap();
        })
    };

    let b = {
        let strand = strand.clone();
        let (a_wrote, b_committed) = (a_wrote.clone(), b_committed.clone());
        thread::spawn(move || {
            let mut handle = strand.attach();
            a_wrote.wait();
            handle
                .atomically(|tx| {
                    let seen = tx.read_u64(x, 0)?;
                    assert_eq!(seen, 0, "A's write is still private");
                    tx.write_u64(x, 0, 2)
                })
                .unwrap();
            b_committed.wait();
        })
    };

    a.join().unwrap();
    b.join().unwrap();
    assert_eq!(read_word(&mut main, x), 3);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(strand.metrics().conflicts, 1);
}

#[test]
fn explicit_commit_reports_the_conflict() {
    let strand = with_segments(3);
    let mut main = strand.attach();
    let x = counter(&mut main, 1);

    let first = strand.attach();
    let second = strand.attach();
    let mut t1 = first.begin().unwrap();
    let mut t2 = second.begin().unwrap();
    t1.write_u64(x, 0, 10).unwrap();
    t2.write_u64(x, 0, 20).unwrap();
    t1.commit().unwrap();

    let err = t2.commit().unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(read_word(&mut main, x), 10);
}

#[test]
fn inevitable_transaction_always_commits() {
    let strand = with_segments(3);
    let mut main = strand.attach();
    let x = counter(&mut main, 0);

    let inevitable = Arc::new(Barrier::new(2));
    let a = {
        let strand = strand.clone();
        let inevitable = inevitable.clone();
        thread::spawn(move || {
            let handle = strand.attach();
            let mut tx = handle.begin().unwrap();
            tx.become_inevitable().unwrap();
            assert!(tx.is_inevitable());
            tx.write_u64(x, 0, 10).unwrap();
            inevitable.wait();
            // give B time to run into the footprint
            thread::sleep(Duration::from_millis(50));
            tx.commit().unwrap()
        })
    };

    let b = {
        let strand = strand.clone();
        let inevitable = inevitable.clone();
        thread::spawn(move || {
            let mut handle = strand.attach();
            inevitable.wait();
            handle
                .atomically(|tx| {
                    let value = tx.read_u64(x, 0)?;
                    tx.write_u64(x, 0, value + 1)
                })
                .unwrap();
        })
    };

    let version = a.join().unwrap();
    b.join().unwrap();
    assert!(version > 0);
    assert_eq!(read_word(&mut main, x), 11);
}

#[test]
fn one_inevitable_transaction_at_a_time() {
    let strand = with_segments(3);
    let first = strand.attach();
    let mut t1 = first.begin().unwrap();
    t1.become_inevitable().unwrap();

    let released = Arc::new(AtomicU32::new(0));
    let waiter = {
        let strand = strand.clone();
        let released = released.clone();
        thread::spawn(move || {
            let handle = strand.attach();
            let mut tx = handle.begin().unwrap();
            tx.become_inevitable().unwrap();
            // only possible once the first holder committed
            assert_eq!(released.load(Ordering::SeqCst), 1);
            tx.commit().unwrap();
        })
    };

    thread::sleep(Duration::from_millis(30));
    released.store(1, Ordering::SeqCst);
    t1.commit().unwrap();
    waiter.join().unwrap();
}
