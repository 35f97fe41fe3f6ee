//! Retry Policy Tests

use crate::common::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use strand::{retry, Error, ObjectKind, Strand, StrandError};

#[test]
fn retry_limit_stops_the_loop() {
    init_tracing();
    let strand = Strand::builder().compact().retry_limit(3).open().unwrap();
    let mut handle = strand.attach();
    let mut runs = 0;
    let err: Error = handle
        .atomically(|_tx| {
            runs += 1;
            retry::<()>()
        })
        .unwrap_err()
        .into();
    assert_eq!(err, Error::RetryLimitExceeded { attempts: 3 });
    assert_eq!(runs, 3);
    assert_eq!(strand.metrics().retries, 2);
}

#[test]
fn retry_rolls_back_every_effect() {
    let strand = compact();
    let mut handle = strand.attach();
    let obj = counter(&mut handle, 1);
    let roots = handle.root_count().unwrap();

    let mut runs = 0;
    handle
        .atomically(|tx| {
            runs += 1;
            tx.write_u64(obj, 0, 100 + runs)?;
            let scratch = tx.alloc(ObjectKind::OPAQUE, 16)?;
            tx.push_root(scratch);
            if runs < 3 {
                return retry();
            }
            tx.pop_root();
            Ok(())
        })
        .unwrap();

    assert_eq!(read_word(&mut handle, obj), 103);
    assert_eq!(handle.root_count().unwrap(), roots);
}

#[test]
fn hook_sees_every_restart() {
    let strand = compact();
    let mut handle = strand.attach();
    let seen = Arc::new(AtomicU32::new(0));
    let last = seen.clone();
    handle.set_retry_hook(move |attempt, err| {
        assert_eq!(*err, StrandError::Retry);
        last.store(attempt, Ordering::SeqCst);
    });

    let mut runs = 0;
    handle
        .atomically(|_tx| {
            runs += 1;
            if runs <= 4 {
                retry()
            } else {
                Ok(())
            }
        })
        .unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 4);

    handle.clear_retry_hook();
    let mut runs = 0;
    handle
        .atomically(|_tx| {
            runs += 1;
            if runs == 1 {
                retry()
            } else {
                Ok(())
            }
        })
        .unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 4);
}

#[test]
fn aborted_body_is_not_retried() {
    let strand = compact();
    let mut handle = strand.attach();
    let mut runs = 0;
    let err = handle
        .atomically(|_tx| -> Result<(), StrandError> {
            runs += 1;
            Err(StrandError::Aborted("giving up".to_string()))
        })
        .unwrap_err();
    assert_eq!(runs, 1);
    assert_eq!(Error::from(err), Error::Aborted("giving up".to_string()));
    assert_eq!(strand.metrics().transactions_aborted, 1);
}
