//! Transaction Queue Tests

use crate::common::*;
use rand::Rng;
use strand::{Error, ObjRef, ObjectKind, StrandError, ThreadHandle, TransactionQueue};

const ACCOUNTS: usize = 8;
const START_BALANCE: u64 = 1_000;

fn open_bank(handle: &mut ThreadHandle) -> ObjRef {
    let bank = rooted_object(handle, ObjectKind::OPAQUE, ACCOUNTS * 8);
    handle
        .atomically(|tx| {
            for account in 0..ACCOUNTS {
                tx.write_u64(bank, account * 8, START_BALANCE)?;
            }
            Ok(())
        })
        .unwrap();
    bank
}

fn balances(handle: &mut ThreadHandle, bank: ObjRef) -> Vec<u64> {
    handle
        .atomically(|tx| {
            (0..ACCOUNTS)
                .map(|account| tx.read_u64(bank, account * 8))
                .collect::<Result<Vec<u64>, StrandError>>()
        })
        .unwrap()
}

#[test]
fn transfers_preserve_the_total() {
    let strand = with_segments(5);
    let mut main = strand.attach();
    let bank = open_bank(&mut main);

    let queue = TransactionQueue::new();
    let mut rng = rand::thread_rng();
    for _ in 0..200 {
        let from = rng.gen_range(0..ACCOUNTS);
        let to = rng.gen_range(0..ACCOUNTS);
        let amount = rng.gen_range(1..50u64);
        queue.add(move |ctx| {
            let available = ctx.read_u64(bank, from * 8)?;
            if available < amount || from == to {
                return Ok(());
            }
            let target = ctx.read_u64(bank, to * 8)?;
            ctx.write_u64(bank, from * 8, available - amount)?;
            ctx.write_u64(bank, to * 8, target + amount)
        });
    }

    let executed = strand.run_queue(&queue, 4).unwrap();
    assert_eq!(executed, 200);
    let total: u64 = balances(&mut main, bank).iter().sum();
    assert_eq!(total, START_BALANCE * ACCOUNTS as u64);
}

#[test]
fn jobs_fan_out_through_scheduling() {
    let strand = with_segments(4);
    let mut main = strand.attach();
    let bank = open_bank(&mut main);

    let queue = TransactionQueue::new();
    for account in 0..ACCOUNTS {
        queue.add(move |ctx| {
            let value = ctx.read_u64(bank, account * 8)?;
            ctx.write_u64(bank, account * 8, value + 1)?;
            // one follow-up per account, only after this job committed
            ctx.schedule(move |ctx| {
                let value = ctx.read_u64(bank, account * 8)?;
                ctx.write_u64(bank, account * 8, value * 2)
            });
            Ok(())
        });
    }

    assert_eq!(strand.run_queue(&queue, 3).unwrap(), ACCOUNTS * 2);
    for value in balances(&mut main, bank) {
        assert_eq!(value, (START_BALANCE + 1) * 2);
    }
}

#[test]
fn failing_job_is_reported() {
    let strand = with_segments(2);
    let queue = TransactionQueue::new();
    queue.add(|ctx| {
        ctx.alloc(ObjectKind(999), 8)?;
        Ok(())
    });
    let err = strand.run_queue(&queue, 1).unwrap_err();
    assert_eq!(err, Error::UnknownKind(999));
}
