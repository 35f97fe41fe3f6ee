//! Replication Tests
//!
//! Commits copy written ranges into every other segment's pages. A reader
//! must never observe half of a commit, even for objects spanning pages.

use crate::common::*;
use std::thread;
use strand::ObjectKind;

const SIZE: usize = 6000;
const WORDS: usize = SIZE / 8;
const ROUNDS: u64 = 50;

fn fill(value: u64) -> Vec<u8> {
    (0..WORDS).flat_map(|_| value.to_le_bytes()).collect()
}

#[test]
fn readers_never_see_torn_multi_page_writes() {
    // main, one writer, two readers
    let strand = with_segments(4);
    let mut main = strand.attach();
    let obj = rooted_object(&mut main, ObjectKind::OPAQUE, SIZE);
    assert!(obj.is_old());

    let writer = {
        let strand = strand.clone();
        thread::spawn(move || {
            let mut handle = strand.attach();
            for round in 1..=ROUNDS {
                let data = fill(round);
                handle
                    .atomically(|tx| tx.write_bytes(obj, 0, &data))
                    .unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let strand = strand.clone();
            thread::spawn(move || {
                let mut handle = strand.attach();
                let mut buf = vec![0u8; SIZE];
                loop {
                    let (bulk, words) = handle
                        .atomically(|tx| {
                            tx.read_bytes(obj, 0, &mut buf)?;
                            let mut words = Vec::with_capacity(WORDS);
                            for i in 0..WORDS {
                                words.push(tx.read_u64(obj, i * 8)?);
                            }
                            let first = u64::from_le_bytes(buf[..8].try_into().unwrap());
                            Ok((first, words))
                        })
                        .unwrap();
                    assert!(
                        buf.chunks_exact(8).all(|w| w == bulk.to_le_bytes()),
                        "torn bulk read at value {bulk}"
                    );
                    assert!(
                        words.iter().all(|w| *w == bulk),
                        "word reads disagree with bulk read {bulk}"
                    );
                    if bulk == ROUNDS {
                        break;
                    }
                    thread::yield_now();
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(read_word(&mut main, obj), ROUNDS);
    assert_eq!(strand.metrics().segments_attached, 1);
}
