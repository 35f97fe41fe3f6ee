//! Stop-the-world coordination for major collections and fork.
//!
//! A thread stops the world by taking the lock of every segment other than
//! its own. A segment is lockable only while its thread is at a safe point
//! (between transactions, blocked, or yielding after a minor collection), so
//! a thread in the middle of a transaction or inside commit delays the stop.
//!
//! [`SafePoint::stop`] gives up after a bounded number of timed attempts and
//! reports a deferral; the caller retries later. Too many consecutive
//! deferrals means the runtime can never collect and is treated as fatal.

use crate::pool::SegmentPool;
use parking_lot::MutexGuard;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use strand_core::{fatal, SegmentId};

/// Every segment except the caller's, locked.
pub struct WorldGuard<'a, S> {
    segments: Vec<(SegmentId, MutexGuard<'a, S>)>,
    start_time: Instant,
}

impl<'a, S> WorldGuard<'a, S> {
    /// Number of stopped segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Were no other segments stopped?
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The stopped segments.
    pub fn iter(&self) -> impl Iterator<Item = (SegmentId, &S)> {
        self.segments.iter().map(|(id, s)| (*id, &**s))
    }

    /// The stopped segments, mutably.
    pub fn iter_mut(&mut self) -> IterMut<'_, 'a, S> {
        IterMut {
            inner: self.segments.iter_mut(),
        }
    }

    /// Duration since the world was stopped.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// Mutable iterator over the segments of a [`WorldGuard`].
pub struct IterMut<'s, 'a, S> {
    inner: std::slice::IterMut<'s, (SegmentId, MutexGuard<'a, S>)>,
}

impl<'s, 'a, S> Iterator for IterMut<'s, 'a, S> {
    type Item = (SegmentId, &'s mut S);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(id, s)| (*id, &mut **s))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<S> std::fmt::Debug for WorldGuard<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldGuard")
            .field("segments", &self.segments.len())
            .field("elapsed", &self.start_time.elapsed())
            .finish()
    }
}

/// Lock every segment except `own`, waiting as long as it takes.
///
/// Only safe when the caller holds no lock another thread could need to
/// reach its safe point (the commit lock in particular).
pub fn lock_world<S>(pool: &SegmentPool<S>, own: Option<SegmentId>) -> WorldGuard<'_, S> {
    let start_time = Instant::now();
    let segments = pool
        .ids()
        .filter(|id| Some(*id) != own)
        .map(|id| (id, pool.segment(id).lock()))
        .collect();
    WorldGuard {
        segments,
        start_time,
    }
}

/// Bounded stop-the-world with deferral accounting.
#[derive(Debug)]
pub struct SafePoint {
    attempts: u32,
    timeout: Duration,
    max_deferrals: u64,
    consecutive: AtomicU64,
}

impl SafePoint {
    /// `attempts` rounds of `timeout` per segment; at most `max_deferrals`
    /// consecutive failures.
    pub fn new(attempts: u32, timeout: Duration, max_deferrals: u64) -> Self {
        SafePoint {
            attempts: attempts.max(1),
            timeout,
            max_deferrals,
            consecutive: AtomicU64::new(0),
        }
    }

    /// Consecutive deferrals so far.
    pub fn deferrals(&self) -> u64 {
        self.consecutive.load(Ordering::Relaxed)
    }

    /// Try to lock every segment except `own`.
    ///
    /// Returns `None` when some segment stayed busy through every attempt;
    /// the segments locked so far are released before returning.
    pub fn stop<'a, S>(
        &self,
        pool: &'a SegmentPool<S>,
        own: Option<SegmentId>,
    ) -> Option<WorldGuard<'a, S>> {
        let start_time = Instant::now();
        let mut held: Vec<(SegmentId, MutexGuard<'a, S>)> = Vec::with_capacity(pool.len());
        let mut waiting: Vec<SegmentId> = pool.ids().filter(|id| Some(*id) != own).collect();

        for _ in 0..self.attempts {
            waiting.retain(|id| match pool.segment(*id).try_lock_for(self.timeout) {
                Some(guard) => {
                    held.push((*id, guard));
                    false
                }
                None => true,
            });
            if waiting.is_empty() {
                self.consecutive.store(0, Ordering::Relaxed);
                held.sort_by_key(|(id, _)| *id);
                return Some(WorldGuard {
                    segments: held,
                    start_time,
                });
            }
        }

        drop(held);
        let deferrals = self.consecutive.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::warn!(
            busy = waiting.len(),
            deferrals,
            "safe point not reached, deferring"
        );
        if deferrals > self.max_deferrals {
            fatal("major collection deferred too many times");
        }
        None
    }
}
