//! Inevitable transactions
//!
//! At most one transaction system-wide may be inevitable: it is guaranteed to
//! commit, so it can perform actions that cannot be rolled back. Admission is
//! first come, first served through numbered tickets.
//!
//! The inevitable transaction publishes its footprint (every committed object
//! it read or wrote). A committer whose write set intersects the footprint
//! must not publish; it waits for the gate generation to change and then
//! revalidates. Ordinary transactions are never prevented from starting or
//! reading.

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashSet;
use std::time::Duration;
use strand_core::{ObjRef, TxnId};

#[derive(Debug, Default)]
struct GateState {
    next_ticket: u64,
    serving: u64,
    holder: Option<TxnId>,
    footprint: FxHashSet<ObjRef>,
    /// Bumped every time the slot is released.
    generation: u64,
}

/// Admission gate and footprint of the inevitable transaction.
#[derive(Debug, Default)]
pub struct InevitableGate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl InevitableGate {
    /// Empty gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the slot and take it for `txn_id`. Tickets are served in
    /// arrival order.
    pub fn acquire(&self, txn_id: TxnId) {
        let mut state = self.state.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        while state.serving != ticket || state.holder.is_some() {
            self.changed.wait(&mut state);
        }
        state.holder = Some(txn_id);
        state.footprint.clear();
        tracing::debug!(txn_id, ticket, "transaction became inevitable");
    }

    /// Release the slot held by `txn_id`. Returns `false` if `txn_id` was
    /// not the holder.
    pub fn release(&self, txn_id: TxnId) -> bool {
        let mut state = self.state.lock();
        if state.holder != Some(txn_id) {
            return false;
        }
        state.holder = None;
        state.footprint.clear();
        state.serving += 1;
        state.generation += 1;
        drop(state);
        self.changed.notify_all();
        true
    }

    /// Transaction currently holding the slot.
    pub fn holder(&self) -> Option<TxnId> {
        self.state.lock().holder
    }

    /// Current generation.
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Add objects to the holder's footprint.
    pub fn extend_footprint(&self, objects: impl IntoIterator<Item = ObjRef>) {
        let mut state = self.state.lock();
        debug_assert!(state.holder.is_some());
        state.footprint.extend(objects);
    }

    /// Is `obj` part of the published footprint?
    pub fn in_footprint(&self, obj: ObjRef) -> bool {
        self.state.lock().footprint.contains(&obj)
    }

    /// Number of objects in the footprint.
    pub fn footprint_len(&self) -> usize {
        self.state.lock().footprint.len()
    }

    /// If another transaction is inevitable and its footprint intersects
    /// `writes`, return its id and the generation to wait on.
    pub fn blocks<'a>(
        &self,
        txn_id: TxnId,
        writes: impl IntoIterator<Item = &'a ObjRef>,
    ) -> Option<(TxnId, u64)> {
        let state = self.state.lock();
        let holder = state.holder?;
        if holder == txn_id || state.footprint.is_empty() {
            return None;
        }
        writes
            .into_iter()
            .any(|obj| state.footprint.contains(obj))
            .then_some((holder, state.generation))
    }

    /// Block until the gate generation moves past `generation`.
    pub fn wait_released(&self, generation: u64) {
        let mut state = self.state.lock();
        while state.generation == generation {
            self.changed.wait(&mut state);
        }
    }

    /// Like [`wait_released`](Self::wait_released) with a timeout. Returns
    /// `true` if the generation changed.
    pub fn wait_released_for(&self, generation: u64, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation {
            return true;
        }
        self.changed.wait_for(&mut state, timeout);
        state.generation != generation
    }

    /// Drop every outstanding ticket and the holder unless it is `keep`
    /// (state of a forked child, where the other threads no longer exist).
    pub fn reset_except(&self, keep: Option<TxnId>) {
        let mut state = self.state.lock();
        if state.holder.is_some() && state.holder != keep {
            state.holder = None;
            state.footprint.clear();
            state.generation += 1;
        }
        // the holder, if kept, already consumed its ticket
        state.serving = state.next_ticket;
        if state.holder.is_some() {
            state.serving -= 1;
        }
        drop(state);
        self.changed.notify_all();
    }
}
