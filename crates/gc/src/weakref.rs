//! Weak references
//!
//! A weak reference is a registration `holder -> target` keyed by the holder's
//! identity. Registrations made by a running transaction stay in the
//! segment's [`PendingWeakRefs`] (where minor collections update or clear
//! them) and move to the global [`WeakRegistry`] when the transaction commits.
//!
//! Only the major collector clears committed registrations, and it does so
//! while every segment is stopped, so a target seen dead by one transaction is
//! never seen alive by another. Once cleared, an entry stays [`WeakTarget::Dead`].

use dashmap::DashMap;
use strand_core::ObjRef;

/// State of a weak reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeakTarget {
    /// The target is reachable
    Live(ObjRef),
    /// The target was collected
    Dead,
}

impl WeakTarget {
    /// The target, if still live.
    pub fn get(self) -> Option<ObjRef> {
        match self {
            WeakTarget::Live(obj) => Some(obj),
            WeakTarget::Dead => None,
        }
    }
}

/// Counts from one weak-reference pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WeakSweep {
    /// Entries whose target died
    pub cleared: usize,
    /// Entries dropped because the holder died
    pub dropped: usize,
}

/// Committed weak references.
#[derive(Debug, Default)]
pub struct WeakRegistry {
    entries: DashMap<ObjRef, WeakTarget>,
}

impl WeakRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of the weak reference held by `holder`.
    pub fn get(&self, holder: ObjRef) -> Option<WeakTarget> {
        self.entries.get(&holder).map(|e| *e.value())
    }

    /// Publish committed registrations.
    pub fn publish(&self, entries: impl IntoIterator<Item = (ObjRef, WeakTarget)>) {
        for (holder, target) in entries {
            debug_assert!(holder.is_old());
            self.entries.insert(holder, target);
        }
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Is the registry empty?
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply a major collection's verdict. Must run with every segment
    /// stopped.
    pub fn process_major(&self, is_live: impl Fn(ObjRef) -> bool) -> WeakSweep {
        let mut sweep = WeakSweep::default();
        self.entries.retain(|holder, target| {
            if !is_live(*holder) {
                sweep.dropped += 1;
                return false;
            }
            if let WeakTarget::Live(obj) = *target {
                if !is_live(obj) {
                    *target = WeakTarget::Dead;
                    sweep.cleared += 1;
                }
            }
            true
        });
        sweep
    }

    /// Drop every registration (fresh runtime state).
    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// Uncommitted weak references of one segment.
#[derive(Debug, Default)]
pub struct PendingWeakRefs {
    entries: Vec<(ObjRef, WeakTarget)>,
}

impl PendingWeakRefs {
    /// Empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-register) the weak reference of `holder`.
    pub fn register(&mut self, holder: ObjRef, target: ObjRef) {
        let target = if target.is_null() {
            WeakTarget::Dead
        } else {
            WeakTarget::Live(target)
        };
        match self.entries.iter_mut().find(|(h, _)| *h == holder) {
            Some(entry) => entry.1 = target,
            None => self.entries.push((holder, target)),
        }
    }

    /// Pending state of `holder`'s weak reference.
    pub fn get(&self, holder: ObjRef) -> Option<WeakTarget> {
        self.entries
            .iter()
            .find(|(h, _)| *h == holder)
            .map(|(_, t)| *t)
    }

    /// Number of pending registrations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Are there no pending registrations?
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Update after a minor collection. `forward` maps a young reference to
    /// its promoted copy, or `None` when it did not survive; old references
    /// are left alone.
    pub fn after_minor(&mut self, forward: impl Fn(ObjRef) -> Option<ObjRef>) -> WeakSweep {
        let mut sweep = WeakSweep::default();
        self.entries.retain_mut(|(holder, target)| {
            if holder.is_young() {
                match forward(*holder) {
                    Some(moved) => *holder = moved,
                    None => {
                        sweep.dropped += 1;
                        return false;
                    }
                }
            }
            if let WeakTarget::Live(obj) = *target {
                if obj.is_young() {
                    *target = match forward(obj) {
                        Some(moved) => WeakTarget::Live(moved),
                        None => {
                            sweep.cleared += 1;
                            WeakTarget::Dead
                        }
                    };
                }
            }
            true
        });
        sweep
    }

    /// Apply a major collection's verdict to old references.
    pub fn after_major(&mut self, is_live: impl Fn(ObjRef) -> bool) -> WeakSweep {
        let mut sweep = WeakSweep::default();
        self.entries.retain_mut(|(holder, target)| {
            if holder.is_old() && !is_live(*holder) {
                sweep.dropped += 1;
                return false;
            }
            if let WeakTarget::Live(obj) = *target {
                if obj.is_old() && !is_live(obj) {
                    *target = WeakTarget::Dead;
                    sweep.cleared += 1;
                }
            }
            true
        });
        sweep
    }

    /// Move every registration out (at commit).
    pub fn drain(&mut self) -> Vec<(ObjRef, WeakTarget)> {
        std::mem::take(&mut self.entries)
    }

    /// Forget every registration (at abort).
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
