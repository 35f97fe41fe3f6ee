//! GC statistics and metrics.
//!
//! Counters are updated with relaxed atomics from any segment and read as a
//! [`GcSnapshot`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Statistics about collection activity.
#[derive(Debug, Default)]
pub struct GcStats {
    // =========================================================================
    // Allocation Statistics
    // =========================================================================
    /// Total bytes allocated since start.
    pub bytes_allocated: AtomicU64,
    /// Total objects allocated since start.
    pub objects_allocated: AtomicU64,
    /// Objects allocated directly in the old generation.
    pub large_objects_allocated: AtomicU64,

    // =========================================================================
    // Collection Statistics
    // =========================================================================
    /// Number of minor (nursery) collections.
    pub minor_collections: AtomicU64,
    /// Number of major (full) collections.
    pub major_collections: AtomicU64,
    /// Major collections deferred because a segment could not be stopped.
    pub major_deferrals: AtomicU64,
    /// Total time spent in minor GC (nanoseconds).
    pub minor_gc_time_ns: AtomicU64,
    /// Total time spent in major GC (nanoseconds).
    pub major_gc_time_ns: AtomicU64,

    // =========================================================================
    // Promotion Statistics
    // =========================================================================
    /// Total bytes promoted from nursery to old generation.
    pub bytes_promoted: AtomicU64,
    /// Total objects promoted.
    pub objects_promoted: AtomicU64,

    // =========================================================================
    // Reclamation Statistics
    // =========================================================================
    /// Bytes freed by sweeps.
    pub bytes_swept: AtomicU64,
    /// Objects freed by sweeps.
    pub objects_swept: AtomicU64,
    /// Weak references cleared.
    pub weakrefs_cleared: AtomicU64,
    /// Finalizers run.
    pub finalizers_run: AtomicU64,
}

/// Point-in-time copy of [`GcStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcSnapshot {
    /// Total bytes allocated.
    pub bytes_allocated: u64,
    /// Total objects allocated.
    pub objects_allocated: u64,
    /// Minor collections.
    pub minor_collections: u64,
    /// Major collections.
    pub major_collections: u64,
    /// Deferred major collections.
    pub major_deferrals: u64,
    /// Objects promoted.
    pub objects_promoted: u64,
    /// Objects swept.
    pub objects_swept: u64,
    /// Weak references cleared.
    pub weakrefs_cleared: u64,
    /// Finalizers run.
    pub finalizers_run: u64,
}

impl GcStats {
    /// Create new empty statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an allocation.
    #[inline]
    pub fn record_allocation(&self, size: usize) {
        self.bytes_allocated.fetch_add(size as u64, Ordering::Relaxed);
        self.objects_allocated.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an allocation that bypassed the nursery.
    pub fn record_large_allocation(&self, size: usize) {
        self.record_allocation(size);
        self.large_objects_allocated.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a minor GC.
    pub fn record_minor_gc(&self, duration: Duration, objects: usize, bytes: usize) {
        self.minor_collections.fetch_add(1, Ordering::Relaxed);
        self.minor_gc_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
        self.objects_promoted.fetch_add(objects as u64, Ordering::Relaxed);
        self.bytes_promoted.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a major GC.
    pub fn record_major_gc(&self, duration: Duration, objects: usize, bytes: usize, weakrefs: usize) {
        self.major_collections.fetch_add(1, Ordering::Relaxed);
        self.major_gc_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
        self.objects_swept.fetch_add(objects as u64, Ordering::Relaxed);
        self.bytes_swept.fetch_add(bytes as u64, Ordering::Relaxed);
        self.weakrefs_cleared.fetch_add(weakrefs as u64, Ordering::Relaxed);
    }

    /// Record a deferred major GC.
    pub fn record_deferral(&self) -> u64 {
        self.major_deferrals.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Record a finalizer run.
    pub fn record_finalizer(&self) {
        self.finalizers_run.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total GC time.
    pub fn total_gc_time(&self) -> Duration {
        let minor_ns = self.minor_gc_time_ns.load(Ordering::Relaxed);
        let major_ns = self.major_gc_time_ns.load(Ordering::Relaxed);
        Duration::from_nanos(minor_ns + major_ns)
    }

    /// Get average minor GC pause time.
    pub fn avg_minor_pause(&self) -> Duration {
        let count = self.minor_collections.load(Ordering::Relaxed);
        if count == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.minor_gc_time_ns.load(Ordering::Relaxed) / count)
    }

    /// Copy the counters.
    pub fn snapshot(&self) -> GcSnapshot {
        GcSnapshot {
            bytes_allocated: self.bytes_allocated.load(Ordering::Relaxed),
            objects_allocated: self.objects_allocated.load(Ordering::Relaxed),
            minor_collections: self.minor_collections.load(Ordering::Relaxed),
            major_collections: self.major_collections.load(Ordering::Relaxed),
            major_deferrals: self.major_deferrals.load(Ordering::Relaxed),
            objects_promoted: self.objects_promoted.load(Ordering::Relaxed),
            objects_swept: self.objects_swept.load(Ordering::Relaxed),
            weakrefs_cleared: self.weakrefs_cleared.load(Ordering::Relaxed),
            finalizers_run: self.finalizers_run.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = GcStats::new();
        stats.record_allocation(64);
        stats.record_large_allocation(8192);
        stats.record_minor_gc(Duration::from_micros(10), 3, 96);
        stats.record_minor_gc(Duration::from_micros(30), 1, 32);
        assert_eq!(stats.record_deferral(), 1);

        let snap = stats.snapshot();
        assert_eq!(snap.objects_allocated, 2);
        assert_eq!(snap.bytes_allocated, 64 + 8192);
        assert_eq!(snap.minor_collections, 2);
        assert_eq!(snap.objects_promoted, 4);
        assert_eq!(snap.major_deferrals, 1);
        assert_eq!(stats.avg_minor_pause(), Duration::from_micros(20));
    }
}
