//! Runtime-wide counters

use crate::runtime::Runtime;
use strand_concurrency::TransactionMetrics;
use strand_core::Version;
use strand_gc::GcSnapshot;

/// Point-in-time view of a runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RuntimeMetrics {
    /// Transaction counters
    pub transactions: TransactionMetrics,
    /// Collector counters
    pub gc: GcSnapshot,
    /// Version of the last commit
    pub version: Version,
    /// Configured segments
    pub segments: usize,
    /// Segments with a thread attached
    pub segments_attached: usize,
    /// Old-generation pages holding at least one object
    pub old_committed_pages: usize,
    /// Bytes of live old-generation objects
    pub old_live_bytes: usize,
    /// Shared pages materialized so far
    pub shared_pages: usize,
    /// Committed pages above which a major collection runs
    pub major_watermark: usize,
    /// Committed weak references
    pub weakrefs: usize,
    /// Committed finalizer registrations
    pub finalizers: usize,
    /// Finalizers queued and not run yet
    pub finalizers_pending: usize,
}

impl RuntimeMetrics {
    pub(crate) fn collect(runtime: &Runtime) -> Self {
        let segments = runtime.pool.len();
        RuntimeMetrics {
            transactions: runtime.manager.metrics(),
            gc: runtime.stats.snapshot(),
            version: runtime.manager.current_version(),
            segments,
            segments_attached: segments - runtime.pool.free_count(),
            old_committed_pages: runtime.old.committed_pages(),
            old_live_bytes: runtime.old.live_bytes(),
            shared_pages: runtime.heap.materialized_pages(),
            major_watermark: runtime.old.watermark(),
            weakrefs: runtime.weakrefs.len(),
            finalizers: runtime.finalizers.len(),
            finalizers_pending: runtime.finalizer_queues.iter().map(|q| q.len()).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::runtime::Runtime;
    use strand_core::{ObjectKind, RuntimeConfig};

    #[test]
    fn test_metrics_follow_commits() {
        let runtime = Runtime::open(RuntimeConfig::compact()).unwrap();
        let mut handle = runtime.attach();
        let before = runtime.metrics();
        assert_eq!(before.segments_attached, 1);
        assert_eq!(before.version, 0);

        handle
            .atomically(|tx| {
                let obj = tx.alloc(ObjectKind::OPAQUE, 32)?;
                tx.write_u64(obj, 0, 5)?;
                tx.push_root(obj);
                Ok(())
            })
            .unwrap();

        let after = runtime.metrics();
        assert_eq!(after.version, 1);
        assert_eq!(after.transactions.total_committed, 1);
        assert!(after.old_committed_pages >= 1);
        assert!(after.old_live_bytes >= 32);
        assert!(after.shared_pages >= 1);
        assert!(after.gc.objects_allocated >= 1);
    }
}
