//! Runtime instance
//!
//! [`Runtime`] owns everything shared between segments: the committed heap,
//! the old generation, the transaction manager, the segment pool and the
//! collector's global tables. The page table is shared by the segment views. Threads use it through a
//! [`ThreadHandle`] obtained with [`Runtime::attach`].
//!
//! # Lock Order
//!
//! ```text
//! gc lock  →  segment locks (stop-the-world)  →  commit lock  →  leaf locks
//! ```
//!
//! A thread running a transaction holds its own segment lock and may take
//! the commit lock; it never waits for another segment's lock except through
//! the bounded [`SafePoint`].

use crate::collect;
use crate::fork::ForkPreparation;
use crate::handle::ThreadHandle;
use crate::metrics::RuntimeMetrics;
use crate::segment::{Finalizer, Segment};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strand_concurrency::{lock_world, SafePoint, SegmentPool, TransactionManager};
use strand_core::{
    KindRegistry, ObjectKind, Result, RootProvider, RuntimeConfig, SegmentId, Traceable, Version,
};
use strand_gc::{FinalizerQueue, FinalizerTable, GcStats, MajorResult, OldGeneration, WeakRegistry};
use strand_memory::{PageTable, SharedHeap};
use tracing::info;

/// A running STM heap.
pub struct Runtime {
    pub(crate) config: RuntimeConfig,
    pub(crate) kinds: KindRegistry,
    pub(crate) heap: Arc<SharedHeap>,
    pub(crate) old: OldGeneration,
    pub(crate) manager: TransactionManager,
    pub(crate) pool: SegmentPool<Segment>,
    pub(crate) safe_point: SafePoint,
    pub(crate) weakrefs: WeakRegistry,
    pub(crate) finalizers: FinalizerTable<Finalizer>,
    pub(crate) finalizer_queues: Vec<FinalizerQueue<Finalizer>>,
    pub(crate) roots: RwLock<Vec<Arc<dyn RootProvider>>>,
    pub(crate) stats: GcStats,
    /// Held for the duration of a major collection or a fork.
    pub(crate) gc_lock: Mutex<()>,
    /// A major collection was deferred and should run at the next chance.
    pub(crate) major_requested: AtomicBool,
}

impl Runtime {
    /// Open a runtime with `config`.
    ///
    /// Page 0 is never mapped, so no object lives at address zero; the old
    /// generation spans pages `1..=heap_pages`.
    ///
    /// # Errors
    /// `InvalidConfig` when the configuration is rejected.
    pub fn open(config: RuntimeConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let pages = config.heap_pages + 1;
        let heap = Arc::new(SharedHeap::new(pages));
        let table = Arc::new(PageTable::new(config.segments, pages));
        let segments = (0..config.segments as u32)
            .map(|i| Segment::new(SegmentId(i), heap.clone(), table.clone(), config.nursery_size))
            .collect();

        let runtime = Runtime {
            kinds: KindRegistry::new(),
            old: OldGeneration::new(1, pages as u32, config.major_watermark_pages),
            manager: TransactionManager::new(heap.clone()),
            pool: SegmentPool::new(segments),
            safe_point: SafePoint::new(
                config.safe_point_attempts,
                config.safe_point_timeout(),
                config.max_major_deferrals,
            ),
            weakrefs: WeakRegistry::new(),
            finalizers: FinalizerTable::new(),
            finalizer_queues: (0..config.segments).map(|_| FinalizerQueue::new()).collect(),
            roots: RwLock::new(Vec::new()),
            stats: GcStats::new(),
            gc_lock: Mutex::new(()),
            major_requested: AtomicBool::new(false),
            heap,
            config,
        };
        info!(
            segments = runtime.config.segments,
            nursery = runtime.config.nursery_size,
            heap_pages = runtime.config.heap_pages,
            "runtime opened"
        );
        Ok(Arc::new(runtime))
    }

    /// Open a runtime with the default configuration.
    pub fn with_defaults() -> Result<Arc<Self>> {
        Self::open(RuntimeConfig::default())
    }

    /// The configuration the runtime was opened with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Registered tracing capabilities.
    pub fn kinds(&self) -> &KindRegistry {
        &self.kinds
    }

    /// Register a tracing capability for a new object kind.
    pub fn register_kind(&self, capability: Arc<dyn Traceable>) -> Result<ObjectKind> {
        let kind = self.kinds.register(capability)?;
        tracing::debug!(kind = kind.0, "object kind registered");
        Ok(kind)
    }

    /// Add a source of global roots for major collections.
    pub fn add_root_provider(&self, provider: Arc<dyn RootProvider>) {
        self.roots.write().push(provider);
    }

    /// Attach the calling thread to a free segment, waiting for one if
    /// every segment is taken.
    pub fn attach(self: &Arc<Self>) -> ThreadHandle {
        let (segment, epoch) = self.pool.attach();
        ThreadHandle::new(self.clone(), segment, epoch)
    }

    /// Attach without waiting.
    ///
    /// # Errors
    /// `OutOfMemory { resource: "segment" }` when every segment is taken.
    pub fn try_attach(self: &Arc<Self>) -> Result<ThreadHandle> {
        let (segment, epoch) = self.pool.try_attach()?;
        Ok(ThreadHandle::new(self.clone(), segment, epoch))
    }

    /// Attach, waiting at most `timeout` for a free segment.
    pub fn attach_timeout(self: &Arc<Self>, timeout: Duration) -> Result<ThreadHandle> {
        let (segment, epoch) = self.pool.attach_timeout(timeout)?;
        Ok(ThreadHandle::new(self.clone(), segment, epoch))
    }

    /// Number of segments no thread is attached to.
    pub fn free_segments(&self) -> usize {
        self.pool.free_count()
    }

    /// Version of the last commit.
    pub fn current_version(&self) -> Version {
        self.manager.current_version()
    }

    /// The committed heap.
    pub fn heap(&self) -> &SharedHeap {
        &self.heap
    }

    /// The old generation.
    pub fn old_generation(&self) -> &OldGeneration {
        &self.old
    }

    /// The transaction manager.
    pub fn manager(&self) -> &TransactionManager {
        &self.manager
    }

    /// Collector counters.
    pub fn gc_stats(&self) -> &GcStats {
        &self.stats
    }

    /// Committed weak references.
    pub fn weakrefs(&self) -> &WeakRegistry {
        &self.weakrefs
    }

    /// Committed finalizer registrations.
    pub fn finalizers(&self) -> &FinalizerTable<Finalizer> {
        &self.finalizers
    }

    /// Objects waiting for their finalizer on `segment`.
    pub fn finalizer_queue(&self, segment: SegmentId) -> &FinalizerQueue<Finalizer> {
        &self.finalizer_queues[segment.index()]
    }

    /// Snapshot of every counter.
    pub fn metrics(&self) -> RuntimeMetrics {
        RuntimeMetrics::collect(self)
    }

    /// Run a major collection from a thread that is not attached. Returns
    /// `None` when the collection was deferred or another one was running.
    pub fn collect_major(&self) -> Result<Option<MajorResult>> {
        collect::collect_major(self, None)
    }

    /// Stop every segment but `own` and take the commit lock, leaving the
    /// heap in a state that can be duplicated by `fork()`.
    ///
    /// Blocks until every other thread reaches a safe point.
    pub fn prepare_fork(&self, own: SegmentId) -> ForkPreparation<'_> {
        let gc = self.gc_lock.lock();
        let world = lock_world(&self.pool, Some(own));
        let commit = self.manager.commit_lock();
        ForkPreparation::new(self, own, gc, world, commit)
    }

    pub(crate) fn request_major(&self) {
        self.major_requested.store(true, Ordering::Relaxed);
    }

    pub(crate) fn major_due(&self) -> bool {
        self.major_requested.load(Ordering::Relaxed) || self.old.should_collect()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("segments", &self.config.segments)
            .field("version", &self.current_version())
            .field("old", &self.old)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_core::RefArray;

    #[test]
    fn test_open_rejects_invalid_config() {
        let config = RuntimeConfig {
            segments: 0,
            ..RuntimeConfig::compact()
        };
        assert!(Runtime::open(config).is_err());
    }

    #[test]
    fn test_attach_is_capped_by_segments() {
        let config = RuntimeConfig {
            segments: 2,
            ..RuntimeConfig::compact()
        };
        let runtime = Runtime::open(config).unwrap();
        let a = runtime.try_attach().unwrap();
        let b = runtime.try_attach().unwrap();
        assert_ne!(a.segment(), b.segment());
        assert!(runtime.try_attach().unwrap_err().is_out_of_memory());
        assert!(runtime.attach_timeout(Duration::from_millis(5)).is_err());

        drop(a);
        assert_eq!(runtime.free_segments(), 1);
        assert!(runtime.try_attach().is_ok());
    }

    #[test]
    fn test_register_kind_numbers_after_builtins() {
        let runtime = Runtime::open(RuntimeConfig::compact()).unwrap();
        let kind = runtime.register_kind(Arc::new(RefArray)).unwrap();
        assert_eq!(kind, ObjectKind(2));
        assert!(runtime.kinds().contains(kind));
    }

    #[test]
    fn test_fresh_runtime_is_at_version_zero() {
        let runtime = Runtime::open(RuntimeConfig::compact()).unwrap();
        assert_eq!(runtime.current_version(), 0);
        assert_eq!(runtime.metrics().transactions.total_started, 0);
    }
}
