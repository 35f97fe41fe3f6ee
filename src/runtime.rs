//! Main entry point for Strand.
//!
//! This module provides the `Strand` struct, which owns a runtime and hands
//! out thread handles.

use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use strand_core::{ObjectKind, RootProvider, RuntimeConfig, Traceable, Version};
use strand_engine::{Runtime, ThreadHandle, TransactionQueue};
use strand_gc::MajorResult;

/// A transactional heap.
///
/// Create one with [`Strand::open`] or [`Strand::builder`], then attach each
/// thread that runs transactions.
///
/// # Example
///
/// ```
/// use strand::prelude::*;
///
/// let strand = Strand::builder().compact().open()?;
/// let mut handle = strand.attach();
///
/// handle.atomically(|tx| {
///     let obj = tx.alloc(ObjectKind::OPAQUE, 8)?;
///     tx.push_root(obj);
///     Ok(())
/// })?;
/// // young objects move at commit; the root holds the committed address
/// let counter = handle.root(0)?.expect("pushed above");
///
/// handle.atomically(|tx| {
///     let value = tx.read_u64(counter, 0)?;
///     tx.write_u64(counter, 0, value + 1)
/// })?;
/// # Ok::<(), strand::Error>(())
/// ```
#[derive(Clone)]
pub struct Strand {
    inner: Arc<Runtime>,
}

impl Strand {
    /// Open a runtime with default settings.
    pub fn open() -> Result<Self> {
        Self::builder().open()
    }

    /// Create a builder for runtime configuration.
    pub fn builder() -> StrandBuilder {
        StrandBuilder::new()
    }

    /// The underlying runtime.
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.inner
    }

    /// The configuration in effect.
    pub fn config(&self) -> &RuntimeConfig {
        self.inner.config()
    }

    /// Attach the calling thread, waiting for a free segment.
    pub fn attach(&self) -> ThreadHandle {
        self.inner.attach()
    }

    /// Attach without waiting.
    pub fn try_attach(&self) -> Result<ThreadHandle> {
        self.inner.try_attach().map_err(Into::into)
    }

    /// Attach, waiting at most `timeout`.
    pub fn attach_timeout(&self, timeout: Duration) -> Result<ThreadHandle> {
        self.inner.attach_timeout(timeout).map_err(Into::into)
    }

    /// Register a tracing capability and get the kind to allocate with.
    pub fn register_kind(&self, capability: Arc<dyn Traceable>) -> Result<ObjectKind> {
        self.inner.register_kind(capability).map_err(Into::into)
    }

    /// Add a source of global roots.
    pub fn add_root_provider(&self, provider: Arc<dyn RootProvider>) {
        self.inner.add_root_provider(provider);
    }

    /// Version of the last commit.
    pub fn current_version(&self) -> Version {
        self.inner.current_version()
    }

    /// Run a major collection. Returns `None` when it had to be deferred.
    pub fn collect_major(&self) -> Result<Option<MajorResult>> {
        self.inner.collect_major().map_err(Into::into)
    }

    /// Drain `queue` with `threads` workers.
    pub fn run_queue(&self, queue: &TransactionQueue, threads: usize) -> Result<usize> {
        queue.run(&self.inner, threads).map_err(Into::into)
    }

    /// Get runtime metrics.
    pub fn metrics(&self) -> StrandMetrics {
        let metrics = self.inner.metrics();
        let txn = metrics.transactions;
        StrandMetrics {
            transactions_committed: txn.total_committed,
            transactions_aborted: txn.total_aborted,
            transactions_active: txn.active_count,
            conflicts: txn.total_conflicts,
            retries: txn.total_retries,
            commit_rate: txn.commit_rate,
            version: metrics.version,
            minor_collections: metrics.gc.minor_collections,
            major_collections: metrics.gc.major_collections,
            objects_promoted: metrics.gc.objects_promoted,
            objects_swept: metrics.gc.objects_swept,
            weakrefs_cleared: metrics.gc.weakrefs_cleared,
            finalizers_run: metrics.gc.finalizers_run,
            segments_attached: metrics.segments_attached,
            old_live_bytes: metrics.old_live_bytes,
        }
    }
}

impl std::fmt::Debug for Strand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Strand").field("runtime", &self.inner).finish()
    }
}

/// Runtime metrics.
#[derive(Debug, Clone)]
pub struct StrandMetrics {
    /// Total committed transactions
    pub transactions_committed: u64,
    /// Total aborted transactions
    pub transactions_aborted: u64,
    /// Currently running transactions
    pub transactions_active: u64,
    /// Aborts caused by conflicts
    pub conflicts: u64,
    /// Re-executions performed by retry loops
    pub retries: u64,
    /// Commit success rate (0.0 - 1.0)
    pub commit_rate: f64,
    /// Version of the last commit
    pub version: Version,
    /// Minor collections
    pub minor_collections: u64,
    /// Major collections
    pub major_collections: u64,
    /// Objects moved out of nurseries
    pub objects_promoted: u64,
    /// Objects reclaimed by major collections
    pub objects_swept: u64,
    /// Weak references cleared
    pub weakrefs_cleared: u64,
    /// Finalizers run
    pub finalizers_run: u64,
    /// Segments with a thread attached
    pub segments_attached: usize,
    /// Live bytes in the old generation
    pub old_live_bytes: usize,
}

/// Builder for runtime configuration.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use strand::Strand;
///
/// let strand = Strand::builder()
///     .segments(8)
///     .nursery_size(256 * 1024)
///     .retry_limit(100)
///     .safe_point_timeout(Duration::from_millis(2))
///     .open()?;
/// assert_eq!(strand.config().segments, 8);
/// # Ok::<(), strand::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct StrandBuilder {
    config: RuntimeConfig,
}

impl StrandBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an explicit configuration.
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Start from a JSON configuration. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: RuntimeConfig = serde_json::from_str(json)?;
        Ok(Self { config })
    }

    /// Small heap and nursery, collecting often. Useful for testing.
    pub fn compact(mut self) -> Self {
        self.config = RuntimeConfig {
            retry_limit: self.config.retry_limit,
            ..RuntimeConfig::compact()
        };
        self
    }

    /// Number of segments (maximum concurrently running transactions).
    pub fn segments(mut self, segments: usize) -> Self {
        self.config.segments = segments;
        self
    }

    /// Nursery size per segment in bytes.
    pub fn nursery_size(mut self, bytes: usize) -> Self {
        self.config.nursery_size = bytes;
        self
    }

    /// Objects at least this large skip the nursery.
    pub fn large_object_threshold(mut self, bytes: usize) -> Self {
        self.config.large_object_threshold = bytes;
        self
    }

    /// Old-generation size in pages.
    pub fn heap_pages(mut self, pages: usize) -> Self {
        self.config.heap_pages = pages;
        self
    }

    /// Committed pages that trigger the first major collection.
    pub fn major_watermark_pages(mut self, pages: usize) -> Self {
        self.config.major_watermark_pages = pages;
        self
    }

    /// Watermark growth factor applied to live pages after a major collection.
    pub fn major_growth(mut self, factor: f64) -> Self {
        self.config.major_growth = factor;
        self
    }

    /// How long a collector waits for each segment per attempt.
    pub fn safe_point_timeout(mut self, timeout: Duration) -> Self {
        self.config.safe_point_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Attempts to stop every segment before deferring.
    pub fn safe_point_attempts(mut self, attempts: u32) -> Self {
        self.config.safe_point_attempts = attempts;
        self
    }

    /// Consecutive deferrals tolerated.
    pub fn max_major_deferrals(mut self, deferrals: u64) -> Self {
        self.config.max_major_deferrals = deferrals;
        self
    }

    /// Give up `atomically` after this many executions.
    pub fn retry_limit(mut self, attempts: u32) -> Self {
        self.config.retry_limit = Some(attempts);
        self
    }

    /// Retry forever (default).
    pub fn unbounded_retries(mut self) -> Self {
        self.config.retry_limit = None;
        self
    }

    /// The configuration built so far.
    pub fn build_config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Open the runtime.
    pub fn open(self) -> Result<Strand> {
        let inner = Runtime::open(self.config).map_err(Error::from)?;
        Ok(Strand { inner })
    }
}
