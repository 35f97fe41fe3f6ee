//! Transactions
//!
//! A [`Transaction`] runs on the segment of the [`ThreadHandle`] that began
//! it and keeps that segment locked until it finishes. Objects are reached
//! through three places:
//!
//! | Object                         | Read from          | Written to          |
//! |--------------------------------|--------------------|---------------------|
//! | young (this segment's nursery) | nursery            | nursery             |
//! | old, written or created here   | private view       | private view        |
//! | old, committed                 | shared store       | first write copies it into the view |
//!
//! Reads of committed objects check the object's revision against the
//! transaction's snapshot; a newer revision triggers revalidation and, if the
//! read set is still valid, moves the snapshot forward.
//!
//! # Safe Points
//!
//! Allocation slow paths, [`Transaction::collect_minor`],
//! [`Transaction::become_inevitable`] and waiting for the inevitable
//! transaction during commit may evacuate the nursery. Young references held
//! anywhere other than the shadow stack are invalid afterwards.

use crate::collect;
use crate::handle::ThreadHandle;
use crate::runtime::Runtime;
use crate::segment::{Finalizer, Segment};
use parking_lot::MutexGuard;
use smallvec::SmallVec;
use std::sync::Arc;
use strand_concurrency::{CommitError, PendingOperations, TransactionStatus};
use strand_core::header::{read_word, HASH_OFFSET};
use strand_core::{
    object_size, ObjRef, ObjectFlags, ObjectHeader, ObjectKind, Result, SegmentId, StrandError,
    TxnId, Version, HEADER_SIZE,
};
use strand_gc::{address_hash, identity_hash, MinorResult};
use tracing::{debug, trace, warn};

/// Where the current version of an object lives for this transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Place {
    Young,
    Owned,
    Committed,
}

type ReadBuf = SmallVec<[u8; 64]>;

/// A transaction in progress.
///
/// Dropping an unfinished transaction rolls it back.
pub struct Transaction<'h> {
    handle: &'h ThreadHandle,
    guard: MutexGuard<'h, Segment>,
}

impl<'h> Transaction<'h> {
    pub(crate) fn begin(handle: &'h ThreadHandle, mut guard: MutexGuard<'h, Segment>) -> Result<Self> {
        if guard.txn.is_some() {
            return Err(StrandError::InvalidState(
                "segment already runs a transaction".to_string(),
            ));
        }
        let txn = handle.runtime().manager.begin();
        trace!(txn_id = txn.txn_id, start_version = txn.start_version, "transaction started");
        let segment = &mut *guard;
        segment.saved_stack.clone_from(&segment.shadow_stack);
        segment.txn = Some(txn);
        handle.set_in_transaction(true);
        Ok(Transaction { handle, guard })
    }

    fn runtime(&self) -> &'h Runtime {
        self.handle.runtime()
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Transaction id.
    pub fn id(&self) -> TxnId {
        self.guard.txn.as_ref().map_or(0, |t| t.txn_id)
    }

    /// Snapshot the transaction currently reads from.
    pub fn start_version(&self) -> Version {
        self.guard.txn.as_ref().map_or(0, |t| t.start_version)
    }

    /// Segment the transaction runs on.
    pub fn segment(&self) -> SegmentId {
        self.guard.id
    }

    /// Has the transaction become inevitable?
    pub fn is_inevitable(&self) -> bool {
        self.guard.txn.as_ref().is_some_and(|t| t.is_inevitable())
    }

    /// Lifecycle state.
    pub fn status(&self) -> Option<TransactionStatus> {
        self.guard.txn.as_ref().map(|t| t.status.clone())
    }

    /// Sizes of the read, write and new-object sets.
    pub fn pending_operations(&self) -> PendingOperations {
        self.guard
            .txn
            .as_ref()
            .map(|t| t.pending_operations())
            .unwrap_or_default()
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Allocate a zeroed object of `kind` with a `size`-byte payload.
    ///
    /// Small objects go to the nursery; objects at or above the configured
    /// threshold are allocated directly in the old generation.
    pub fn alloc(&mut self, kind: ObjectKind, size: usize) -> Result<ObjRef> {
        let runtime = self.runtime();
        self.guard.active()?.ensure_active()?;
        if !runtime.kinds.contains(kind) {
            return Err(StrandError::UnknownKind(kind.0));
        }
        let payload = u32::try_from(size).map_err(|_| StrandError::OutOfMemory {
            resource: "object",
            requested: size,
        })?;
        let total = object_size(size);
        if total >= runtime.config.large_object_threshold || total > self.guard.nursery.capacity() {
            return self.alloc_old(kind, payload, total);
        }
        if let Some(obj) = self.guard.nursery.alloc(kind, payload) {
            runtime.stats.record_allocation(total);
            return Ok(obj);
        }

        self.minor_safe_point()?;
        let obj = self
            .guard
            .nursery
            .alloc(kind, payload)
            .ok_or(StrandError::OutOfMemory {
                resource: "nursery",
                requested: total,
            })?;
        runtime.stats.record_allocation(total);
        Ok(obj)
    }

    fn alloc_old(&mut self, kind: ObjectKind, payload: u32, total: usize) -> Result<ObjRef> {
        let runtime = self.runtime();
        let obj = match self.guard.cache.alloc(&runtime.old, total) {
            Some(obj) => obj,
            None => {
                self.major_safe_point()?;
                self.guard
                    .cache
                    .alloc(&runtime.old, total)
                    .ok_or(StrandError::OutOfMemory {
                        resource: "old generation",
                        requested: total,
                    })?
            }
        };
        let mut bytes = vec![0u8; total];
        let mut header = ObjectHeader::new(kind, payload);
        header.flags.insert(ObjectFlags::OLD);
        header.encode(&mut bytes[..HEADER_SIZE]);

        let segment = &mut *self.guard;
        let written = segment.view.write(obj.addr(), &bytes);
        if let Err(err) = written {
            runtime.old.free(obj);
            return Err(err);
        }
        segment.active_mut()?.record_new(obj);
        runtime.stats.record_large_allocation(total);
        Ok(obj)
    }

    /// Evacuate the nursery now. Young references outside the shadow stack
    /// are invalid afterwards.
    pub fn collect_minor(&mut self) -> Result<MinorResult> {
        self.guard.active()?.ensure_active()?;
        self.minor_safe_point()
    }

    fn minor_safe_point(&mut self) -> Result<MinorResult> {
        let runtime = self.runtime();
        let needed = self.guard.nursery.used();
        if needed > 0 && !runtime.old.can_absorb(needed) {
            self.major_safe_point()?;
            if !runtime.old.can_absorb(needed) {
                return Err(StrandError::OutOfMemory {
                    resource: "old generation",
                    requested: needed,
                });
            }
        }
        let result = collect::collect_minor(runtime, &mut *self.guard)?;
        MutexGuard::bump(&mut self.guard);
        Ok(result)
    }

    /// Make sure a major collection has run since the old generation was
    /// found full. When another thread is collecting, or a segment could not
    /// be stopped, the segment is released while waiting for the gc lock so
    /// that collector can stop it. Returns `false` when no collection
    /// completed.
    fn major_safe_point(&mut self) -> Result<bool> {
        let runtime = self.runtime();
        let before = runtime.stats.snapshot().major_collections;
        for _ in 0..runtime.config.safe_point_attempts {
            if collect::collect_major(runtime, Some(&mut *self.guard))?.is_some() {
                return Ok(true);
            }
            MutexGuard::unlocked(&mut self.guard, || drop(runtime.gc_lock.lock()));
            if runtime.stats.snapshot().major_collections != before {
                return Ok(true);
            }
        }
        debug!(segment = %self.guard.id, "no major collection completed");
        Ok(false)
    }

    // =========================================================================
    // Object access
    // =========================================================================

    fn place(&self, obj: ObjRef) -> Result<Place> {
        let segment = &*self.guard;
        let txn = segment.active()?;
        txn.ensure_active()?;
        if obj.is_young() {
            return if segment.nursery.contains(obj) {
                Ok(Place::Young)
            } else {
                Err(StrandError::InvalidReference(obj))
            };
        }
        if obj.is_null() || !self.runtime().old.contains(obj.addr()) {
            return Err(StrandError::InvalidReference(obj));
        }
        Ok(if txn.owns(obj) {
            Place::Owned
        } else {
            Place::Committed
        })
    }

    /// Read the committed version of `obj`, header included, extending the
    /// snapshot when it is newer than the transaction's start version.
    /// `payload_len` bytes of payload are read (`None` for all of it).
    fn read_committed(&mut self, obj: ObjRef, payload_len: Option<usize>) -> Result<ReadBuf> {
        let runtime = self.runtime();
        let txn = self.guard.active_mut()?;
        runtime.manager.track_inevitable(txn, obj);

        let mut bytes = ReadBuf::new();
        loop {
            let mut head = [0u8; HEADER_SIZE];
            runtime.heap.read(obj.addr(), &mut head)?;
            let header = ObjectHeader::decode(&head);
            let len = HEADER_SIZE + payload_len.unwrap_or(header.size as usize);
            bytes.clear();
            bytes.resize(len, 0);
            runtime.heap.read(obj.addr(), &mut bytes)?;

            let current = ObjectHeader::decode(&bytes);
            if current.size != header.size {
                // replaced between the two reads
                continue;
            }
            if current.revision > txn.start_version {
                runtime.manager.extend(txn)?;
                continue;
            }
            if !current.flags.contains(ObjectFlags::OLD) {
                return Err(StrandError::InvalidReference(obj));
            }
            txn.record_read(obj);
            return Ok(bytes);
        }
    }

    /// Copy the committed version of `obj` into the private view (the write
    /// barrier). Afterwards the transaction owns it.
    fn acquire(&mut self, obj: ObjRef) -> Result<()> {
        let bytes = self.read_committed(obj, None)?;
        let segment = &mut *self.guard;
        segment.view.write(obj.addr(), &bytes)?;
        segment.active_mut()?.record_write(obj);
        segment.remembered.insert(obj);
        trace!(segment = %segment.id, object = %obj, "object acquired for writing");
        Ok(())
    }

    fn owned_header(&self, obj: ObjRef) -> Result<ObjectHeader> {
        let mut head = [0u8; HEADER_SIZE];
        self.guard.view.read(obj.addr(), &mut head)?;
        Ok(ObjectHeader::decode(&head))
    }

    fn check_bounds(obj: ObjRef, header: &ObjectHeader, offset: usize, len: usize) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= header.size as usize => Ok(()),
            _ => Err(StrandError::InvalidState(format!(
                "access of {} bytes at offset {} is outside object {} ({} bytes)",
                len, offset, obj, header.size
            ))),
        }
    }

    /// Copy `buf.len()` payload bytes at `offset` of `obj` into `buf`.
    pub fn read_bytes(&mut self, obj: ObjRef, offset: usize, buf: &mut [u8]) -> Result<()> {
        match self.place(obj)? {
            Place::Young => {
                let bytes = self.guard.nursery.object(obj)?;
                let header = ObjectHeader::decode(bytes);
                Self::check_bounds(obj, &header, offset, buf.len())?;
                let at = HEADER_SIZE + offset;
                buf.copy_from_slice(&bytes[at..at + buf.len()]);
            }
            Place::Owned => {
                let header = self.owned_header(obj)?;
                Self::check_bounds(obj, &header, offset, buf.len())?;
                self.guard
                    .view
                    .read(obj.addr() + (HEADER_SIZE + offset) as u64, buf)?;
            }
            Place::Committed => {
                let end = offset.checked_add(buf.len()).ok_or_else(|| {
                    StrandError::InvalidState("access length overflows".to_string())
                })?;
                let bytes = self.read_committed(obj, Some(end))?;
                let header = ObjectHeader::decode(&bytes);
                Self::check_bounds(obj, &header, offset, buf.len())?;
                let at = HEADER_SIZE + offset;
                buf.copy_from_slice(&bytes[at..at + buf.len()]);
            }
        }
        Ok(())
    }

    /// Read the little-endian word at `offset`.
    pub fn read_u64(&mut self, obj: ObjRef, offset: usize) -> Result<u64> {
        let mut word = [0u8; 8];
        self.read_bytes(obj, offset, &mut word)?;
        Ok(read_word(&word, 0))
    }

    /// Read the reference stored at `offset`.
    pub fn read_ref(&mut self, obj: ObjRef, offset: usize) -> Result<ObjRef> {
        self.read_u64(obj, offset).map(ObjRef::from_raw)
    }

    /// Payload size of `obj`.
    pub fn size_of(&mut self, obj: ObjRef) -> Result<usize> {
        Ok(self.header(obj)?.size as usize)
    }

    /// Kind of `obj`.
    pub fn kind_of(&mut self, obj: ObjRef) -> Result<ObjectKind> {
        Ok(self.header(obj)?.kind)
    }

    fn header(&mut self, obj: ObjRef) -> Result<ObjectHeader> {
        match self.place(obj)? {
            Place::Young => Ok(ObjectHeader::decode(self.guard.nursery.object(obj)?)),
            Place::Owned => self.owned_header(obj),
            Place::Committed => Ok(ObjectHeader::decode(&self.read_committed(obj, Some(0))?)),
        }
    }

    /// Write `data` into the payload of `obj` at `offset`.
    pub fn write_bytes(&mut self, obj: ObjRef, offset: usize, data: &[u8]) -> Result<()> {
        let place = self.place(obj)?;
        if place == Place::Young {
            let bytes = self.guard.nursery.object_mut(obj)?;
            let header = ObjectHeader::decode(bytes);
            Self::check_bounds(obj, &header, offset, data.len())?;
            let at = HEADER_SIZE + offset;
            bytes[at..at + data.len()].copy_from_slice(data);
            return Ok(());
        }
        if place == Place::Committed {
            self.acquire(obj)?;
        }
        let header = self.owned_header(obj)?;
        Self::check_bounds(obj, &header, offset, data.len())?;
        let segment = &mut *self.guard;
        segment
            .view
            .write(obj.addr() + (HEADER_SIZE + offset) as u64, data)?;
        segment.remembered.insert(obj);
        Ok(())
    }

    /// Write a little-endian word at `offset`.
    pub fn write_u64(&mut self, obj: ObjRef, offset: usize, value: u64) -> Result<()> {
        self.write_bytes(obj, offset, &value.to_le_bytes())
    }

    /// Store a reference at `offset`. `target` must be null or visible to
    /// this transaction.
    pub fn write_ref(&mut self, obj: ObjRef, offset: usize, target: ObjRef) -> Result<()> {
        self.check_target(target)?;
        self.write_u64(obj, offset, target.raw())
    }

    fn check_target(&self, target: ObjRef) -> Result<()> {
        if target.is_null() {
            return Ok(());
        }
        self.place(target).map(|_| ())
    }

    fn set_flag(&mut self, obj: ObjRef, flag: ObjectFlags) -> Result<()> {
        let place = self.place(obj)?;
        if place == Place::Young {
            let bytes = self.guard.nursery.object_mut(obj)?;
            let mut header = ObjectHeader::decode(bytes);
            header.flags.insert(flag);
            header.encode(&mut bytes[..HEADER_SIZE]);
            return Ok(());
        }
        if place == Place::Committed {
            self.acquire(obj)?;
        }
        let mut header = self.owned_header(obj)?;
        if !header.flags.contains(flag) {
            header.flags.insert(flag);
            let mut head = [0u8; HEADER_SIZE];
            header.encode(&mut head);
            self.guard.view.write(obj.addr(), &head)?;
        }
        Ok(())
    }

    /// Identity hash of `obj`, stable for the object's whole life even
    /// across promotion.
    pub fn identity_hash(&mut self, obj: ObjRef) -> Result<u64> {
        match self.place(obj)? {
            Place::Young => {
                let bytes = self.guard.nursery.object_mut(obj)?;
                let mut header = ObjectHeader::decode(bytes);
                if header.hash == 0 {
                    header.hash = address_hash(obj);
                    bytes[HASH_OFFSET..HASH_OFFSET + 8].copy_from_slice(&header.hash.to_le_bytes());
                }
                Ok(header.hash)
            }
            Place::Owned => Ok(identity_hash(obj, self.owned_header(obj)?.hash)),
            Place::Committed => {
                // the stored hash never changes once committed
                let mut head = [0u8; HEADER_SIZE];
                self.runtime().heap.read(obj.addr(), &mut head)?;
                Ok(identity_hash(obj, ObjectHeader::decode(&head).hash))
            }
        }
    }

    // =========================================================================
    // Weak references and finalizers
    // =========================================================================

    /// Make `holder` a weak reference to `target` (null clears it).
    pub fn register_weakref(&mut self, holder: ObjRef, target: ObjRef) -> Result<()> {
        self.check_target(target)?;
        self.set_flag(holder, ObjectFlags::WEAKREF)?;
        self.guard.weakrefs.register(holder, target);
        Ok(())
    }

    /// Target of the weak reference held by `holder`, or `None` once the
    /// target was collected.
    ///
    /// A committed holder joins the read set, so a registration committed
    /// by another transaction after this one's snapshot is a conflict. A
    /// committed target that is returned joins it too and stays alive until
    /// the transaction ends.
    ///
    /// # Errors
    /// `InvalidReference` when `holder` is not a weak reference.
    pub fn weakref_get(&mut self, holder: ObjRef) -> Result<Option<ObjRef>> {
        let place = self.place(holder)?;
        if let Some(target) = self.guard.weakrefs.get(holder) {
            return Ok(target.get());
        }
        if place == Place::Committed {
            self.read_committed(holder, Some(0))?;
        }
        let target = self
            .runtime()
            .weakrefs
            .get(holder)
            .map(|target| target.get())
            .ok_or(StrandError::InvalidReference(holder))?;
        if place == Place::Committed {
            // the registry is published after the revision is stamped
            self.read_committed(holder, Some(0))?;
        }
        if let Some(target) = target {
            if target.is_old() && self.place(target)? == Place::Committed {
                self.read_committed(target, Some(0))?;
            }
        }
        Ok(target)
    }

    /// Run `finalizer` once `obj` becomes unreachable. The registration
    /// takes effect when this transaction commits.
    pub fn register_finalizer<F>(&mut self, obj: ObjRef, finalizer: F) -> Result<()>
    where
        F: Fn(&mut Transaction<'_>, ObjRef) -> Result<()> + Send + Sync + 'static,
    {
        self.set_flag(obj, ObjectFlags::HAS_FINALIZER)?;
        let finalizer: Finalizer = Arc::new(finalizer);
        self.guard.finalizers.push((obj, finalizer));
        Ok(())
    }

    // =========================================================================
    // Shadow stack
    // =========================================================================

    /// Push a root; returns its index. Roots are updated in place when a
    /// collection moves their object.
    pub fn push_root(&mut self, obj: ObjRef) -> usize {
        let stack = &mut self.guard.shadow_stack;
        stack.push(obj);
        stack.len() - 1
    }

    /// Pop the last root.
    pub fn pop_root(&mut self) -> Option<ObjRef> {
        self.guard.shadow_stack.pop()
    }

    /// Root at `index`.
    pub fn root(&self, index: usize) -> Option<ObjRef> {
        self.guard.shadow_stack.get(index).copied()
    }

    /// Replace the root at `index`.
    pub fn set_root(&mut self, index: usize, obj: ObjRef) -> Result<()> {
        match self.guard.shadow_stack.get_mut(index) {
            Some(slot) => {
                *slot = obj;
                Ok(())
            }
            None => Err(StrandError::InvalidState(format!(
                "no root at index {}",
                index
            ))),
        }
    }

    /// Number of roots.
    pub fn root_count(&self) -> usize {
        self.guard.shadow_stack.len()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Become the single inevitable transaction: from now on this
    /// transaction cannot abort because of conflicts.
    ///
    /// Waits (at a safe point) for the current holder to finish.
    ///
    /// # Errors
    /// `Conflict` if the transaction was already invalidated; it must then
    /// be rolled back.
    pub fn become_inevitable(&mut self) -> Result<()> {
        let runtime = self.runtime();
        let txn = self.guard.active()?;
        txn.ensure_active()?;
        if txn.is_inevitable() {
            return Ok(());
        }
        let txn_id = txn.txn_id;
        MutexGuard::unlocked(&mut self.guard, || runtime.manager.inevitable().acquire(txn_id));
        runtime.manager.make_inevitable(self.guard.active_mut()?)?;
        debug!(txn_id, segment = %self.guard.id, "transaction is inevitable");
        Ok(())
    }

    /// Revalidate the read and write sets now.
    ///
    /// # Errors
    /// `Conflict` when another transaction committed something this one
    /// depends on.
    pub fn validate(&mut self) -> Result<()> {
        let runtime = self.runtime();
        let txn = self.guard.active_mut()?;
        if txn.is_inevitable() {
            return Ok(());
        }
        runtime.manager.extend(txn).map(|_| ())
    }

    /// Commit, returning the commit version.
    ///
    /// On a conflict the transaction is rolled back and the error returned;
    /// [`ThreadHandle::atomically`] retries it.
    pub fn commit(mut self) -> Result<Version> {
        match self.try_commit() {
            Ok(version) => Ok(version),
            Err(err) => {
                self.rollback(&err);
                Err(err)
            }
        }
    }

    fn try_commit(&mut self) -> Result<Version> {
        let runtime = self.runtime();
        self.guard.active()?.ensure_active()?;
        self.minor_safe_point()?;

        let version = loop {
            let segment = &mut *self.guard;
            let Segment {
                id,
                view,
                txn,
                weakrefs,
                finalizers,
                ..
            } = segment;
            let Some(txn) = txn.as_mut() else {
                return Err(StrandError::InvalidState(
                    "transaction vanished during commit".to_string(),
                ));
            };
            let committed = runtime.manager.commit(txn, view, |_| {
                runtime.weakrefs.publish(weakrefs.drain());
                runtime.finalizers.publish(*id, finalizers.drain(..));
            });
            match committed {
                Ok(version) => break version,
                Err(CommitError::InevitableInProgress { holder, generation }) => {
                    trace!(holder, "waiting for the inevitable transaction");
                    MutexGuard::unlocked(&mut self.guard, || {
                        runtime.manager.inevitable().wait_released(generation)
                    });
                }
                Err(err) => return Err(err.into()),
            }
        };

        self.guard.finish_commit();
        self.handle.set_in_transaction(false);
        if runtime.major_due() {
            if let Err(err) = collect::collect_major(runtime, Some(&mut *self.guard)) {
                warn!(error = %err, "major collection after commit failed");
            }
        }
        Ok(version)
    }

    /// Roll back without committing.
    pub fn abort(mut self, reason: &str) {
        self.rollback(&StrandError::Aborted(reason.to_string()));
    }

    /// Undo every effect of the transaction.
    pub(crate) fn rollback(&mut self, cause: &StrandError) {
        let runtime = self.runtime();
        if let Some(mut txn) = self.guard.rollback(&runtime.old) {
            if let Err(err) = runtime.manager.abort(&mut txn, cause) {
                debug!(txn_id = txn.txn_id, error = %err, "abort bookkeeping failed");
            }
            trace!(txn_id = txn.txn_id, cause = %cause, "transaction rolled back");
        }
        self.handle.set_in_transaction(false);
    }

    #[cfg(test)]
    pub(crate) fn with_segment<T>(&mut self, f: impl FnOnce(&Runtime, &mut Segment) -> T) -> T {
        let runtime = self.runtime();
        f(runtime, &mut *self.guard)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.guard.txn.is_some() {
            self.rollback(&StrandError::Aborted("transaction dropped".to_string()));
        }
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id())
            .field("segment", &self.guard.id)
            .field("start_version", &self.start_version())
            .field("inevitable", &self.is_inevitable())
            .finish()
    }
}

/// Request a rollback and re-execution of the enclosing
/// [`atomically`](ThreadHandle::atomically) body.
pub fn retry<T>() -> Result<T> {
    Err(StrandError::Retry)
}
