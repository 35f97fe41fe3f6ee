//! Conflict detection
//!
//! Every published object carries the version of the commit that last
//! published it (its revision). A transaction that started at version `V`
//! conflicts on an object of its read or write set when the object's current
//! revision in the shared store is newer than `V`: another transaction
//! committed it in between.
//!
//! New objects are never validated; no other transaction can reach them
//! before they are published.

use crate::transaction::TransactionContext;
use strand_core::header::REVISION_OFFSET;
use strand_core::{ObjRef, Result, Version};
use strand_memory::SharedHeap;

/// Kind of conflict found during validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictType {
    /// An object the transaction read was committed by someone else
    ReadWriteConflict {
        /// Object read
        object: ObjRef,
        /// Snapshot the read belonged to
        start_version: Version,
        /// Revision now published
        current_revision: Version,
    },

    /// An object the transaction wrote was committed by someone else
    WriteWriteConflict {
        /// Object written
        object: ObjRef,
        /// Snapshot the private copy was taken from
        start_version: Version,
        /// Revision now published
        current_revision: Version,
    },
}

impl ConflictType {
    /// Object the conflict was found on
    pub fn object(&self) -> ObjRef {
        match self {
            ConflictType::ReadWriteConflict { object, .. }
            | ConflictType::WriteWriteConflict { object, .. } => *object,
        }
    }
}

/// Outcome of a validation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    /// Conflicts found, empty when valid
    pub conflicts: Vec<ConflictType>,
}

impl ValidationResult {
    /// A passing result
    pub fn ok() -> Self {
        Self::default()
    }

    /// Did validation pass?
    pub fn is_valid(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Number of conflicts
    pub fn conflict_count(&self) -> usize {
        self.conflicts.len()
    }

    /// Add a conflict
    pub fn add_conflict(&mut self, conflict: ConflictType) {
        self.conflicts.push(conflict);
    }

    /// Append the conflicts of another pass
    pub fn merge(&mut self, other: ValidationResult) {
        self.conflicts.extend(other.conflicts);
    }

    /// Object of the first conflict, if any
    pub fn first_object(&self) -> Option<ObjRef> {
        self.conflicts.first().map(ConflictType::object)
    }
}

fn published_revision(heap: &SharedHeap, obj: ObjRef) -> Result<Version> {
    let mut buf = [0u8; 8];
    heap.read(obj.addr() + REVISION_OFFSET as u64, &mut buf)?;
    Ok(Version::from_le_bytes(buf))
}

/// Check every object of the read set.
pub fn validate_read_set(txn: &TransactionContext, heap: &SharedHeap) -> Result<ValidationResult> {
    let mut result = ValidationResult::ok();
    for obj in txn.read_set.iter() {
        let current = published_revision(heap, *obj)?;
        if current > txn.start_version {
            result.add_conflict(ConflictType::ReadWriteConflict {
                object: *obj,
                start_version: txn.start_version,
                current_revision: current,
            });
        }
    }
    Ok(result)
}

/// Check every object of the write set.
pub fn validate_write_set(txn: &TransactionContext, heap: &SharedHeap) -> Result<ValidationResult> {
    let mut result = ValidationResult::ok();
    for obj in txn.write_set.iter() {
        let current = published_revision(heap, *obj)?;
        if current > txn.start_version {
            result.add_conflict(ConflictType::WriteWriteConflict {
                object: *obj,
                start_version: txn.start_version,
                current_revision: current,
            });
        }
    }
    Ok(result)
}

/// Validate the whole transaction against the shared store.
pub fn validate_transaction(txn: &TransactionContext, heap: &SharedHeap) -> Result<ValidationResult> {
    let mut result = validate_read_set(txn, heap)?;
    result.merge(validate_write_set(txn, heap)?);
    if !result.is_valid() {
        tracing::trace!(
            txn_id = txn.txn_id,
            conflicts = result.conflict_count(),
            "validation failed"
        );
    }
    Ok(result)
}


#[cfg(test)]
mod properties {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use strand_core::PageId;

    proptest! {
        // One conflict per tracked object whose revision is past the snapshot.
        #[test]
        fn prop_conflicts_are_exactly_the_newer_revisions(
            objects in prop::collection::vec((0u64..20, any::<bool>(), any::<bool>()), 1..32),
            start in 0u64..20,
        ) {
            let heap = SharedHeap::new(4);
            let mut content = heap.page(PageId(1)).unwrap().to_vec();
            let mut txn = TransactionContext::new(1, start);
            let mut expected = 0;

            for (i, (revision, read, write)) in objects.iter().enumerate() {
                let obj = ObjRef::old(PageId(1).base() + (i * 64) as u64);
                let at = obj.page_offset() + REVISION_OFFSET;
                content[at..at + 8].copy_from_slice(&revision.to_le_bytes());
                if *read {
                    txn.record_read(obj);
                }
                if *write {
                    txn.record_write(obj);
                }
                // read before the write, so it sits in both sets
                if *revision > start {
                    expected += usize::from(*read) + usize::from(*write);
                }
            }
            heap.install(vec![(PageId(1), Arc::from(content.into_boxed_slice()))], 20);

            let result = validate_transaction(&txn, &heap).unwrap();
            prop_assert_eq!(result.conflict_count(), expected);
            prop_assert_eq!(result.is_valid(), expected == 0);
        }
    }
}
