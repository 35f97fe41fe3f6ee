//! Page replication
//!
//! Publishes a committing segment's writes into the shared store:
//!
//! ```text
//! 1. for each dirty page: copy the current shared page, overlay the
//!    segment's written ranges
//! 2. install every merged page and the commit version in one step
//! 3. mark the page RemoteDirty for every other segment holding a copy
//! 4. drop the committer's private pages (rows back to SharedClean)
//! ```
//!
//! Only written ranges are merged, so bytes of a private copy that went stale
//! because of another commit never reach the shared store.
//!
//! # Thread Safety
//!
//! Must run inside the commit critical section: the merge in step 1 reads
//! shared pages that only committers replace.

use crate::shared::SharedPage;
use crate::view::SegmentView;
use std::sync::Arc;
use strand_core::{PageId, Result, Version};

/// What a replication published.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicationReport {
    /// Pages installed in the shared store
    pub pages: usize,
    /// Bytes merged from private copies
    pub bytes: usize,
    /// Rows of other segments moved to `RemoteDirty`
    pub remote_dirtied: usize,
}

/// Publish `view`'s writes as version `version`.
pub fn replicate(view: &mut SegmentView, version: Version) -> Result<ReplicationReport> {
    let mut report = ReplicationReport::default();
    let mut pages: Vec<PageId> = view.dirty_pages().collect();
    pages.sort_unstable();

    let mut updates: Vec<(PageId, SharedPage)> = Vec::with_capacity(pages.len());
    for page in &pages {
        let mut merged = view.shared().page(*page)?.to_vec();
        if let Some((private, ranges)) = view.dirty_page(*page) {
            for &(start, end) in ranges {
                let (start, end) = (start as usize, end as usize);
                merged[start..end].copy_from_slice(&private[start..end]);
                report.bytes += end - start;
            }
        }
        updates.push((*page, Arc::from(merged.into_boxed_slice())));
    }

    report.pages = updates.len();
    view.shared().install(updates, version);

    let segment = view.segment();
    for page in &pages {
        report.remote_dirtied += view.table().mark_remote_dirty_except(segment, *page);
    }
    view.discard();

    tracing::trace!(
        segment = %segment,
        version,
        pages = report.pages,
        bytes = report.bytes,
        "replicated pages"
    );
    Ok(report)
}
