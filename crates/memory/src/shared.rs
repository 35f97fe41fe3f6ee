//! Shared page store
//!
//! `SharedHeap` holds the authoritative, committed content of every page of
//! the heap address space. Pages are immutable buffers behind `Arc`; a commit
//! replaces whole pages, never mutating a page other threads may be reading.
//!
//! # Publication
//!
//! `install` swaps every page of a commit and stores the new version while
//! holding the write side of one lock. Readers copy bytes and load the version
//! under the read side, so a reader observes either none or all of a commit's
//! pages, and never a page newer than the version it reports.
//!
//! Untouched pages all share one zero page.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strand_core::{ObjRef, PageId, Result, StrandError, Version, PAGE_SIZE};

/// Immutable page content.
pub type SharedPage = Arc<[u8]>;

/// Authoritative committed page store.
pub struct SharedHeap {
    pages: RwLock<Vec<SharedPage>>,
    published: AtomicU64,
    zero: SharedPage,
}

impl SharedHeap {
    /// Heap spanning `page_count` pages (page 0 included), all zero.
    pub fn new(page_count: usize) -> Self {
        let zero: SharedPage = Arc::from(vec![0u8; PAGE_SIZE].into_boxed_slice());
        SharedHeap {
            pages: RwLock::new(vec![zero.clone(); page_count]),
            published: AtomicU64::new(0),
            zero,
        }
    }

    /// Number of pages in the address space.
    pub fn page_count(&self) -> usize {
        self.pages.read().len()
    }

    /// Version of the most recent publication.
    pub fn published_version(&self) -> Version {
        self.published.load(Ordering::Acquire)
    }

    fn check_range(&self, addr: u64, len: usize, page_count: usize) -> Result<()> {
        let end = addr
            .checked_add(len as u64)
            .ok_or(StrandError::InvalidReference(ObjRef::from_raw(addr)))?;
        if addr < PAGE_SIZE as u64 || end > (page_count * PAGE_SIZE) as u64 {
            return Err(StrandError::InvalidReference(ObjRef::from_raw(addr)));
        }
        Ok(())
    }

    /// Copy committed bytes `[addr, addr + buf.len())` into `buf`.
    ///
    /// Returns the version the bytes belong to.
    pub fn read(&self, addr: u64, buf: &mut [u8]) -> Result<Version> {
        let pages = self.pages.read();
        self.check_range(addr, buf.len(), pages.len())?;
        copy_from_pages(&pages, addr, buf);
        Ok(self.published.load(Ordering::Acquire))
    }

    /// Current content of one page.
    pub fn page(&self, page: PageId) -> Result<SharedPage> {
        self.pages
            .read()
            .get(page.index())
            .cloned()
            .ok_or(StrandError::InvalidReference(ObjRef::from_raw(page.base())))
    }

    /// Has the page ever been published?
    pub fn is_materialized(&self, page: PageId) -> bool {
        self.pages
            .read()
            .get(page.index())
            .map(|p| !Arc::ptr_eq(p, &self.zero))
            .unwrap_or(false)
    }

    /// Number of pages that differ from the zero page.
    pub fn materialized_pages(&self) -> usize {
        self.pages
            .read()
            .iter()
            .filter(|p| !Arc::ptr_eq(p, &self.zero))
            .count()
    }

    /// Install a commit's pages and advance the published version.
    ///
    /// Callers must hold the commit lock; `version` must be greater than the
    /// current published version.
    pub fn install(&self, updates: Vec<(PageId, SharedPage)>, version: Version) {
        let mut pages = self.pages.write();
        debug_assert!(version > self.published.load(Ordering::Relaxed));
        for (page, content) in updates {
            debug_assert_eq!(content.len(), PAGE_SIZE);
            pages[page.index()] = content;
        }
        self.published.store(version, Ordering::Release);
    }

    /// Reset the published version (fresh runtime only).
    pub fn set_published_version(&self, version: Version) {
        let _pages = self.pages.write();
        self.published.store(version, Ordering::Release);
    }
}

impl std::fmt::Debug for SharedHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedHeap")
            .field("pages", &self.page_count())
            .field("materialized", &self.materialized_pages())
            .field("published", &self.published_version())
            .finish()
    }
}

/// Copy `[addr, addr + buf.len())` out of a page vector.
fn copy_from_pages(pages: &[SharedPage], addr: u64, buf: &mut [u8]) {
    let mut done = 0;
    while done < buf.len() {
        let at = addr + done as u64;
        let page = (at / PAGE_SIZE as u64) as usize;
        let off = (at % PAGE_SIZE as u64) as usize;
        let n = (PAGE_SIZE - off).min(buf.len() - done);
        buf[done..done + n].copy_from_slice(&pages[page][off..off + n]);
        done += n;
    }
}
