use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::types::{Page, PageId, PagePtr};
use crate::storage::buffer::manager::BufferPoolManager;

/// Scoped owner of a page pin. Dropping the guard unpins the page,
/// carrying the dirty bit only if the caller called `mark_dirty`.
/// Guards are move-only; they are the intended way to access pages, so
/// a pin can never leak on an early return.
pub struct BasicPageGuard {
    bpm: Arc<BufferPoolManager>,
    page: PagePtr,
    page_id: PageId,
    dirty: bool,
}

impl BasicPageGuard {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page: PagePtr, page_id: PageId) -> Self {
        Self {
            bpm,
            page,
            page_id,
            dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Read the page under a transient shared latch
    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read()
    }

    /// Write the page under a transient exclusive latch
    pub fn write(&mut self) -> RwLockWriteGuard<'_, Page> {
        self.page.write()
    }

    /// Record that the caller modified the page; the unpin on drop will
    /// set the frame's dirty flag.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

impl Drop for BasicPageGuard {
    fn drop(&mut self) {
        self.bpm.unpin_page(self.page_id, self.dirty);
    }
}

/// Pin plus shared latch, held for the guard's whole lifetime
pub struct ReadPageGuard {
    bpm: Arc<BufferPoolManager>,
    page_id: PageId,
    // Option so the latch can be dropped before the unpin
    latch: Option<ArcRwLockReadGuard<RawRwLock, Page>>,
}

impl ReadPageGuard {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page: PagePtr, page_id: PageId) -> Self {
        let latch = page.read_arc();
        Self {
            bpm,
            page_id,
            latch: Some(latch),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl Deref for ReadPageGuard {
    type Target = Page;

    fn deref(&self) -> &Page {
        self.latch.as_ref().expect("page latch held until drop")
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        // Latch first, then pin, so an evictor never blocks on a latch
        // we still hold.
        self.latch.take();
        self.bpm.unpin_page(self.page_id, false);
    }
}

/// Pin plus exclusive latch, held for the guard's whole lifetime
pub struct WritePageGuard {
    bpm: Arc<BufferPoolManager>,
    page_id: PageId,
    dirty: bool,
    latch: Option<ArcRwLockWriteGuard<RawRwLock, Page>>,
}

impl WritePageGuard {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page: PagePtr, page_id: PageId) -> Self {
        let latch = page.write_arc();
        Self {
            bpm,
            page_id,
            dirty: false,
            latch: Some(latch),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Record that the caller modified the page; the unpin on drop will
    /// set the frame's dirty flag.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

impl Deref for WritePageGuard {
    type Target = Page;

    fn deref(&self) -> &Page {
        self.latch.as_ref().expect("page latch held until drop")
    }
}

impl DerefMut for WritePageGuard {
    fn deref_mut(&mut self) -> &mut Page {
        self.latch.as_mut().expect("page latch held until drop")
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        self.latch.take();
        self.bpm.unpin_page(self.page_id, self.dirty);
    }
}
