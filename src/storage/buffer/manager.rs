use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::common::types::{FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::guard::{BasicPageGuard, ReadPageGuard, WritePageGuard};
use crate::storage::buffer::replacer::LruKReplacer;
use crate::storage::disk::{DiskManager, DiskScheduler};

/// Per-frame bookkeeping. The page data itself lives behind the frame's
/// `PagePtr` so callers can keep accessing it through guards while the
/// pool lock is free.
struct FrameMeta {
    page: PagePtr,
    /// Page currently held by the frame, INVALID_PAGE_ID if none
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

struct PoolState {
    frames: Vec<FrameMeta>,
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: LruKReplacer,
}

/// Fixed pool of in-memory frames caching disk pages.
///
/// Every public operation runs under one pool-wide mutex, including the
/// disk I/O a miss or eviction needs, which makes all pool mutations
/// linearizable. Per-page reader-writer latches are separate and only
/// taken through page guards after a successful fetch.
pub struct BufferPoolManager {
    pool_size: usize,
    state: Mutex<PoolState>,
    disk_scheduler: DiskScheduler,
    next_page_id: AtomicU32,
}

impl BufferPoolManager {
    pub fn new(
        pool_size: usize,
        replacer_k: usize,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, BufferPoolError> {
        assert!(pool_size >= 1, "buffer pool needs at least one frame");
        let disk_scheduler = DiskScheduler::new(DiskManager::new(db_path)?);

        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for frame_id in 0..pool_size {
            frames.push(FrameMeta {
                page: Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))),
                page_id: INVALID_PAGE_ID,
                pin_count: 0,
                is_dirty: false,
            });
            free_list.push_back(frame_id);
        }

        Ok(Self {
            pool_size,
            state: Mutex::new(PoolState {
                frames,
                page_table: HashMap::new(),
                free_list,
                replacer: LruKReplacer::new(pool_size, replacer_k),
            }),
            disk_scheduler,
            next_page_id: AtomicU32::new(1),
        })
    }

    /// Allocate a fresh page id and install a zeroed page for it, pinned
    /// once. Fails with `BufferPoolFull` when every frame is pinned.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut state = self.state.lock();
        let frame_id = self.acquire_frame(&mut state)?;
        let page_id = self.next_page_id.fetch_add(1, Ordering::SeqCst);

        let meta = &mut state.frames[frame_id];
        {
            let mut page = meta.page.write();
            page.reset();
            page.page_id = page_id;
        }
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;

        state.replacer.record_access(frame_id);
        state.page_table.insert(page_id, frame_id);
        Ok((state.frames[frame_id].page.clone(), page_id))
    }

    /// Fetch a page, reading it from disk if it is not resident. Fails
    /// with `BufferPoolFull` when the page would need a frame and every
    /// frame is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }

        let mut state = self.state.lock();
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let meta = &mut state.frames[frame_id];
            let was_unpinned = meta.pin_count == 0;
            meta.pin_count += 1;
            if was_unpinned {
                state.replacer.set_evictable(frame_id, false)?;
            }
            state.replacer.record_access(frame_id);
            return Ok(state.frames[frame_id].page.clone());
        }

        let frame_id = self.acquire_frame(&mut state)?;

        // Read into a scratch buffer first so an I/O failure leaves the
        // frame free instead of half-installed.
        let mut buf = [0u8; PAGE_SIZE];
        if let Err(e) = self.disk_scheduler.read_page(page_id, &mut buf) {
            state.free_list.push_back(frame_id);
            return Err(e.into());
        }

        let meta = &mut state.frames[frame_id];
        {
            let mut page = meta.page.write();
            page.data = buf;
            page.page_id = page_id;
            page.lsn = 0;
        }
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;

        state.replacer.record_access(frame_id);
        state.page_table.insert(page_id, frame_id);
        Ok(state.frames[frame_id].page.clone())
    }

    /// Drop one pin on the page, OR-ing in the caller's dirty flag. On
    /// the last unpin the frame becomes evictable. Returns false if the
    /// page is not resident or was not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };

        let meta = &mut state.frames[frame_id];
        if is_dirty {
            meta.is_dirty = true;
        }
        if meta.pin_count == 0 {
            return false;
        }
        meta.pin_count -= 1;
        if meta.pin_count == 0 {
            // The frame was registered with the replacer when installed.
            let _ = state.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Write the page out regardless of its dirty bit and clear the bit.
    /// Returns Ok(false) if the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(false);
        };

        let data = state.frames[frame_id].page.read().data;
        self.disk_scheduler.write_page(page_id, &data)?;
        state.frames[frame_id].is_dirty = false;
        Ok(true)
    }

    /// Flush every dirty resident page
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();
        let dirty: Vec<(PageId, FrameId)> = state
            .page_table
            .iter()
            .filter(|&(_, &frame_id)| state.frames[frame_id].is_dirty)
            .map(|(&page_id, &frame_id)| (page_id, frame_id))
            .collect();

        for (page_id, frame_id) in dirty {
            let data = state.frames[frame_id].page.read().data;
            self.disk_scheduler.write_page(page_id, &data)?;
            state.frames[frame_id].is_dirty = false;
        }
        Ok(())
    }

    /// Evict the page from the pool and return its frame to the free
    /// list. Returns Ok(false) if the page is pinned; a page that is not
    /// resident counts as deleted. The page id is not reused.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(true);
        };
        if state.frames[frame_id].pin_count > 0 {
            return Ok(false);
        }

        state.replacer.remove(frame_id)?;
        state.page_table.remove(&page_id);
        let meta = &mut state.frames[frame_id];
        meta.page.write().reset();
        meta.page_id = INVALID_PAGE_ID;
        meta.is_dirty = false;
        state.free_list.push_back(frame_id);
        Ok(true)
    }

    /// Fetch and pin a page without latching it
    pub fn fetch_page_basic(
        self: &Arc<Self>,
        page_id: PageId,
    ) -> Result<BasicPageGuard, BufferPoolError> {
        let page = self.fetch_page(page_id)?;
        Ok(BasicPageGuard::new(Arc::clone(self), page, page_id))
    }

    /// Fetch a page and take its shared latch
    pub fn fetch_page_read(
        self: &Arc<Self>,
        page_id: PageId,
    ) -> Result<ReadPageGuard, BufferPoolError> {
        let page = self.fetch_page(page_id)?;
        Ok(ReadPageGuard::new(Arc::clone(self), page, page_id))
    }

    /// Fetch a page and take its exclusive latch
    pub fn fetch_page_write(
        self: &Arc<Self>,
        page_id: PageId,
    ) -> Result<WritePageGuard, BufferPoolError> {
        let page = self.fetch_page(page_id)?;
        Ok(WritePageGuard::new(Arc::clone(self), page, page_id))
    }

    /// Allocate a fresh page behind a basic guard
    pub fn new_page_guarded(self: &Arc<Self>) -> Result<BasicPageGuard, BufferPoolError> {
        let (page, page_id) = self.new_page()?;
        Ok(BasicPageGuard::new(Arc::clone(self), page, page_id))
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Number of frames currently holding no page
    pub fn free_frame_count(&self) -> usize {
        self.state.lock().free_list.len()
    }

    /// Number of pages currently mapped to a frame
    pub fn resident_page_count(&self) -> usize {
        self.state.lock().page_table.len()
    }

    /// Find a frame for an incoming page: free list first, otherwise
    /// evict the replacer's victim, writing it back if dirty.
    fn acquire_frame(&self, state: &mut PoolState) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = state.replacer.evict() else {
            return Err(BufferPoolError::BufferPoolFull);
        };

        let old_page_id = state.frames[frame_id].page_id;
        if state.frames[frame_id].is_dirty {
            log::debug!("evicting dirty page {old_page_id} from frame {frame_id}");
            let data = state.frames[frame_id].page.read().data;
            self.disk_scheduler.write_page(old_page_id, &data)?;
        }
        state.page_table.remove(&old_page_id);
        let meta = &mut state.frames[frame_id];
        meta.page_id = INVALID_PAGE_ID;
        meta.is_dirty = false;
        Ok(frame_id)
    }
}
