use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::storage::page::{PageError, PageManager};

#[derive(Error, Debug)]
pub enum TableHeapError {
    #[error("Tuple does not fit in an empty page")]
    TupleTooLarge,
    #[error("Page error: {0}")]
    Page(#[from] PageError),
    #[error("Buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),
}

/// Per-tuple metadata stored as a one-byte prefix of the record bytes.
/// Deletion is logical: aborting an insert marks the tuple deleted and
/// aborting a delete clears the mark, so undo never moves bytes around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TupleMeta {
    pub is_deleted: bool,
}

impl TupleMeta {
    fn to_byte(self) -> u8 {
        u8::from(self.is_deleted)
    }

    fn from_byte(byte: u8) -> Self {
        Self {
            is_deleted: byte != 0,
        }
    }
}

/// Tuple storage over a doubly linked chain of slotted heap pages.
pub struct TableHeap {
    buffer_pool: Arc<BufferPoolManager>,
    page_manager: PageManager,
    first_page_id: PageId,
    /// Appends go to the chain tail; the mutex serializes page linking
    last_page_id: Mutex<PageId>,
}

impl TableHeap {
    pub fn new(buffer_pool: Arc<BufferPoolManager>) -> Result<Self, TableHeapError> {
        let page_manager = PageManager::new();
        let mut guard = buffer_pool.new_page_guarded()?;
        let first_page_id = guard.page_id();
        page_manager.init_page(&mut guard.write());
        guard.mark_dirty();
        drop(guard);

        Ok(Self {
            buffer_pool,
            page_manager,
            first_page_id,
            last_page_id: Mutex::new(first_page_id),
        })
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    /// Insert a tuple at the tail of the page chain, growing the chain
    /// when the tail page is full.
    pub fn insert_tuple(&self, meta: TupleMeta, data: &[u8]) -> Result<Rid, TableHeapError> {
        let mut record = Vec::with_capacity(data.len() + 1);
        record.push(meta.to_byte());
        record.extend_from_slice(data);

        let mut last_page_id = self.last_page_id.lock();
        let mut guard = self.buffer_pool.fetch_page_write(*last_page_id)?;
        match self.page_manager.insert_record(&mut guard, &record) {
            Ok(slot) => {
                guard.mark_dirty();
                return Ok(Rid::new(*last_page_id, slot));
            }
            Err(PageError::InsufficientSpace) => {}
            Err(e) => return Err(e.into()),
        }

        // Tail is full: chain a fresh page and retry there.
        let mut new_guard = self.buffer_pool.new_page_guarded()?;
        let new_page_id = new_guard.page_id();
        {
            let mut page = new_guard.write();
            self.page_manager.init_page(&mut page);
            let mut header = self.page_manager.header(&page);
            header.prev_page_id = *last_page_id;
            self.page_manager.set_header(&mut page, header);
        }
        new_guard.mark_dirty();

        let mut old_header = self.page_manager.header(&guard);
        old_header.next_page_id = new_page_id;
        self.page_manager.set_header(&mut guard, old_header);
        guard.mark_dirty();
        drop(guard);

        let slot = {
            let mut page = new_guard.write();
            match self.page_manager.insert_record(&mut page, &record) {
                Ok(slot) => slot,
                Err(PageError::InsufficientSpace) => return Err(TableHeapError::TupleTooLarge),
                Err(e) => return Err(e.into()),
            }
        };
        *last_page_id = new_page_id;
        Ok(Rid::new(new_page_id, slot))
    }

    /// Read a tuple's metadata and payload
    pub fn tuple(&self, rid: Rid) -> Result<(TupleMeta, Vec<u8>), TableHeapError> {
        let guard = self.buffer_pool.fetch_page_read(rid.page_id)?;
        let record = self.page_manager.get_record(&guard, rid.slot)?;
        let meta = TupleMeta::from_byte(record[0]);
        Ok((meta, record[1..].to_vec()))
    }

    pub fn tuple_meta(&self, rid: Rid) -> Result<TupleMeta, TableHeapError> {
        let guard = self.buffer_pool.fetch_page_read(rid.page_id)?;
        let record = self.page_manager.get_record(&guard, rid.slot)?;
        Ok(TupleMeta::from_byte(record[0]))
    }

    /// Rewrite a tuple's metadata prefix, leaving the payload untouched
    pub fn set_tuple_meta(&self, rid: Rid, meta: TupleMeta) -> Result<(), TableHeapError> {
        let mut guard = self.buffer_pool.fetch_page_write(rid.page_id)?;
        let mut record = self.page_manager.get_record(&guard, rid.slot)?;
        record[0] = meta.to_byte();
        self.page_manager.update_record(&mut guard, rid.slot, &record)?;
        guard.mark_dirty();
        Ok(())
    }

    /// Replace a tuple's payload in place, keeping its metadata and slot
    pub fn update_tuple_in_place(&self, rid: Rid, data: &[u8]) -> Result<(), TableHeapError> {
        let mut guard = self.buffer_pool.fetch_page_write(rid.page_id)?;
        let old = self.page_manager.get_record(&guard, rid.slot)?;
        let mut record = Vec::with_capacity(data.len() + 1);
        record.push(old[0]);
        record.extend_from_slice(data);
        self.page_manager.update_record(&mut guard, rid.slot, &record)?;
        guard.mark_dirty();
        Ok(())
    }

    /// The rid of the next live tuple at or after `rid` in chain order,
    /// following the page chain across page boundaries.
    pub fn next_live_tuple(&self, rid: Rid) -> Result<Option<Rid>, TableHeapError> {
        let mut page_id = rid.page_id;
        let mut slot = rid.slot;
        while page_id != INVALID_PAGE_ID {
            let guard = self.buffer_pool.fetch_page_read(page_id)?;
            let header = self.page_manager.header(&guard);
            while slot < header.record_count {
                let record = self.page_manager.get_record(&guard, slot)?;
                if !TupleMeta::from_byte(record[0]).is_deleted {
                    return Ok(Some(Rid::new(page_id, slot)));
                }
                slot += 1;
            }
            page_id = header.next_page_id;
            slot = 0;
        }
        Ok(None)
    }
}
