use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type; pages are numbered from 1
pub type PageId = u32;

/// Sentinel for "no page": page ids start at 1 and 0 is never allocated
pub const INVALID_PAGE_ID: PageId = 0;

/// Buffer pool frame ID type, indexes `[0, pool_size)`
pub type FrameId = usize;

/// Transaction ID type
pub type TxnId = u32;

/// Table identifier type
pub type TableId = u32;

/// LSN (Log Sequence Number) type
pub type Lsn = u64;

/// Record ID: locates a tuple by heap page and slot index
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }

    /// Pack into an opaque 64-bit tuple locator
    pub fn to_u64(self) -> u64 {
        (u64::from(self.page_id) << 32) | u64::from(self.slot)
    }

    pub fn from_u64(raw: u64) -> Self {
        Self {
            page_id: (raw >> 32) as PageId,
            slot: raw as u32,
        }
    }
}

/// Page structure
#[derive(Debug, Clone)]
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
    pub lsn: Lsn,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id,
            lsn: 0,
        }
    }

    /// Zero the page and detach it from any page id
    pub fn reset(&mut self) {
        self.data.fill(0);
        self.page_id = INVALID_PAGE_ID;
        self.lsn = 0;
    }
}

/// Smart pointer to a page; the RwLock doubles as the per-page latch
pub type PagePtr = Arc<RwLock<Page>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rid_u64_round_trip() {
        let rid = Rid::new(7, 42);
        assert_eq!(Rid::from_u64(rid.to_u64()), rid);

        let rid = Rid::new(u32::MAX, u32::MAX);
        assert_eq!(Rid::from_u64(rid.to_u64()), rid);
    }

    #[test]
    fn test_rid_ordering_is_page_major() {
        assert!(Rid::new(1, 100) < Rid::new(2, 0));
        assert!(Rid::new(3, 1) < Rid::new(3, 2));
    }
}
