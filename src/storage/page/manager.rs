use crate::common::types::{Page, PAGE_SIZE};
use crate::storage::page::error::PageError;
use crate::storage::page::header::PageHeader;
use crate::storage::page::layout::{RecordLocation, HEADER_SIZE, RECORD_OFFSET_SIZE};

/// Slotted-page operations over raw heap pages.
///
/// Record data is stored from the beginning of the page (after the
/// header); the slot array with record locations grows from the end.
pub struct PageManager;

impl Default for PageManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PageManager {
    pub fn new() -> Self {
        Self
    }

    pub fn init_page(&self, page: &mut Page) {
        let header = PageHeader::new();
        page.data[0..HEADER_SIZE].copy_from_slice(&header.to_bytes());
    }

    /// Append a record, returning its slot index
    pub fn insert_record(&self, page: &mut Page, data: &[u8]) -> Result<u32, PageError> {
        let mut header = self.header(page);

        let record_size = data.len() as u32;
        let total_space_needed = record_size + RECORD_OFFSET_SIZE as u32;
        if header.free_space_size < total_space_needed {
            return Err(PageError::InsufficientSpace);
        }

        let slot_pos = Self::slot_position(header.record_count);
        let record_loc = RecordLocation {
            offset: header.free_space_offset,
            length: record_size,
        };

        let data_end = header.free_space_offset as usize + data.len();
        page.data[header.free_space_offset as usize..data_end].copy_from_slice(data);
        page.data[slot_pos..slot_pos + RECORD_OFFSET_SIZE].copy_from_slice(&record_loc.to_bytes());

        header.free_space_offset += record_size;
        header.free_space_size -= total_space_needed;
        header.record_count += 1;
        self.set_header(page, header);

        Ok(header.record_count - 1)
    }

    pub fn get_record(&self, page: &Page, slot: u32) -> Result<Vec<u8>, PageError> {
        let header = self.header(page);
        if slot >= header.record_count {
            return Err(PageError::InvalidRecordId);
        }

        let record_loc = self.record_location(page, slot);
        if record_loc.length == 0 {
            return Err(PageError::RecordNotFound);
        }

        let start = record_loc.offset as usize;
        let end = start + record_loc.length as usize;
        Ok(page.data[start..end].to_vec())
    }

    /// Overwrite a record's bytes. Updates that fit shrink or reuse the
    /// record's space; larger updates relocate the bytes to the free
    /// area, keeping the slot index stable.
    pub fn update_record(&self, page: &mut Page, slot: u32, data: &[u8]) -> Result<(), PageError> {
        let header = self.header(page);
        if slot >= header.record_count {
            return Err(PageError::InvalidRecordId);
        }

        let slot_pos = Self::slot_position(slot);
        let record_loc = self.record_location(page, slot);
        if record_loc.length == 0 {
            return Err(PageError::RecordNotFound);
        }

        let new_size = data.len() as u32;
        if new_size > record_loc.length {
            let space_needed = new_size - record_loc.length;
            let mut header = self.header(page);
            if header.free_space_size < space_needed {
                return Err(PageError::InsufficientSpace);
            }

            let new_offset = header.free_space_offset;
            let new_end = new_offset as usize + data.len();
            page.data[new_offset as usize..new_end].copy_from_slice(data);

            let new_record_loc = RecordLocation {
                offset: new_offset,
                length: new_size,
            };
            page.data[slot_pos..slot_pos + RECORD_OFFSET_SIZE]
                .copy_from_slice(&new_record_loc.to_bytes());

            header.free_space_offset += new_size;
            header.free_space_size -= space_needed;
            self.set_header(page, header);
            return Ok(());
        }

        page.data[record_loc.offset as usize..record_loc.offset as usize + data.len()]
            .copy_from_slice(data);

        if new_size < record_loc.length {
            let new_record_loc = RecordLocation {
                offset: record_loc.offset,
                length: new_size,
            };
            page.data[slot_pos..slot_pos + RECORD_OFFSET_SIZE]
                .copy_from_slice(&new_record_loc.to_bytes());
        }

        Ok(())
    }

    pub fn header(&self, page: &Page) -> PageHeader {
        PageHeader::from_bytes(&page.data[0..HEADER_SIZE])
    }

    pub fn set_header(&self, page: &mut Page, header: PageHeader) {
        page.data[0..HEADER_SIZE].copy_from_slice(&header.to_bytes());
    }

    pub fn free_space(&self, page: &Page) -> u32 {
        self.header(page).free_space_size
    }

    fn slot_position(slot: u32) -> usize {
        PAGE_SIZE - RECORD_OFFSET_SIZE * (slot as usize + 1)
    }

    fn record_location(&self, page: &Page, slot: u32) -> RecordLocation {
        let slot_pos = Self::slot_position(slot);
        RecordLocation::from_bytes(&page.data[slot_pos..slot_pos + RECORD_OFFSET_SIZE])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::INVALID_PAGE_ID;

    fn fresh_page() -> (PageManager, Page) {
        let manager = PageManager::new();
        let mut page = Page::new(1);
        manager.init_page(&mut page);
        (manager, page)
    }

    #[test]
    fn test_insert_and_get_record() {
        let (manager, mut page) = fresh_page();

        let slot_a = manager.insert_record(&mut page, b"alpha").unwrap();
        let slot_b = manager.insert_record(&mut page, b"beta").unwrap();
        assert_eq!(slot_a, 0);
        assert_eq!(slot_b, 1);

        assert_eq!(manager.get_record(&page, slot_a).unwrap(), b"alpha");
        assert_eq!(manager.get_record(&page, slot_b).unwrap(), b"beta");
        assert!(matches!(
            manager.get_record(&page, 5),
            Err(PageError::InvalidRecordId)
        ));
    }

    #[test]
    fn test_update_record_smaller_and_larger() {
        let (manager, mut page) = fresh_page();
        let slot = manager.insert_record(&mut page, b"0123456789").unwrap();

        manager.update_record(&mut page, slot, b"short").unwrap();
        assert_eq!(manager.get_record(&page, slot).unwrap(), b"short");

        manager
            .update_record(&mut page, slot, b"a record that grew past its slot")
            .unwrap();
        assert_eq!(
            manager.get_record(&page, slot).unwrap(),
            b"a record that grew past its slot"
        );
    }

    #[test]
    fn test_insert_fails_when_page_is_full() {
        let (manager, mut page) = fresh_page();
        let big = vec![7u8; 1000];
        while manager.insert_record(&mut page, &big).is_ok() {}
        assert!(matches!(
            manager.insert_record(&mut page, &big),
            Err(PageError::InsufficientSpace)
        ));
    }

    #[test]
    fn test_header_round_trip() {
        let (manager, mut page) = fresh_page();
        let mut header = manager.header(&page);
        assert_eq!(header.record_count, 0);
        assert_eq!(header.next_page_id, INVALID_PAGE_ID);

        header.next_page_id = 9;
        header.prev_page_id = 4;
        manager.set_header(&mut page, header);

        let reread = manager.header(&page);
        assert_eq!(reread.next_page_id, 9);
        assert_eq!(reread.prev_page_id, 4);
    }
}
