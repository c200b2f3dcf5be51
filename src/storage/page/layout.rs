use byteorder::{ByteOrder, LittleEndian};

pub const HEADER_SIZE: usize = 20; // 4 bytes per field * 5 fields
pub const RECORD_OFFSET_SIZE: usize = 8; // 4 bytes for offset + 4 bytes for length

/// Slot-array entry locating one record's bytes within the page.
/// A length of zero marks a slot whose record was never written.
#[derive(Debug, Clone, Copy)]
pub struct RecordLocation {
    pub offset: u32,
    pub length: u32,
}

impl RecordLocation {
    pub fn to_bytes(self) -> [u8; RECORD_OFFSET_SIZE] {
        let mut bytes = [0u8; RECORD_OFFSET_SIZE];
        LittleEndian::write_u32(&mut bytes[0..4], self.offset);
        LittleEndian::write_u32(&mut bytes[4..8], self.length);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let offset = LittleEndian::read_u32(&bytes[0..4]);
        let length = LittleEndian::read_u32(&bytes[4..8]);
        Self { offset, length }
    }
}
