use thiserror::Error;

use crate::common::types::PageId;
use crate::storage::buffer::replacer::ReplacerError;
use crate::storage::disk::DiskManagerError;

#[derive(Error, Debug)]
pub enum BufferPoolError {
    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("Buffer pool is full: every frame is pinned")]
    BufferPoolFull,

    #[error("Disk manager error: {0}")]
    Disk(#[from] DiskManagerError),

    #[error("Replacer error: {0}")]
    Replacer(#[from] ReplacerError),
}
