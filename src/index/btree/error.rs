use thiserror::Error;

use crate::storage::buffer::BufferPoolError;

#[derive(Error, Debug)]
pub enum BTreeError {
    #[error("Tree order does not fit the page layout: {0}")]
    InvalidOrder(String),

    #[error("Node too large for page")]
    NodeTooLarge,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid page format")]
    InvalidPageFormat,

    #[error("Buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),
}
