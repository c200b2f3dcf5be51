use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::TreeNode;
use crate::index::btree::serialization::deserialize_node;
use crate::storage::buffer::BufferPoolManager;

/// Forward iterator over the leaf chain. Each step read-latches the
/// current leaf through a page guard for just long enough to copy the
/// entry out, then crosses to `next_leaf` when the leaf is exhausted.
/// The end of iteration is the invalid page id.
pub struct BTreeIterator<K> {
    buffer_pool: Arc<BufferPoolManager>,
    page_id: PageId,
    index: usize,
    _key: PhantomData<fn() -> K>,
}

impl<K> BTreeIterator<K>
where
    K: Clone + Ord + DeserializeOwned,
{
    pub(crate) fn new(buffer_pool: Arc<BufferPoolManager>, page_id: PageId, index: usize) -> Self {
        Self {
            buffer_pool,
            page_id,
            index,
            _key: PhantomData,
        }
    }

    /// Whether the iterator has run off the end of the leaf chain
    pub fn is_end(&self) -> bool {
        self.page_id == INVALID_PAGE_ID
    }

    /// The next entry in key order, or None once the chain is exhausted
    pub fn next(&mut self) -> Result<Option<(K, Rid)>, BTreeError> {
        while self.page_id != INVALID_PAGE_ID {
            let guard = self.buffer_pool.fetch_page_read(self.page_id)?;
            let TreeNode::Leaf(leaf) = deserialize_node::<K>(&guard)? else {
                return Err(BTreeError::InvalidPageFormat);
            };

            if self.index < leaf.keys.len() {
                let entry = (leaf.keys[self.index].clone(), leaf.rids[self.index]);
                self.index += 1;
                return Ok(Some(entry));
            }

            self.page_id = leaf.next_leaf;
            self.index = 0;
        }
        Ok(None)
    }
}
