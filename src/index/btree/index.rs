use std::marker::PhantomData;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::iterator::BTreeIterator;
use crate::index::btree::node::{InternalNode, LeafNode, TreeNode};
use crate::index::btree::serialization::{deserialize_node, serialize_node, validate_order};
use crate::index::Index;
use crate::storage::buffer::guard::WritePageGuard;
use crate::storage::buffer::BufferPoolManager;

/// Disk-resident B+Tree index.
///
/// All page access goes through buffer pool guards; the descent path
/// lives on the call stack, so pages carry no parent pointers. A
/// tree-wide readers-writer lock gates the top-level operations
/// (lookups and iteration share it, mutations take it exclusively);
/// per-page latches are acquired top-down underneath it.
pub struct BTreeIndex<K> {
    buffer_pool: Arc<BufferPoolManager>,
    header_page_id: PageId,
    leaf_max_size: usize,
    internal_max_size: usize,
    op_latch: RwLock<()>,
    _key: PhantomData<fn() -> K>,
}

impl<K> BTreeIndex<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned,
{
    /// Create an empty tree. The header page stores the root page id;
    /// an empty tree has no root.
    pub fn new(
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self, BTreeError> {
        validate_order::<K>(leaf_max_size, internal_max_size)?;

        let mut header_guard = buffer_pool.new_page_guarded()?;
        let header_page_id = header_guard.page_id();
        LittleEndian::write_u32(&mut header_guard.write().data[0..4], INVALID_PAGE_ID);
        header_guard.mark_dirty();
        drop(header_guard);

        Ok(Self {
            buffer_pool,
            header_page_id,
            leaf_max_size,
            internal_max_size,
            op_latch: RwLock::new(()),
            _key: PhantomData,
        })
    }

    /// Point lookup
    pub fn get(&self, key: &K) -> Result<Option<Rid>, BTreeError> {
        let _gate = self.op_latch.read();
        let mut page_id = self.root_page_id()?;
        if page_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        loop {
            let guard = self.buffer_pool.fetch_page_read(page_id)?;
            match deserialize_node::<K>(&guard)? {
                TreeNode::Leaf(leaf) => return Ok(leaf.get(key)),
                TreeNode::Internal(node) => page_id = node.children[node.child_index(key)],
            }
        }
    }

    /// Insert a key; returns false (and changes nothing) on a duplicate
    pub fn insert(&self, key: K, rid: Rid) -> Result<bool, BTreeError> {
        let _gate = self.op_latch.write();

        let root = self.root_page_id()?;
        if root == INVALID_PAGE_ID {
            let mut guard = self.buffer_pool.new_page_guarded()?;
            let mut leaf = LeafNode::new();
            leaf.insert(key, rid);
            serialize_node(&TreeNode::Leaf(leaf), &mut guard.write())?;
            guard.mark_dirty();
            let root_id = guard.page_id();
            drop(guard);
            self.set_root_page_id(root_id)?;
            return Ok(true);
        }

        let (inserted, split) = self.insert_recursive(root, key, rid)?;
        if let Some((separator, right_page_id)) = split {
            let mut guard = self.buffer_pool.new_page_guarded()?;
            let new_root = InternalNode::new_root(separator, root, right_page_id);
            serialize_node(&TreeNode::Internal(new_root), &mut guard.write())?;
            guard.mark_dirty();
            let new_root_id = guard.page_id();
            drop(guard);
            self.set_root_page_id(new_root_id)?;
        }
        Ok(inserted)
    }

    /// Remove a key; returns false if it was not present
    pub fn remove(&self, key: &K) -> Result<bool, BTreeError> {
        let _gate = self.op_latch.write();

        let root = self.root_page_id()?;
        if root == INVALID_PAGE_ID {
            return Ok(false);
        }

        let (removed, _underflow) = self.remove_recursive(root, key)?;
        if !removed {
            return Ok(false);
        }

        // The root is exempt from the minimum-size rule, but it collapses
        // when it degenerates: an internal root with one child promotes
        // that child, an empty leaf root empties the tree.
        let root_node = {
            let guard = self.buffer_pool.fetch_page_read(root)?;
            deserialize_node::<K>(&guard)?
        };
        match root_node {
            TreeNode::Internal(node) if node.children.len() == 1 => {
                self.set_root_page_id(node.children[0])?;
                self.buffer_pool.delete_page(root)?;
            }
            TreeNode::Leaf(leaf) if leaf.keys.is_empty() => {
                self.set_root_page_id(INVALID_PAGE_ID)?;
                self.buffer_pool.delete_page(root)?;
            }
            _ => {}
        }
        Ok(true)
    }

    /// Iterator positioned at the first entry
    pub fn iter(&self) -> Result<BTreeIterator<K>, BTreeError> {
        let _gate = self.op_latch.read();
        let mut page_id = self.root_page_id()?;
        if page_id == INVALID_PAGE_ID {
            return Ok(self.end());
        }

        loop {
            let guard = self.buffer_pool.fetch_page_read(page_id)?;
            match deserialize_node::<K>(&guard)? {
                TreeNode::Leaf(_) => {
                    return Ok(BTreeIterator::new(self.buffer_pool.clone(), page_id, 0))
                }
                TreeNode::Internal(node) => page_id = node.children[0],
            }
        }
    }

    /// Iterator positioned at the first entry with key >= `key`
    pub fn iter_from(&self, key: &K) -> Result<BTreeIterator<K>, BTreeError> {
        let _gate = self.op_latch.read();
        let mut page_id = self.root_page_id()?;
        if page_id == INVALID_PAGE_ID {
            return Ok(self.end());
        }

        loop {
            let guard = self.buffer_pool.fetch_page_read(page_id)?;
            match deserialize_node::<K>(&guard)? {
                TreeNode::Leaf(leaf) => {
                    let index = leaf.lower_bound(key);
                    return Ok(BTreeIterator::new(self.buffer_pool.clone(), page_id, index));
                }
                TreeNode::Internal(node) => page_id = node.children[node.child_index(key)],
            }
        }
    }

    /// The exhausted iterator every forward iterator converges to
    pub fn end(&self) -> BTreeIterator<K> {
        BTreeIterator::new(self.buffer_pool.clone(), INVALID_PAGE_ID, 0)
    }

    /// Collect the record ids of all keys in `[start, end]`
    pub fn range_scan(&self, start: &K, end: &K) -> Result<Vec<Rid>, BTreeError> {
        if start > end {
            return Ok(Vec::new());
        }

        let mut iter = self.iter_from(start)?;
        let mut rids = Vec::new();
        while let Some((key, rid)) = iter.next()? {
            if &key > end {
                break;
            }
            rids.push(rid);
        }
        Ok(rids)
    }

    fn min_leaf_size(&self) -> usize {
        self.leaf_max_size.div_ceil(2)
    }

    fn min_internal_size(&self) -> usize {
        self.internal_max_size.div_ceil(2)
    }

    fn root_page_id(&self) -> Result<PageId, BTreeError> {
        let guard = self.buffer_pool.fetch_page_read(self.header_page_id)?;
        Ok(LittleEndian::read_u32(&guard.data[0..4]))
    }

    fn set_root_page_id(&self, root: PageId) -> Result<(), BTreeError> {
        let mut guard = self.buffer_pool.fetch_page_write(self.header_page_id)?;
        LittleEndian::write_u32(&mut guard.data[0..4], root);
        guard.mark_dirty();
        Ok(())
    }

    /// Descend to the leaf, insert, and propagate splits back up the
    /// recursion. Returns whether the key was inserted and, if this
    /// node split, the separator and new right sibling for the parent.
    #[allow(clippy::type_complexity)]
    fn insert_recursive(
        &self,
        page_id: PageId,
        key: K,
        rid: Rid,
    ) -> Result<(bool, Option<(K, PageId)>), BTreeError> {
        let mut guard = self.buffer_pool.fetch_page_write(page_id)?;
        match deserialize_node::<K>(&guard)? {
            TreeNode::Leaf(mut leaf) => {
                if !leaf.insert(key, rid) {
                    return Ok((false, None));
                }
                if leaf.keys.len() < self.leaf_max_size {
                    serialize_node(&TreeNode::Leaf(leaf), &mut guard)?;
                    guard.mark_dirty();
                    return Ok((true, None));
                }

                // The leaf reached its maximum: move the upper half to a
                // new right sibling and splice it into the leaf chain.
                let (separator, mut right) = leaf.split();
                let mut right_guard = self.buffer_pool.new_page_guarded()?;
                let right_page_id = right_guard.page_id();
                right.prev_leaf = page_id;
                right.next_leaf = leaf.next_leaf;
                leaf.next_leaf = right_page_id;

                if right.next_leaf != INVALID_PAGE_ID {
                    self.set_prev_leaf(right.next_leaf, right_page_id)?;
                }

                serialize_node(&TreeNode::Leaf(right), &mut right_guard.write())?;
                right_guard.mark_dirty();
                serialize_node(&TreeNode::Leaf(leaf), &mut guard)?;
                guard.mark_dirty();
                Ok((true, Some((separator, right_page_id))))
            }
            TreeNode::Internal(mut internal) => {
                let child_index = internal.child_index(&key);
                let child_page_id = internal.children[child_index];
                let (inserted, split) = self.insert_recursive(child_page_id, key, rid)?;
                let Some((separator, new_child_id)) = split else {
                    return Ok((inserted, None));
                };

                internal.insert_child(separator, new_child_id);
                if internal.children.len() <= self.internal_max_size {
                    serialize_node(&TreeNode::Internal(internal), &mut guard)?;
                    guard.mark_dirty();
                    return Ok((inserted, None));
                }

                let (push_up, right) = internal.split();
                let mut right_guard = self.buffer_pool.new_page_guarded()?;
                let right_page_id = right_guard.page_id();
                serialize_node(&TreeNode::Internal(right), &mut right_guard.write())?;
                right_guard.mark_dirty();
                serialize_node(&TreeNode::Internal(internal), &mut guard)?;
                guard.mark_dirty();
                Ok((inserted, Some((push_up, right_page_id))))
            }
        }
    }

    /// Descend to the leaf, delete, and rebalance underflowing children
    /// on the way back up. Returns whether the key was removed and
    /// whether this node is now below its minimum size.
    fn remove_recursive(&self, page_id: PageId, key: &K) -> Result<(bool, bool), BTreeError> {
        let mut guard = self.buffer_pool.fetch_page_write(page_id)?;
        match deserialize_node::<K>(&guard)? {
            TreeNode::Leaf(mut leaf) => {
                if !leaf.remove(key) {
                    return Ok((false, false));
                }
                let underflow = leaf.keys.len() < self.min_leaf_size();
                serialize_node(&TreeNode::Leaf(leaf), &mut guard)?;
                guard.mark_dirty();
                Ok((true, underflow))
            }
            TreeNode::Internal(mut internal) => {
                let child_index = internal.child_index(key);
                let child_page_id = internal.children[child_index];
                let (removed, child_underflow) = self.remove_recursive(child_page_id, key)?;
                if !removed {
                    return Ok((false, false));
                }

                if child_underflow {
                    self.rebalance_child(&mut internal, child_index)?;
                }
                let underflow = internal.children.len() < self.min_internal_size();
                if child_underflow {
                    serialize_node(&TreeNode::Internal(internal), &mut guard)?;
                    guard.mark_dirty();
                }
                Ok((true, underflow))
            }
        }
    }

    /// Fix an underflowing child of `parent`: borrow an entry from a
    /// sibling with spares, else coalesce with a sibling and drop the
    /// separator from the parent.
    fn rebalance_child(
        &self,
        parent: &mut InternalNode<K>,
        child_index: usize,
    ) -> Result<(), BTreeError> {
        let child_page_id = parent.children[child_index];
        let child_guard = self.buffer_pool.fetch_page_write(child_page_id)?;
        match deserialize_node::<K>(&child_guard)? {
            TreeNode::Leaf(child) => self.rebalance_leaf(parent, child_index, child_guard, child),
            TreeNode::Internal(child) => {
                self.rebalance_internal(parent, child_index, child_guard, child)
            }
        }
    }

    fn rebalance_leaf(
        &self,
        parent: &mut InternalNode<K>,
        child_index: usize,
        mut child_guard: WritePageGuard,
        mut child: LeafNode<K>,
    ) -> Result<(), BTreeError> {
        let child_page_id = parent.children[child_index];

        if child_index > 0 {
            let left_page_id = parent.children[child_index - 1];
            let mut left_guard = self.buffer_pool.fetch_page_write(left_page_id)?;
            let TreeNode::Leaf(mut left) = deserialize_node::<K>(&left_guard)? else {
                return Err(BTreeError::InvalidPageFormat);
            };

            if left.keys.len() > self.min_leaf_size() {
                // Borrow the left sibling's last entry.
                if let (Some(key), Some(rid)) = (left.keys.pop(), left.rids.pop()) {
                    child.keys.insert(0, key);
                    child.rids.insert(0, rid);
                }
                parent.keys[child_index - 1] = child.keys[0].clone();
                serialize_node(&TreeNode::Leaf(left), &mut left_guard)?;
                left_guard.mark_dirty();
                serialize_node(&TreeNode::Leaf(child), &mut child_guard)?;
                child_guard.mark_dirty();
                return Ok(());
            }

            // Coalesce the child into its left sibling.
            let spliced_next = child.next_leaf;
            left.keys.append(&mut child.keys);
            left.rids.append(&mut child.rids);
            left.next_leaf = spliced_next;
            serialize_node(&TreeNode::Leaf(left), &mut left_guard)?;
            left_guard.mark_dirty();
            drop(left_guard);

            if spliced_next != INVALID_PAGE_ID {
                self.set_prev_leaf(spliced_next, left_page_id)?;
            }

            parent.keys.remove(child_index - 1);
            parent.children.remove(child_index);
            drop(child_guard);
            self.buffer_pool.delete_page(child_page_id)?;
            return Ok(());
        }

        // Leftmost child: work with the right sibling instead.
        let right_page_id = parent.children[child_index + 1];
        let mut right_guard = self.buffer_pool.fetch_page_write(right_page_id)?;
        let TreeNode::Leaf(mut right) = deserialize_node::<K>(&right_guard)? else {
            return Err(BTreeError::InvalidPageFormat);
        };

        if right.keys.len() > self.min_leaf_size() {
            // Borrow the right sibling's first entry.
            child.keys.push(right.keys.remove(0));
            child.rids.push(right.rids.remove(0));
            parent.keys[child_index] = right.keys[0].clone();
            serialize_node(&TreeNode::Leaf(right), &mut right_guard)?;
            right_guard.mark_dirty();
            serialize_node(&TreeNode::Leaf(child), &mut child_guard)?;
            child_guard.mark_dirty();
            return Ok(());
        }

        // Coalesce the right sibling into the child.
        let spliced_next = right.next_leaf;
        child.keys.append(&mut right.keys);
        child.rids.append(&mut right.rids);
        child.next_leaf = spliced_next;
        serialize_node(&TreeNode::Leaf(child), &mut child_guard)?;
        child_guard.mark_dirty();
        drop(child_guard);

        if spliced_next != INVALID_PAGE_ID {
            self.set_prev_leaf(spliced_next, child_page_id)?;
        }

        parent.keys.remove(child_index);
        parent.children.remove(child_index + 1);
        drop(right_guard);
        self.buffer_pool.delete_page(right_page_id)?;
        Ok(())
    }

    fn rebalance_internal(
        &self,
        parent: &mut InternalNode<K>,
        child_index: usize,
        mut child_guard: WritePageGuard,
        mut child: InternalNode<K>,
    ) -> Result<(), BTreeError> {
        let child_page_id = parent.children[child_index];

        if child_index > 0 {
            let left_page_id = parent.children[child_index - 1];
            let mut left_guard = self.buffer_pool.fetch_page_write(left_page_id)?;
            let TreeNode::Internal(mut left) = deserialize_node::<K>(&left_guard)? else {
                return Err(BTreeError::InvalidPageFormat);
            };

            if left.size() > self.min_internal_size() {
                // Rotate the left sibling's last child through the
                // parent separator.
                if let (Some(separator), Some(moved)) = (left.keys.pop(), left.children.pop()) {
                    child.keys.insert(0, parent.keys[child_index - 1].clone());
                    parent.keys[child_index - 1] = separator;
                    child.children.insert(0, moved);
                }
                serialize_node(&TreeNode::Internal(left), &mut left_guard)?;
                left_guard.mark_dirty();
                serialize_node(&TreeNode::Internal(child), &mut child_guard)?;
                child_guard.mark_dirty();
                return Ok(());
            }

            // Pull the separator down and merge the child into the left
            // sibling.
            left.keys.push(parent.keys[child_index - 1].clone());
            left.keys.append(&mut child.keys);
            left.children.append(&mut child.children);
            serialize_node(&TreeNode::Internal(left), &mut left_guard)?;
            left_guard.mark_dirty();
            drop(left_guard);

            parent.keys.remove(child_index - 1);
            parent.children.remove(child_index);
            drop(child_guard);
            self.buffer_pool.delete_page(child_page_id)?;
            return Ok(());
        }

        let right_page_id = parent.children[child_index + 1];
        let mut right_guard = self.buffer_pool.fetch_page_write(right_page_id)?;
        let TreeNode::Internal(mut right) = deserialize_node::<K>(&right_guard)? else {
            return Err(BTreeError::InvalidPageFormat);
        };

        if right.size() > self.min_internal_size() {
            // Rotate the right sibling's first child through the parent
            // separator.
            child.keys.push(parent.keys[child_index].clone());
            parent.keys[child_index] = right.keys.remove(0);
            child.children.push(right.children.remove(0));
            serialize_node(&TreeNode::Internal(right), &mut right_guard)?;
            right_guard.mark_dirty();
            serialize_node(&TreeNode::Internal(child), &mut child_guard)?;
            child_guard.mark_dirty();
            return Ok(());
        }

        // Pull the separator down and merge the right sibling into the
        // child.
        child.keys.push(parent.keys[child_index].clone());
        child.keys.append(&mut right.keys);
        child.children.append(&mut right.children);
        serialize_node(&TreeNode::Internal(child), &mut child_guard)?;
        child_guard.mark_dirty();

        parent.keys.remove(child_index);
        parent.children.remove(child_index + 1);
        drop(right_guard);
        self.buffer_pool.delete_page(right_page_id)?;
        Ok(())
    }

    /// Update a leaf's back-pointer after its left neighbour changed
    fn set_prev_leaf(&self, page_id: PageId, prev: PageId) -> Result<(), BTreeError> {
        let mut guard = self.buffer_pool.fetch_page_write(page_id)?;
        let TreeNode::Leaf(mut leaf) = deserialize_node::<K>(&guard)? else {
            return Err(BTreeError::InvalidPageFormat);
        };
        leaf.prev_leaf = prev;
        serialize_node(&TreeNode::Leaf(leaf), &mut guard)?;
        guard.mark_dirty();
        Ok(())
    }
}

impl<K> Index for BTreeIndex<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync,
{
    fn insert_entry(&self, key: &[u8], rid: Rid) -> Result<bool, BTreeError> {
        let key: K =
            bincode::deserialize(key).map_err(|e| BTreeError::Serialization(e.to_string()))?;
        self.insert(key, rid)
    }

    fn delete_entry(&self, key: &[u8]) -> Result<bool, BTreeError> {
        let key: K =
            bincode::deserialize(key).map_err(|e| BTreeError::Serialization(e.to_string()))?;
        self.remove(&key)
    }
}
