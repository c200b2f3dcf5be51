use serde::{Deserialize, Serialize};

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};

/// Typed image of one tree page
#[derive(Debug, Serialize, Deserialize)]
pub enum TreeNode<K> {
    Internal(InternalNode<K>),
    Leaf(LeafNode<K>),
}

/// Leaf page: sorted keys with their record ids, plus the doubly linked
/// sibling chain used by iterators.
#[derive(Debug, Serialize, Deserialize)]
pub struct LeafNode<K> {
    pub keys: Vec<K>,
    pub rids: Vec<Rid>,
    pub prev_leaf: PageId,
    pub next_leaf: PageId,
}

/// Internal page: sorted separator keys with `keys.len() + 1` children.
/// `children[i]` covers keys below `keys[i]`; `children[i + 1]` covers
/// keys at or above it.
#[derive(Debug, Serialize, Deserialize)]
pub struct InternalNode<K> {
    pub keys: Vec<K>,
    pub children: Vec<PageId>,
}

impl<K: Clone + Ord> LeafNode<K> {
    pub fn new() -> Self {
        Self {
            keys: Vec::new(),
            rids: Vec::new(),
            prev_leaf: INVALID_PAGE_ID,
            next_leaf: INVALID_PAGE_ID,
        }
    }

    pub fn get(&self, key: &K) -> Option<Rid> {
        match self.keys.binary_search(key) {
            Ok(i) => Some(self.rids[i]),
            Err(_) => None,
        }
    }

    /// Insert in sorted position; returns false on a duplicate key
    pub fn insert(&mut self, key: K, rid: Rid) -> bool {
        match self.keys.binary_search(&key) {
            Ok(_) => false,
            Err(pos) => {
                self.keys.insert(pos, key);
                self.rids.insert(pos, rid);
                true
            }
        }
    }

    /// Remove the key; returns false if it was not present
    pub fn remove(&mut self, key: &K) -> bool {
        match self.keys.binary_search(key) {
            Ok(pos) => {
                self.keys.remove(pos);
                self.rids.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    /// Index of the first entry whose key is >= `key`
    pub fn lower_bound(&self, key: &K) -> usize {
        match self.keys.binary_search(key) {
            Ok(pos) => pos,
            Err(pos) => pos,
        }
    }

    /// Move the upper half of the entries into a fresh right sibling and
    /// return it with the separator (the right half's first key). Sibling
    /// page ids are left for the caller to splice.
    pub fn split(&mut self) -> (K, LeafNode<K>) {
        let split_point = self.keys.len() / 2;
        let mut right = LeafNode::new();
        right.keys = self.keys.split_off(split_point);
        right.rids = self.rids.split_off(split_point);
        let separator = right.keys[0].clone();
        (separator, right)
    }
}

impl<K: Clone + Ord> Default for LeafNode<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Clone + Ord> InternalNode<K> {
    /// Root node produced when the old root splits
    pub fn new_root(separator: K, left: PageId, right: PageId) -> Self {
        Self {
            keys: vec![separator],
            children: vec![left, right],
        }
    }

    /// Index of the child to follow for `key`: the child after the
    /// largest separator <= key.
    pub fn child_index(&self, key: &K) -> usize {
        match self.keys.binary_search(key) {
            Ok(i) => i + 1,
            Err(i) => i,
        }
    }

    /// Splice in a separator with the child to its right, keeping keys
    /// sorted. Used after a child split.
    pub fn insert_child(&mut self, separator: K, right_child: PageId) {
        let pos = match self.keys.binary_search(&separator) {
            Ok(pos) => pos,
            Err(pos) => pos,
        };
        self.keys.insert(pos, separator);
        self.children.insert(pos + 1, right_child);
    }

    /// Split around the middle key, which moves up to the parent; the
    /// upper halves of keys and children go to the returned right node.
    pub fn split(&mut self) -> (K, InternalNode<K>) {
        let mid = self.keys.len() / 2;
        let right = InternalNode {
            keys: self.keys.split_off(mid + 1),
            children: self.children.split_off(mid + 1),
        };
        let push_up = match self.keys.pop() {
            Some(key) => key,
            None => unreachable!("internal split on a node without keys"),
        };
        (push_up, right)
    }

    pub fn size(&self) -> usize {
        self.children.len()
    }
}
