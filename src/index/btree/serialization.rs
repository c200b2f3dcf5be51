use std::mem;

use byteorder::{ByteOrder, LittleEndian};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{Page, Rid, PAGE_SIZE};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::TreeNode;

/// Length prefix in front of the bincode node image
const NODE_LEN_PREFIX: usize = 4;

/// Fixed bytes reserved for the enum tag, vector lengths and sibling
/// links when estimating whether a node of a given order can fit.
const NODE_OVERHEAD: usize = 64;

/// Serialize a node into a page behind a length prefix
pub fn serialize_node<K: Serialize>(node: &TreeNode<K>, page: &mut Page) -> Result<(), BTreeError> {
    let bytes =
        bincode::serialize(node).map_err(|e| BTreeError::Serialization(e.to_string()))?;
    if NODE_LEN_PREFIX + bytes.len() > PAGE_SIZE {
        return Err(BTreeError::NodeTooLarge);
    }

    page.data.fill(0);
    LittleEndian::write_u32(&mut page.data[0..NODE_LEN_PREFIX], bytes.len() as u32);
    page.data[NODE_LEN_PREFIX..NODE_LEN_PREFIX + bytes.len()].copy_from_slice(&bytes);
    Ok(())
}

/// Deserialize the node stored in a page
pub fn deserialize_node<K: DeserializeOwned>(page: &Page) -> Result<TreeNode<K>, BTreeError> {
    let len = LittleEndian::read_u32(&page.data[0..NODE_LEN_PREFIX]) as usize;
    if len == 0 || NODE_LEN_PREFIX + len > PAGE_SIZE {
        return Err(BTreeError::InvalidPageFormat);
    }
    bincode::deserialize(&page.data[NODE_LEN_PREFIX..NODE_LEN_PREFIX + len])
        .map_err(|e| BTreeError::Serialization(e.to_string()))
}

/// Encode a key the way it is stored inside node images; this is the key
/// format transactions record in their index write sets.
pub fn encode_key<K: Serialize>(key: &K) -> Result<Vec<u8>, BTreeError> {
    bincode::serialize(key).map_err(|e| BTreeError::Serialization(e.to_string()))
}

/// Check that full nodes of the requested orders fit a page. The
/// estimate is based on the in-memory key size, which matches the
/// bincode encoding for fixed-size keys; variable-size keys are still
/// caught at serialization time by `NodeTooLarge`.
pub fn validate_order<K>(
    leaf_max_size: usize,
    internal_max_size: usize,
) -> Result<(), BTreeError> {
    if leaf_max_size < 2 {
        return Err(BTreeError::InvalidOrder(format!(
            "leaf_max_size {leaf_max_size} must be at least 2"
        )));
    }
    if internal_max_size < 3 {
        return Err(BTreeError::InvalidOrder(format!(
            "internal_max_size {internal_max_size} must be at least 3"
        )));
    }

    let key_size = mem::size_of::<K>().max(1);
    let leaf_bytes = NODE_OVERHEAD + leaf_max_size * (key_size + mem::size_of::<Rid>());
    // An overflowing internal node briefly holds one extra child.
    let internal_bytes =
        NODE_OVERHEAD + (internal_max_size + 1) * (key_size + mem::size_of::<u32>());

    let capacity = PAGE_SIZE - NODE_LEN_PREFIX;
    if leaf_bytes > capacity {
        return Err(BTreeError::InvalidOrder(format!(
            "leaf_max_size {leaf_max_size} needs ~{leaf_bytes} bytes, page holds {capacity}"
        )));
    }
    if internal_bytes > capacity {
        return Err(BTreeError::InvalidOrder(format!(
            "internal_max_size {internal_max_size} needs ~{internal_bytes} bytes, page holds {capacity}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::INVALID_PAGE_ID;
    use crate::index::btree::node::{InternalNode, LeafNode};

    #[test]
    fn test_leaf_round_trip() {
        let mut leaf = LeafNode::new();
        leaf.insert(10i64, Rid::new(2, 0));
        leaf.insert(20i64, Rid::new(2, 1));
        leaf.next_leaf = 7;

        let mut page = Page::new(1);
        serialize_node(&TreeNode::Leaf(leaf), &mut page).unwrap();

        match deserialize_node::<i64>(&page).unwrap() {
            TreeNode::Leaf(read) => {
                assert_eq!(read.keys, vec![10, 20]);
                assert_eq!(read.rids, vec![Rid::new(2, 0), Rid::new(2, 1)]);
                assert_eq!(read.next_leaf, 7);
                assert_eq!(read.prev_leaf, INVALID_PAGE_ID);
            }
            TreeNode::Internal(_) => panic!("expected a leaf"),
        }
    }

    #[test]
    fn test_internal_round_trip() {
        let node = InternalNode::new_root(42i64, 3, 4);
        let mut page = Page::new(1);
        serialize_node(&TreeNode::Internal(node), &mut page).unwrap();

        match deserialize_node::<i64>(&page).unwrap() {
            TreeNode::Internal(read) => {
                assert_eq!(read.keys, vec![42]);
                assert_eq!(read.children, vec![3, 4]);
            }
            TreeNode::Leaf(_) => panic!("expected an internal node"),
        }
    }

    #[test]
    fn test_deserialize_of_blank_page_is_rejected() {
        let page = Page::new(1);
        assert!(matches!(
            deserialize_node::<i64>(&page),
            Err(BTreeError::InvalidPageFormat)
        ));
    }

    #[test]
    fn test_validate_order_bounds() {
        assert!(validate_order::<i64>(64, 64).is_ok());
        assert!(validate_order::<i64>(1, 64).is_err());
        assert!(validate_order::<i64>(64, 2).is_err());
        // A node of this order could never fit a 4K page.
        assert!(validate_order::<[u8; 512]>(64, 64).is_err());
    }
}
