pub mod error;
pub mod index;
pub mod iterator;
pub mod node;
pub mod serialization;

pub use error::BTreeError;
pub use index::BTreeIndex;
pub use iterator::BTreeIterator;
pub use node::{InternalNode, LeafNode, TreeNode};
pub use serialization::{deserialize_node, encode_key, serialize_node};
