pub mod btree;

use crate::common::types::Rid;
use crate::index::btree::BTreeError;

/// Key-type-erased index handle. Transactions record index writes with
/// bincode-encoded keys so undo can replay them without knowing the key
/// type; every `BTreeIndex<K>` implements this by decoding the key.
pub trait Index: Send + Sync {
    fn insert_entry(&self, key: &[u8], rid: Rid) -> Result<bool, BTreeError>;
    fn delete_entry(&self, key: &[u8]) -> Result<bool, BTreeError>;
}
