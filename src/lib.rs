// Export public modules
pub mod common;
pub mod index;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use index::btree::BTreeIndex;
pub use storage::buffer::guard::{BasicPageGuard, ReadPageGuard, WritePageGuard};
pub use storage::buffer::{BufferPoolError, BufferPoolManager};
pub use storage::table::TableHeap;
pub use transaction::concurrency::lock_manager::{LockError, LockManager, LockMode};
pub use transaction::{IsolationLevel, Transaction, TransactionManager, TransactionState};
