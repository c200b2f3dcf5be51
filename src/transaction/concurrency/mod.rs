mod deadlock;
pub mod lock_manager;
pub mod transaction;
pub mod transaction_manager;

pub use lock_manager::{LockError, LockManager, LockMode};
pub use transaction::{IsolationLevel, Transaction, TransactionError, TransactionState};
pub use transaction_manager::TransactionManager;
