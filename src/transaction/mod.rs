// Transaction management: two-phase locking with multi-granularity
// locks, deadlock detection and write-set undo on abort.

pub mod concurrency;
pub mod wal;

// Public exports
pub use concurrency::lock_manager::{LockError, LockManager, LockMode};
pub use concurrency::transaction::{
    IndexWriteRecord, IsolationLevel, TableWriteRecord, Transaction, TransactionError,
    TransactionState, WriteType,
};
pub use concurrency::transaction_manager::TransactionManager;
pub use wal::log_manager::{LogManager, LogRecordType};
