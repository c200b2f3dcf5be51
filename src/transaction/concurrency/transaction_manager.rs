use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::types::TxnId;
use crate::storage::table::TupleMeta;
use crate::transaction::concurrency::lock_manager::LockManager;
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionError, TransactionState, WriteType,
};
use crate::transaction::wal::log_manager::{LogManager, LogRecordType};

/// Transaction manager: hands out transactions and drives their
/// lifecycle. Commit releases locks; abort first replays the write
/// sets backwards to undo the transaction's effects.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    lock_manager: Arc<LockManager>,
    log_manager: Arc<LogManager>,
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>, log_manager: Arc<LogManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            lock_manager,
            log_manager,
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Begin a new transaction at the given isolation level
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        self.log_manager.append_record(txn_id, LogRecordType::Begin);

        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.active_transactions
            .lock()
            .insert(txn_id, Arc::clone(&txn));
        txn
    }

    /// Commit: release every lock, then mark the transaction committed
    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        match txn.state() {
            TransactionState::Growing | TransactionState::Shrinking => {}
            _ => return Err(TransactionError::NotActive(txn.id())),
        }

        self.lock_manager.release_all_locks(txn);
        txn.set_state(TransactionState::Committed);
        self.log_manager.append_record(txn.id(), LogRecordType::Commit);
        self.active_transactions.lock().remove(&txn.id());
        Ok(())
    }

    /// Abort: undo the table write set in reverse, then the index write
    /// set in reverse, release all locks and mark the transaction
    /// aborted. Undo itself is infallible; a failure here means the
    /// write sets are corrupted and panics.
    pub fn abort(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        if txn.state() == TransactionState::Committed {
            return Err(TransactionError::NotActive(txn.id()));
        }
        log::debug!("aborting transaction {}", txn.id());

        let table_writes = txn.take_write_set();
        let index_writes = txn.take_index_write_set();

        for record in table_writes.iter().rev() {
            match record.wtype {
                WriteType::Insert => {
                    record
                        .table
                        .set_tuple_meta(record.rid, TupleMeta { is_deleted: true })
                        .expect("abort undo: insert record names a missing tuple");
                }
                WriteType::Delete => {
                    record
                        .table
                        .set_tuple_meta(record.rid, TupleMeta { is_deleted: false })
                        .expect("abort undo: delete record names a missing tuple");
                }
                WriteType::Update => {
                    let old_tuple = index_writes
                        .iter()
                        .find(|iw| {
                            iw.table_id == record.table_id
                                && iw.rid == record.rid
                                && iw.old_tuple.is_some()
                        })
                        .and_then(|iw| iw.old_tuple.as_deref())
                        .expect("abort undo: update without a matching index write record");
                    record
                        .table
                        .update_tuple_in_place(record.rid, old_tuple)
                        .expect("abort undo: restoring the old tuple image failed");
                }
            }
        }

        for record in index_writes.iter().rev() {
            match record.wtype {
                WriteType::Insert => {
                    record
                        .index
                        .delete_entry(&record.key)
                        .expect("abort undo: removing an inserted index entry failed");
                }
                WriteType::Delete => {
                    record
                        .index
                        .insert_entry(&record.key, record.rid)
                        .expect("abort undo: restoring a deleted index entry failed");
                }
                WriteType::Update => {
                    record
                        .index
                        .delete_entry(&record.key)
                        .expect("abort undo: removing an updated index entry failed");
                    let old_key = record
                        .old_key
                        .as_deref()
                        .expect("abort undo: update without the old index key");
                    record
                        .index
                        .insert_entry(old_key, record.rid)
                        .expect("abort undo: restoring an updated index entry failed");
                }
            }
        }

        self.lock_manager.release_all_locks(txn);
        txn.set_state(TransactionState::Aborted);
        self.log_manager.append_record(txn.id(), LogRecordType::Abort);
        self.active_transactions.lock().remove(&txn.id());
        Ok(())
    }

    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active_transactions.lock().get(&txn_id).cloned()
    }

    pub fn active_transaction_ids(&self) -> Vec<TxnId> {
        self.active_transactions.lock().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_manager() -> TransactionManager {
        let lock_manager = Arc::new(LockManager::new(
            LockManager::DEFAULT_CYCLE_DETECTION_INTERVAL,
        ));
        TransactionManager::new(lock_manager, Arc::new(LogManager::new()))
    }

    #[test]
    fn test_begin_assigns_increasing_ids() {
        let manager = test_manager();
        let first = manager.begin(IsolationLevel::ReadCommitted);
        let second = manager.begin(IsolationLevel::RepeatableRead);
        assert!(second.id() > first.id());
        assert_eq!(manager.active_transaction_ids().len(), 2);
    }

    #[test]
    fn test_commit_transitions_state() {
        let manager = test_manager();
        let txn = manager.begin(IsolationLevel::ReadCommitted);
        manager.commit(&txn).unwrap();
        assert_eq!(txn.state(), TransactionState::Committed);
        assert!(manager.get_transaction(txn.id()).is_none());

        // A second commit is rejected.
        assert!(manager.commit(&txn).is_err());
    }

    #[test]
    fn test_abort_of_empty_transaction() {
        let manager = test_manager();
        let txn = manager.begin(IsolationLevel::RepeatableRead);
        manager.abort(&txn).unwrap();
        assert_eq!(txn.state(), TransactionState::Aborted);
        assert!(manager.get_transaction(txn.id()).is_none());
    }

    #[test]
    fn test_abort_after_deadlock_victimization_is_allowed() {
        let manager = test_manager();
        let txn = manager.begin(IsolationLevel::RepeatableRead);
        // The deadlock detector aborts by state flip; the owning thread
        // then still runs the full abort path.
        txn.set_state(TransactionState::Aborted);
        manager.abort(&txn).unwrap();
        assert_eq!(txn.state(), TransactionState::Aborted);
    }
}
