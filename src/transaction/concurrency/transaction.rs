use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Rid, TableId, TxnId};
use crate::index::Index;
use crate::storage::table::TableHeap;
use crate::transaction::concurrency::lock_manager::{LockError, LockMode};

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Two-phase-locking transaction states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Errors that can occur during transaction processing
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Transaction {0} is not active")]
    NotActive(TxnId),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteType {
    Insert,
    Delete,
    Update,
}

/// Undo record for one table-heap mutation
pub struct TableWriteRecord {
    pub rid: Rid,
    pub table_id: TableId,
    pub wtype: WriteType,
    pub table: Arc<TableHeap>,
}

/// Undo record for one index mutation. Keys are stored in their encoded
/// form and the index as a type-erased handle so abort can replay the
/// record without knowing the key type; updates additionally carry the
/// old key and the old tuple image the heap undo restores.
pub struct IndexWriteRecord {
    pub rid: Rid,
    pub table_id: TableId,
    pub wtype: WriteType,
    pub key: Vec<u8>,
    pub old_key: Option<Vec<u8>>,
    pub old_tuple: Option<Vec<u8>>,
    pub index: Arc<dyn Index>,
}

#[derive(Default)]
struct LockSets {
    shared_tables: HashSet<TableId>,
    exclusive_tables: HashSet<TableId>,
    intention_shared_tables: HashSet<TableId>,
    intention_exclusive_tables: HashSet<TableId>,
    shared_intention_exclusive_tables: HashSet<TableId>,
    shared_rows: HashMap<TableId, HashSet<Rid>>,
    exclusive_rows: HashMap<TableId, HashSet<Rid>>,
}

impl LockSets {
    fn table_set(&mut self, mode: LockMode) -> &mut HashSet<TableId> {
        match mode {
            LockMode::Shared => &mut self.shared_tables,
            LockMode::Exclusive => &mut self.exclusive_tables,
            LockMode::IntentionShared => &mut self.intention_shared_tables,
            LockMode::IntentionExclusive => &mut self.intention_exclusive_tables,
            LockMode::SharedIntentionExclusive => &mut self.shared_intention_exclusive_tables,
        }
    }
}

/// Transaction - an active unit of work. Holds the 2PL bookkeeping: the
/// per-mode lock sets the lock manager maintains, and the write sets
/// the transaction manager replays on abort.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: Mutex<TransactionState>,
    locks: Mutex<LockSets>,
    write_set: Mutex<Vec<TableWriteRecord>>,
    index_write_set: Mutex<Vec<IndexWriteRecord>>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            locks: Mutex::new(LockSets::default()),
            write_set: Mutex::new(Vec::new()),
            index_write_set: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    pub(crate) fn record_table_lock(&self, mode: LockMode, table_id: TableId) {
        self.locks.lock().table_set(mode).insert(table_id);
    }

    pub(crate) fn erase_table_lock(&self, mode: LockMode, table_id: TableId) {
        self.locks.lock().table_set(mode).remove(&table_id);
    }

    pub(crate) fn record_row_lock(&self, mode: LockMode, table_id: TableId, rid: Rid) {
        let mut locks = self.locks.lock();
        let rows = match mode {
            LockMode::Shared => &mut locks.shared_rows,
            LockMode::Exclusive => &mut locks.exclusive_rows,
            _ => return,
        };
        rows.entry(table_id).or_default().insert(rid);
    }

    pub(crate) fn erase_row_lock(&self, mode: LockMode, table_id: TableId, rid: Rid) {
        let mut locks = self.locks.lock();
        let rows = match mode {
            LockMode::Shared => &mut locks.shared_rows,
            LockMode::Exclusive => &mut locks.exclusive_rows,
            _ => return,
        };
        if let Some(set) = rows.get_mut(&table_id) {
            set.remove(&rid);
        }
    }

    /// Any table-level lock admits shared row locks beneath it
    pub(crate) fn supports_shared_row_lock(&self, table_id: TableId) -> bool {
        let locks = self.locks.lock();
        locks.intention_shared_tables.contains(&table_id)
            || locks.intention_exclusive_tables.contains(&table_id)
            || locks.shared_tables.contains(&table_id)
            || locks.shared_intention_exclusive_tables.contains(&table_id)
            || locks.exclusive_tables.contains(&table_id)
    }

    /// Exclusive row locks need IX, X or SIX on the table
    pub(crate) fn supports_exclusive_row_lock(&self, table_id: TableId) -> bool {
        let locks = self.locks.lock();
        locks.intention_exclusive_tables.contains(&table_id)
            || locks.exclusive_tables.contains(&table_id)
            || locks.shared_intention_exclusive_tables.contains(&table_id)
    }

    /// Whether any row lock is still held under the table
    pub(crate) fn has_row_locks_under(&self, table_id: TableId) -> bool {
        let locks = self.locks.lock();
        let shared = locks
            .shared_rows
            .get(&table_id)
            .is_some_and(|rows| !rows.is_empty());
        let exclusive = locks
            .exclusive_rows
            .get(&table_id)
            .is_some_and(|rows| !rows.is_empty());
        shared || exclusive
    }

    pub(crate) fn table_locks_snapshot(&self) -> Vec<(TableId, LockMode)> {
        let locks = self.locks.lock();
        let mut snapshot = Vec::new();
        for &table_id in &locks.shared_tables {
            snapshot.push((table_id, LockMode::Shared));
        }
        for &table_id in &locks.exclusive_tables {
            snapshot.push((table_id, LockMode::Exclusive));
        }
        for &table_id in &locks.intention_shared_tables {
            snapshot.push((table_id, LockMode::IntentionShared));
        }
        for &table_id in &locks.intention_exclusive_tables {
            snapshot.push((table_id, LockMode::IntentionExclusive));
        }
        for &table_id in &locks.shared_intention_exclusive_tables {
            snapshot.push((table_id, LockMode::SharedIntentionExclusive));
        }
        snapshot
    }

    pub(crate) fn row_locks_snapshot(&self) -> Vec<(TableId, Rid, LockMode)> {
        let locks = self.locks.lock();
        let mut snapshot = Vec::new();
        for (&table_id, rows) in &locks.shared_rows {
            for &rid in rows {
                snapshot.push((table_id, rid, LockMode::Shared));
            }
        }
        for (&table_id, rows) in &locks.exclusive_rows {
            for &rid in rows {
                snapshot.push((table_id, rid, LockMode::Exclusive));
            }
        }
        snapshot
    }

    /// Record a table-heap mutation for undo
    pub fn append_table_write(&self, record: TableWriteRecord) {
        self.write_set.lock().push(record);
    }

    /// Record an index mutation for undo
    pub fn append_index_write(&self, record: IndexWriteRecord) {
        self.index_write_set.lock().push(record);
    }

    pub(crate) fn take_write_set(&self) -> Vec<TableWriteRecord> {
        std::mem::take(&mut *self.write_set.lock())
    }

    pub(crate) fn take_index_write_set(&self) -> Vec<IndexWriteRecord> {
        std::mem::take(&mut *self.index_write_set.lock())
    }
}
