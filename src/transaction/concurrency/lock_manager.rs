use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::common::types::{Rid, TableId, TxnId};
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionState,
};

/// Multi-granularity lock modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

impl LockMode {
    /// Whether a request in `self` can coexist with a granted `held` lock
    pub fn compatible_with(self, held: LockMode) -> bool {
        use LockMode::*;
        match (self, held) {
            (IntentionShared, Exclusive) => false,
            (IntentionShared, _) => true,
            (IntentionExclusive, IntentionShared) | (IntentionExclusive, IntentionExclusive) => {
                true
            }
            (IntentionExclusive, _) => false,
            (Shared, IntentionShared) | (Shared, Shared) => true,
            (Shared, _) => false,
            (SharedIntentionExclusive, IntentionShared) => true,
            (SharedIntentionExclusive, _) => false,
            (Exclusive, _) => false,
        }
    }

    /// The upgrade lattice: which stronger mode a held lock may become
    pub fn upgradable_to(self, to: LockMode) -> bool {
        use LockMode::*;
        matches!(
            (self, to),
            (IntentionShared, Shared)
                | (IntentionShared, Exclusive)
                | (IntentionShared, IntentionExclusive)
                | (IntentionShared, SharedIntentionExclusive)
                | (Shared, Exclusive)
                | (Shared, SharedIntentionExclusive)
                | (IntentionExclusive, Exclusive)
                | (IntentionExclusive, SharedIntentionExclusive)
                | (SharedIntentionExclusive, Exclusive)
        )
    }

    fn is_intention(self) -> bool {
        matches!(
            self,
            LockMode::IntentionShared
                | LockMode::IntentionExclusive
                | LockMode::SharedIntentionExclusive
        )
    }
}

/// Abort conditions raised by the lock manager. Except for `Aborted`
/// itself, raising one of these also moves the transaction to the
/// ABORTED state.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
    #[error("transaction {0} tried to acquire a lock while shrinking")]
    LockOnShrinking(TxnId),

    #[error("transaction {0} requested a shared-class lock under read-uncommitted")]
    LockSharedOnReadUncommitted(TxnId),

    #[error("transaction {0} attempted an incompatible lock upgrade")]
    IncompatibleUpgrade(TxnId),

    #[error("transaction {0} raced another upgrade on the same queue")]
    UpgradeConflict(TxnId),

    #[error("transaction {0} requested a row lock without a covering table lock")]
    TableLockNotPresent(TxnId),

    #[error("transaction {0} requested an intention lock on a row")]
    AttemptedIntentionLockOnRow(TxnId),

    #[error("transaction {0} unlocked a table while still holding row locks under it")]
    TableUnlockedBeforeUnlockingRows(TxnId),

    #[error("transaction {0} attempted an unlock with no lock held")]
    AttemptedUnlockButNoLockHeld(TxnId),

    #[error("transaction {0} was aborted")]
    Aborted(TxnId),
}

pub(crate) struct LockRequest {
    pub txn: Arc<Transaction>,
    pub mode: LockMode,
    pub granted: bool,
}

pub(crate) struct QueueState {
    /// FIFO: earlier requests arrived first
    pub requests: Vec<LockRequest>,
    /// At most one in-flight upgrade per queue
    pub upgrading: Option<TxnId>,
}

pub(crate) struct LockRequestQueue {
    pub state: Mutex<QueueState>,
    pub cv: Condvar,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                requests: Vec::new(),
                upgrading: None,
            }),
            cv: Condvar::new(),
        }
    }
}

/// Hierarchical (table + row) lock table with FIFO granting, lock
/// upgrades and wait-for-graph deadlock detection.
pub struct LockManager {
    pub(crate) table_lock_map: Mutex<HashMap<TableId, Arc<LockRequestQueue>>>,
    pub(crate) row_lock_map: Mutex<HashMap<Rid, Arc<LockRequestQueue>>>,
    pub(crate) cycle_detection_interval: Duration,
    pub(crate) detector_shutdown: Arc<AtomicBool>,
    pub(crate) detector_handle: Mutex<Option<JoinHandle<()>>>,
}

impl LockManager {
    pub const DEFAULT_CYCLE_DETECTION_INTERVAL: Duration = Duration::from_millis(50);

    pub fn new(cycle_detection_interval: Duration) -> Self {
        Self {
            table_lock_map: Mutex::new(HashMap::new()),
            row_lock_map: Mutex::new(HashMap::new()),
            cycle_detection_interval,
            detector_shutdown: Arc::new(AtomicBool::new(false)),
            detector_handle: Mutex::new(None),
        }
    }

    /// Acquire (or upgrade to) `mode` on a table, blocking until the
    /// request can be granted. Returns Ok(false) without doing anything
    /// for a transaction that is no longer active.
    pub fn lock_table(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        table_id: TableId,
    ) -> Result<bool, LockError> {
        if !Self::is_active(txn) {
            return Ok(false);
        }
        Self::check_acquire_allowed(txn, mode)?;

        let queue = self.table_queue(table_id);
        let mut state = queue.state.lock();

        if let Some(pos) = state
            .requests
            .iter()
            .position(|r| r.txn.id() == txn.id() && r.granted)
        {
            let held = state.requests[pos].mode;
            if held == mode {
                return Ok(true);
            }
            if state.upgrading.is_some() {
                txn.set_state(TransactionState::Aborted);
                return Err(LockError::UpgradeConflict(txn.id()));
            }
            if !held.upgradable_to(mode) {
                txn.set_state(TransactionState::Aborted);
                return Err(LockError::IncompatibleUpgrade(txn.id()));
            }
            // Upgrade: retire the granted request, enqueue a fresh one
            // and let the queue re-arbitrate with upgrade priority.
            state.requests.remove(pos);
            txn.erase_table_lock(held, table_id);
            state.upgrading = Some(txn.id());
            queue.cv.notify_all();
        }

        state.requests.push(LockRequest {
            txn: Arc::clone(txn),
            mode,
            granted: false,
        });

        loop {
            if txn.state() == TransactionState::Aborted {
                Self::withdraw(&mut state, txn.id());
                queue.cv.notify_all();
                return Err(LockError::Aborted(txn.id()));
            }
            if Self::try_grant(&mut state, txn.id()) {
                break;
            }
            queue.cv.wait(&mut state);
        }
        drop(state);

        txn.record_table_lock(mode, table_id);
        Ok(true)
    }

    /// Release the table lock held by the transaction. Rows under the
    /// table must be unlocked first.
    pub fn unlock_table(
        &self,
        txn: &Arc<Transaction>,
        table_id: TableId,
    ) -> Result<bool, LockError> {
        if txn.has_row_locks_under(table_id) {
            txn.set_state(TransactionState::Aborted);
            return Err(LockError::TableUnlockedBeforeUnlockingRows(txn.id()));
        }

        let queue = self.table_queue(table_id);
        let mut state = queue.state.lock();
        let Some(pos) = state
            .requests
            .iter()
            .position(|r| r.txn.id() == txn.id() && r.granted)
        else {
            drop(state);
            txn.set_state(TransactionState::Aborted);
            return Err(LockError::AttemptedUnlockButNoLockHeld(txn.id()));
        };

        let mode = state.requests[pos].mode;
        state.requests.remove(pos);
        queue.cv.notify_all();
        drop(state);

        txn.erase_table_lock(mode, table_id);
        Self::apply_unlock_phase_transition(txn, mode);
        Ok(true)
    }

    /// Acquire (or upgrade to) `mode` on a row. Only S and X are legal
    /// on rows, and the transaction must already hold a covering table
    /// lock.
    pub fn lock_row(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        table_id: TableId,
        rid: Rid,
    ) -> Result<bool, LockError> {
        if !Self::is_active(txn) {
            return Ok(false);
        }
        if mode.is_intention() {
            txn.set_state(TransactionState::Aborted);
            return Err(LockError::AttemptedIntentionLockOnRow(txn.id()));
        }
        Self::check_acquire_allowed(txn, mode)?;

        let covered = match mode {
            LockMode::Shared => txn.supports_shared_row_lock(table_id),
            _ => txn.supports_exclusive_row_lock(table_id),
        };
        if !covered {
            txn.set_state(TransactionState::Aborted);
            return Err(LockError::TableLockNotPresent(txn.id()));
        }

        let queue = self.row_queue(rid);
        let mut state = queue.state.lock();

        if let Some(pos) = state
            .requests
            .iter()
            .position(|r| r.txn.id() == txn.id() && r.granted)
        {
            let held = state.requests[pos].mode;
            if held == mode {
                return Ok(true);
            }
            if state.upgrading.is_some() {
                txn.set_state(TransactionState::Aborted);
                return Err(LockError::UpgradeConflict(txn.id()));
            }
            if !held.upgradable_to(mode) {
                txn.set_state(TransactionState::Aborted);
                return Err(LockError::IncompatibleUpgrade(txn.id()));
            }
            state.requests.remove(pos);
            txn.erase_row_lock(held, table_id, rid);
            state.upgrading = Some(txn.id());
            queue.cv.notify_all();
        }

        state.requests.push(LockRequest {
            txn: Arc::clone(txn),
            mode,
            granted: false,
        });

        loop {
            if txn.state() == TransactionState::Aborted {
                Self::withdraw(&mut state, txn.id());
                queue.cv.notify_all();
                return Err(LockError::Aborted(txn.id()));
            }
            if Self::try_grant(&mut state, txn.id()) {
                break;
            }
            queue.cv.wait(&mut state);
        }
        drop(state);

        txn.record_row_lock(mode, table_id, rid);
        Ok(true)
    }

    /// Release the row lock held by the transaction. `force` skips the
    /// 2PL phase transition; commit and abort release locks that way.
    pub fn unlock_row(
        &self,
        txn: &Arc<Transaction>,
        table_id: TableId,
        rid: Rid,
        force: bool,
    ) -> Result<bool, LockError> {
        let queue = self.row_queue(rid);
        let mut state = queue.state.lock();
        let Some(pos) = state
            .requests
            .iter()
            .position(|r| r.txn.id() == txn.id() && r.granted)
        else {
            drop(state);
            txn.set_state(TransactionState::Aborted);
            return Err(LockError::AttemptedUnlockButNoLockHeld(txn.id()));
        };

        let mode = state.requests[pos].mode;
        state.requests.remove(pos);
        queue.cv.notify_all();
        drop(state);

        txn.erase_row_lock(mode, table_id, rid);
        if !force {
            Self::apply_unlock_phase_transition(txn, mode);
        }
        Ok(true)
    }

    /// Drop every lock the transaction still holds, waking all affected
    /// queues. Used by commit and abort; performs no phase transitions
    /// and cannot fail.
    pub(crate) fn release_all_locks(&self, txn: &Arc<Transaction>) {
        for (table_id, rid, mode) in txn.row_locks_snapshot() {
            let queue = self.row_queue(rid);
            let mut state = queue.state.lock();
            state
                .requests
                .retain(|r| !(r.txn.id() == txn.id() && r.granted));
            queue.cv.notify_all();
            drop(state);
            txn.erase_row_lock(mode, table_id, rid);
        }
        for (table_id, mode) in txn.table_locks_snapshot() {
            let queue = self.table_queue(table_id);
            let mut state = queue.state.lock();
            state
                .requests
                .retain(|r| !(r.txn.id() == txn.id() && r.granted));
            queue.cv.notify_all();
            drop(state);
            txn.erase_table_lock(mode, table_id);
        }
    }

    fn is_active(txn: &Transaction) -> bool {
        !matches!(
            txn.state(),
            TransactionState::Committed | TransactionState::Aborted
        )
    }

    /// Isolation-level and 2PL-phase legality of a new acquisition
    fn check_acquire_allowed(txn: &Transaction, mode: LockMode) -> Result<(), LockError> {
        use LockMode::*;
        let id = txn.id();
        match txn.state() {
            TransactionState::Growing => {
                if txn.isolation_level() == IsolationLevel::ReadUncommitted
                    && matches!(mode, IntentionShared | Shared | SharedIntentionExclusive)
                {
                    txn.set_state(TransactionState::Aborted);
                    return Err(LockError::LockSharedOnReadUncommitted(id));
                }
                Ok(())
            }
            TransactionState::Shrinking => match txn.isolation_level() {
                IsolationLevel::ReadUncommitted => {
                    txn.set_state(TransactionState::Aborted);
                    if matches!(mode, IntentionExclusive | Exclusive) {
                        Err(LockError::LockOnShrinking(id))
                    } else {
                        Err(LockError::LockSharedOnReadUncommitted(id))
                    }
                }
                IsolationLevel::ReadCommitted => {
                    if matches!(mode, IntentionShared | Shared) {
                        Ok(())
                    } else {
                        txn.set_state(TransactionState::Aborted);
                        Err(LockError::LockOnShrinking(id))
                    }
                }
                IsolationLevel::RepeatableRead => {
                    txn.set_state(TransactionState::Aborted);
                    Err(LockError::LockOnShrinking(id))
                }
            },
            // Not reachable through the public entry points, which bail
            // out on finished transactions first.
            _ => Ok(()),
        }
    }

    /// First lock release of S under RR or of X anywhere ends the
    /// growing phase.
    fn apply_unlock_phase_transition(txn: &Transaction, mode: LockMode) {
        if txn.state() != TransactionState::Growing {
            return;
        }
        let shrink = match txn.isolation_level() {
            IsolationLevel::RepeatableRead => {
                matches!(mode, LockMode::Shared | LockMode::Exclusive)
            }
            IsolationLevel::ReadCommitted | IsolationLevel::ReadUncommitted => {
                matches!(mode, LockMode::Exclusive)
            }
        };
        if shrink {
            txn.set_state(TransactionState::Shrinking);
        }
    }

    /// Grant policy: the request must be compatible with every granted
    /// request; a pending upgrade is served before anyone else; among
    /// plain waiters FIFO order is respected, letting a request pass
    /// only waiters it is compatible with.
    fn try_grant(state: &mut QueueState, txn_id: TxnId) -> bool {
        let Some(my_pos) = state
            .requests
            .iter()
            .position(|r| r.txn.id() == txn_id && !r.granted)
        else {
            // Woken after the grant already happened.
            return state
                .requests
                .iter()
                .any(|r| r.txn.id() == txn_id && r.granted);
        };
        let my_mode = state.requests[my_pos].mode;

        if state
            .requests
            .iter()
            .any(|r| r.granted && !my_mode.compatible_with(r.mode))
        {
            return false;
        }

        match state.upgrading {
            Some(upgrader) if upgrader != txn_id => return false,
            Some(_) => {
                state.requests[my_pos].granted = true;
                state.upgrading = None;
                return true;
            }
            None => {}
        }

        for request in &state.requests {
            if request.granted {
                continue;
            }
            if request.txn.id() == txn_id {
                break;
            }
            if !my_mode.compatible_with(request.mode) {
                return false;
            }
        }
        state.requests[my_pos].granted = true;
        true
    }

    /// Remove the transaction's pending request after it observed its
    /// own abort.
    fn withdraw(state: &mut QueueState, txn_id: TxnId) {
        state
            .requests
            .retain(|r| !(r.txn.id() == txn_id && !r.granted));
        if state.upgrading == Some(txn_id) {
            state.upgrading = None;
        }
    }

    fn table_queue(&self, table_id: TableId) -> Arc<LockRequestQueue> {
        let mut map = self.table_lock_map.lock();
        Arc::clone(
            map.entry(table_id)
                .or_insert_with(|| Arc::new(LockRequestQueue::new())),
        )
    }

    fn row_queue(&self, rid: Rid) -> Arc<LockRequestQueue> {
        let mut map = self.row_lock_map.lock();
        Arc::clone(
            map.entry(rid)
                .or_insert_with(|| Arc::new(LockRequestQueue::new())),
        )
    }
}
