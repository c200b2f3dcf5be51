use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;

use basaltdb::common::types::Rid;
use basaltdb::transaction::{IsolationLevel, Transaction, TransactionState};
use basaltdb::{LockError, LockManager, LockMode};

mod common;

fn lock_manager() -> Arc<LockManager> {
    common::init_logging();
    Arc::new(LockManager::new(Duration::from_millis(20)))
}

fn txn(id: u32, isolation_level: IsolationLevel) -> Arc<Transaction> {
    Arc::new(Transaction::new(id, isolation_level))
}

const TABLE: u32 = 1;

#[test]
fn test_shared_locks_are_compatible() -> Result<()> {
    let lm = lock_manager();
    let t1 = txn(1, IsolationLevel::RepeatableRead);
    let t2 = txn(2, IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Shared, TABLE)?);
    assert!(lm.lock_table(&t2, LockMode::Shared, TABLE)?);

    assert!(lm.unlock_table(&t1, TABLE)?);
    assert!(lm.unlock_table(&t2, TABLE)?);
    Ok(())
}

#[test]
fn test_relocking_the_same_mode_is_a_no_op() -> Result<()> {
    let lm = lock_manager();
    let t1 = txn(1, IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Shared, TABLE)?);
    assert!(lm.lock_table(&t1, LockMode::Shared, TABLE)?);
    assert!(lm.unlock_table(&t1, TABLE)?);
    // The single underlying lock is gone now.
    assert!(matches!(
        lm.unlock_table(&t1, TABLE),
        Err(LockError::AttemptedUnlockButNoLockHeld(1))
    ));
    Ok(())
}

#[test]
fn test_exclusive_blocks_until_release() -> Result<()> {
    let lm = lock_manager();
    let t1 = txn(1, IsolationLevel::RepeatableRead);
    let t2 = txn(2, IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Exclusive, TABLE)?);

    let waiter = {
        let lm = lm.clone();
        let t2 = t2.clone();
        thread::spawn(move || lm.lock_table(&t2, LockMode::Shared, TABLE))
    };

    // Give the waiter time to block, then release.
    thread::sleep(Duration::from_millis(50));
    assert!(lm.unlock_table(&t1, TABLE)?);

    assert!(waiter.join().unwrap()?);
    assert!(lm.unlock_table(&t2, TABLE)?);
    Ok(())
}

#[test]
fn test_upgrade_waits_for_conflicting_reader() -> Result<()> {
    // T1 and T2 hold S; T1's upgrade to X blocks until T2 releases
    // its S.
    let lm = lock_manager();
    let t1 = txn(1, IsolationLevel::RepeatableRead);
    let t2 = txn(2, IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Shared, TABLE)?);
    assert!(lm.lock_table(&t2, LockMode::Shared, TABLE)?);

    let upgrader = {
        let lm = lm.clone();
        let t1 = t1.clone();
        thread::spawn(move || lm.lock_table(&t1, LockMode::Exclusive, TABLE))
    };

    thread::sleep(Duration::from_millis(50));
    assert!(lm.unlock_table(&t2, TABLE)?);

    assert!(upgrader.join().unwrap()?);
    // T1 now holds X (its S was consumed by the upgrade).
    assert!(lm.unlock_table(&t1, TABLE)?);
    assert_eq!(t1.state(), TransactionState::Shrinking);
    Ok(())
}

#[test]
fn test_uncontended_upgrade_is_immediate() -> Result<()> {
    let lm = lock_manager();
    let t1 = txn(1, IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::IntentionShared, TABLE)?);
    assert!(lm.lock_table(&t1, LockMode::SharedIntentionExclusive, TABLE)?);
    assert!(lm.lock_table(&t1, LockMode::Exclusive, TABLE)?);
    assert!(lm.unlock_table(&t1, TABLE)?);
    Ok(())
}

#[test]
fn test_incompatible_upgrade_aborts() -> Result<()> {
    let lm = lock_manager();
    let t1 = txn(1, IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Exclusive, TABLE)?);
    assert!(matches!(
        lm.lock_table(&t1, LockMode::Shared, TABLE),
        Err(LockError::IncompatibleUpgrade(1))
    ));
    assert_eq!(t1.state(), TransactionState::Aborted);
    Ok(())
}

#[test]
fn test_second_upgrade_on_same_queue_conflicts() -> Result<()> {
    let lm = lock_manager();
    let t1 = txn(1, IsolationLevel::RepeatableRead);
    let t2 = txn(2, IsolationLevel::RepeatableRead);
    let t3 = txn(3, IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Shared, TABLE)?);
    assert!(lm.lock_table(&t2, LockMode::Shared, TABLE)?);
    assert!(lm.lock_table(&t3, LockMode::Shared, TABLE)?);

    // T1's upgrade blocks behind the other readers.
    let upgrader = {
        let lm = lm.clone();
        let t1 = t1.clone();
        thread::spawn(move || lm.lock_table(&t1, LockMode::Exclusive, TABLE))
    };
    thread::sleep(Duration::from_millis(50));

    // A second in-flight upgrade on the same queue is refused.
    assert!(matches!(
        lm.lock_table(&t2, LockMode::Exclusive, TABLE),
        Err(LockError::UpgradeConflict(2))
    ));
    assert_eq!(t2.state(), TransactionState::Aborted);

    // Clear the readers so T1 can finish.
    assert!(lm.unlock_table(&t2, TABLE)?);
    assert!(lm.unlock_table(&t3, TABLE)?);
    assert!(upgrader.join().unwrap()?);
    assert!(lm.unlock_table(&t1, TABLE)?);
    Ok(())
}

#[test]
fn test_lock_on_shrinking_aborts() -> Result<()> {
    let lm = lock_manager();
    let t1 = txn(1, IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Shared, TABLE)?);
    assert!(lm.unlock_table(&t1, TABLE)?);
    assert_eq!(t1.state(), TransactionState::Shrinking);

    assert!(matches!(
        lm.lock_table(&t1, LockMode::Shared, TABLE),
        Err(LockError::LockOnShrinking(1))
    ));
    assert_eq!(t1.state(), TransactionState::Aborted);
    Ok(())
}

#[test]
fn test_read_committed_shrinking_permits_only_shared_class() -> Result<()> {
    let lm = lock_manager();
    let t1 = txn(1, IsolationLevel::ReadCommitted);

    assert!(lm.lock_table(&t1, LockMode::Exclusive, TABLE)?);
    assert!(lm.unlock_table(&t1, TABLE)?);
    assert_eq!(t1.state(), TransactionState::Shrinking);

    // IS and S stay legal under read committed while shrinking.
    assert!(lm.lock_table(&t1, LockMode::IntentionShared, TABLE)?);
    assert!(lm.lock_table(&t1, LockMode::Shared, 2)?);
    assert!(matches!(
        lm.lock_table(&t1, LockMode::IntentionExclusive, 3),
        Err(LockError::LockOnShrinking(1))
    ));
    Ok(())
}

#[test]
fn test_read_uncommitted_rejects_shared_class_locks() -> Result<()> {
    let lm = lock_manager();

    for mode in [
        LockMode::Shared,
        LockMode::IntentionShared,
        LockMode::SharedIntentionExclusive,
    ] {
        let t = txn(7, IsolationLevel::ReadUncommitted);
        assert!(matches!(
            lm.lock_table(&t, mode, TABLE),
            Err(LockError::LockSharedOnReadUncommitted(7))
        ));
        assert_eq!(t.state(), TransactionState::Aborted);
    }

    // IX and X are the legal read-uncommitted modes.
    let t = txn(8, IsolationLevel::ReadUncommitted);
    assert!(lm.lock_table(&t, LockMode::IntentionExclusive, TABLE)?);
    assert!(lm.lock_table(&t, LockMode::Exclusive, TABLE)?);
    Ok(())
}

#[test]
fn test_row_lock_requires_covering_table_lock() -> Result<()> {
    let lm = lock_manager();
    let row = Rid::new(3, 0);

    // No table lock at all.
    let t1 = txn(1, IsolationLevel::RepeatableRead);
    assert!(matches!(
        lm.lock_row(&t1, LockMode::Shared, TABLE, row),
        Err(LockError::TableLockNotPresent(1))
    ));

    // IS admits S rows but not X rows.
    let t2 = txn(2, IsolationLevel::RepeatableRead);
    assert!(lm.lock_table(&t2, LockMode::IntentionShared, TABLE)?);
    assert!(lm.lock_row(&t2, LockMode::Shared, TABLE, row)?);
    assert!(matches!(
        lm.lock_row(&t2, LockMode::Exclusive, TABLE, Rid::new(3, 1)),
        Err(LockError::TableLockNotPresent(2))
    ));

    // IX admits X rows.
    let t3 = txn(3, IsolationLevel::RepeatableRead);
    assert!(lm.lock_table(&t3, LockMode::IntentionExclusive, TABLE)?);
    assert!(lm.lock_row(&t3, LockMode::Exclusive, TABLE, Rid::new(3, 2))?);
    Ok(())
}

#[test]
fn test_intention_modes_are_illegal_on_rows() -> Result<()> {
    let lm = lock_manager();
    let t1 = txn(1, IsolationLevel::RepeatableRead);
    assert!(lm.lock_table(&t1, LockMode::IntentionExclusive, TABLE)?);

    assert!(matches!(
        lm.lock_row(&t1, LockMode::IntentionShared, TABLE, Rid::new(3, 0)),
        Err(LockError::AttemptedIntentionLockOnRow(1))
    ));
    assert_eq!(t1.state(), TransactionState::Aborted);
    Ok(())
}

#[test]
fn test_unlock_table_before_rows_is_refused() -> Result<()> {
    let lm = lock_manager();
    let t1 = txn(1, IsolationLevel::RepeatableRead);
    let row = Rid::new(3, 0);

    assert!(lm.lock_table(&t1, LockMode::IntentionExclusive, TABLE)?);
    assert!(lm.lock_row(&t1, LockMode::Exclusive, TABLE, row)?);

    assert!(matches!(
        lm.unlock_table(&t1, TABLE),
        Err(LockError::TableUnlockedBeforeUnlockingRows(1))
    ));
    Ok(())
}

#[test]
fn test_row_unlock_order_and_phase_transition() -> Result<()> {
    let lm = lock_manager();
    let t1 = txn(1, IsolationLevel::RepeatableRead);
    let row = Rid::new(3, 0);

    assert!(lm.lock_table(&t1, LockMode::IntentionExclusive, TABLE)?);
    assert!(lm.lock_row(&t1, LockMode::Exclusive, TABLE, row)?);

    // Forced unlock keeps the growing phase; the plain table unlock of
    // IX does not end it either.
    assert!(lm.unlock_row(&t1, TABLE, row, true)?);
    assert_eq!(t1.state(), TransactionState::Growing);
    assert!(lm.unlock_table(&t1, TABLE)?);
    assert_eq!(t1.state(), TransactionState::Growing);

    // An unforced X row unlock ends the growing phase.
    let t2 = txn(2, IsolationLevel::RepeatableRead);
    assert!(lm.lock_table(&t2, LockMode::IntentionExclusive, TABLE)?);
    assert!(lm.lock_row(&t2, LockMode::Exclusive, TABLE, row)?);
    assert!(lm.unlock_row(&t2, TABLE, row, false)?);
    assert_eq!(t2.state(), TransactionState::Shrinking);
    Ok(())
}

#[test]
fn test_finished_transactions_get_nothing() -> Result<()> {
    let lm = lock_manager();
    let t1 = txn(1, IsolationLevel::RepeatableRead);
    t1.set_state(TransactionState::Committed);
    assert!(!lm.lock_table(&t1, LockMode::Shared, TABLE)?);

    let t2 = txn(2, IsolationLevel::RepeatableRead);
    t2.set_state(TransactionState::Aborted);
    assert!(!lm.lock_row(&t2, LockMode::Shared, TABLE, Rid::new(3, 0))?);
    Ok(())
}

#[test]
fn test_deadlock_detection_aborts_the_youngest() -> Result<()> {
    // T1 holds X on r1 and wants r2; T2 holds X on r2 and wants r1.
    // The detector aborts the younger (higher id) transaction and the
    // other one proceeds.
    let lm = lock_manager();
    lm.start_deadlock_detection();

    let t1 = txn(1, IsolationLevel::RepeatableRead);
    let t2 = txn(2, IsolationLevel::RepeatableRead);
    let r1 = Rid::new(5, 1);
    let r2 = Rid::new(5, 2);

    assert!(lm.lock_table(&t1, LockMode::IntentionExclusive, TABLE)?);
    assert!(lm.lock_table(&t2, LockMode::IntentionExclusive, TABLE)?);
    assert!(lm.lock_row(&t1, LockMode::Exclusive, TABLE, r1)?);
    assert!(lm.lock_row(&t2, LockMode::Exclusive, TABLE, r2)?);

    let first = {
        let (lm, t1) = (lm.clone(), t1.clone());
        thread::spawn(move || lm.lock_row(&t1, LockMode::Exclusive, TABLE, r2))
    };
    let second = {
        let (lm, t2) = (lm.clone(), t2.clone());
        thread::spawn(move || lm.lock_row(&t2, LockMode::Exclusive, TABLE, r1))
    };

    // The detector victimizes the younger transaction; its thread wakes
    // with an abort error.
    let r_second = second.join().unwrap();
    assert!(matches!(r_second, Err(LockError::Aborted(2))));
    assert_eq!(t2.state(), TransactionState::Aborted);

    // The victim's owner now runs the abort path and releases its
    // locks, which unblocks the survivor.
    assert!(lm.unlock_row(&t2, TABLE, r2, true)?);
    assert!(lm.unlock_table(&t2, TABLE)?);

    let r_first = first.join().unwrap();
    assert!(r_first?);
    assert_eq!(t1.state(), TransactionState::Growing);

    lm.stop_deadlock_detection();
    Ok(())
}

#[test]
fn test_wait_for_graph_reports_edges() -> Result<()> {
    let lm = lock_manager();
    let t1 = txn(1, IsolationLevel::RepeatableRead);
    let t2 = txn(2, IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Exclusive, TABLE)?);
    let waiter = {
        let (lm, t2) = (lm.clone(), t2.clone());
        thread::spawn(move || lm.lock_table(&t2, LockMode::Exclusive, TABLE))
    };
    thread::sleep(Duration::from_millis(50));

    assert_eq!(lm.wait_for_edges(), vec![(2, 1)]);

    assert!(lm.unlock_table(&t1, TABLE)?);
    assert!(waiter.join().unwrap()?);
    assert!(lm.wait_for_edges().is_empty());
    Ok(())
}
