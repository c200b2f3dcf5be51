use std::sync::atomic::{AtomicU64, Ordering};

use crate::common::types::{Lsn, TxnId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRecordType {
    Begin,
    Commit,
    Abort,
}

/// Stub log manager: hands out monotonically increasing LSNs for the
/// transaction lifecycle records and traces them, persisting nothing.
/// It keeps the collaborator shape the transaction manager expects
/// while write-ahead logging stays out of scope.
pub struct LogManager {
    next_lsn: AtomicU64,
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LogManager {
    pub fn new() -> Self {
        Self {
            next_lsn: AtomicU64::new(1),
        }
    }

    pub fn append_record(&self, txn_id: TxnId, record_type: LogRecordType) -> Lsn {
        let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
        log::trace!("log record {record_type:?} for txn {txn_id} at lsn {lsn}");
        lsn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lsns_are_monotonic() {
        let log_manager = LogManager::new();
        let first = log_manager.append_record(1, LogRecordType::Begin);
        let second = log_manager.append_record(1, LogRecordType::Commit);
        assert!(second > first);
    }
}
