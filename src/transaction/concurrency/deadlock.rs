use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::thread;

use crate::common::types::TxnId;
use crate::transaction::concurrency::lock_manager::{LockManager, LockRequestQueue};
use crate::transaction::concurrency::transaction::{Transaction, TransactionState};

/// One snapshot of who waits for whom, with enough bookkeeping to abort
/// a victim and wake the queues it sleeps on.
struct WaitForGraph {
    /// waiter -> the holders it waits for, deterministic ordering
    edges: BTreeMap<TxnId, BTreeSet<TxnId>>,
    transactions: BTreeMap<TxnId, Arc<Transaction>>,
    waiter_queues: HashMap<TxnId, Vec<Arc<LockRequestQueue>>>,
}

impl LockManager {
    /// Start the background deadlock detector. It sleeps for the
    /// configured interval, polls the shutdown flag, and runs one
    /// detection pass per wake-up until the lock manager goes away.
    pub fn start_deadlock_detection(self: &Arc<Self>) {
        let weak: Weak<LockManager> = Arc::downgrade(self);
        let shutdown = Arc::clone(&self.detector_shutdown);
        let interval = self.cycle_detection_interval;

        let handle = thread::spawn(move || {
            loop {
                thread::sleep(interval);
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                let Some(lock_manager) = weak.upgrade() else {
                    break;
                };
                lock_manager.run_detection_pass();
            }
            log::trace!("deadlock detector exiting");
        });
        *self.detector_handle.lock() = Some(handle);
    }

    /// Stop and join the detector thread, if it is running
    pub fn stop_deadlock_detection(&self) {
        self.detector_shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.detector_handle.lock().take() {
            let _ = handle.join();
        }
    }

    /// All waiter -> holder edges in the current wait-for graph
    pub fn wait_for_edges(&self) -> Vec<(TxnId, TxnId)> {
        let graph = self.build_wait_for_graph();
        let mut edges = Vec::new();
        for (&waiter, holders) in &graph.edges {
            for &holder in holders {
                edges.push((waiter, holder));
            }
        }
        edges
    }

    /// One detection pass: snapshot the lock tables, then abort the
    /// youngest transaction of every cycle and wake the queues it was
    /// blocked on so it can observe the abort.
    pub(crate) fn run_detection_pass(&self) {
        let mut graph = self.build_wait_for_graph();

        while let Some(cycle) = find_cycle(&graph.edges) {
            let Some(&victim_id) = cycle.iter().max() else {
                break;
            };
            log::warn!("deadlock detected among {cycle:?}; aborting youngest txn {victim_id}");

            if let Some(victim) = graph.transactions.get(&victim_id) {
                victim.set_state(TransactionState::Aborted);
            }

            graph.edges.remove(&victim_id);
            for holders in graph.edges.values_mut() {
                holders.remove(&victim_id);
            }

            if let Some(queues) = graph.waiter_queues.get(&victim_id) {
                for queue in queues {
                    let _state = queue.state.lock();
                    queue.cv.notify_all();
                }
            }
        }
    }

    /// Snapshot both lock maps: every un-granted request waits for every
    /// granted request on the same resource.
    fn build_wait_for_graph(&self) -> WaitForGraph {
        let mut queues: Vec<Arc<LockRequestQueue>> =
            self.table_lock_map.lock().values().cloned().collect();
        queues.extend(self.row_lock_map.lock().values().cloned());

        let mut graph = WaitForGraph {
            edges: BTreeMap::new(),
            transactions: BTreeMap::new(),
            waiter_queues: HashMap::new(),
        };

        for queue in queues {
            let state = queue.state.lock();
            let granted: Vec<TxnId> = state
                .requests
                .iter()
                .filter(|r| r.granted)
                .map(|r| r.txn.id())
                .collect();

            for request in state.requests.iter().filter(|r| !r.granted) {
                let waiter = request.txn.id();
                graph.transactions.insert(waiter, Arc::clone(&request.txn));
                graph
                    .waiter_queues
                    .entry(waiter)
                    .or_default()
                    .push(Arc::clone(&queue));
                for &holder in &granted {
                    if holder != waiter {
                        log::trace!("wait-for edge {waiter} -> {holder}");
                        graph.edges.entry(waiter).or_default().insert(holder);
                    }
                }
            }
        }
        graph
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.stop_deadlock_detection();
    }
}

/// DFS over ascending transaction ids; returns the first cycle found,
/// as the sequence of transactions on it.
fn find_cycle(edges: &BTreeMap<TxnId, BTreeSet<TxnId>>) -> Option<Vec<TxnId>> {
    for &start in edges.keys() {
        let mut path = Vec::new();
        if let Some(cycle) = dfs(edges, start, &mut path) {
            return Some(cycle);
        }
    }
    None
}

fn dfs(
    edges: &BTreeMap<TxnId, BTreeSet<TxnId>>,
    node: TxnId,
    path: &mut Vec<TxnId>,
) -> Option<Vec<TxnId>> {
    if let Some(pos) = path.iter().position(|&n| n == node) {
        return Some(path[pos..].to_vec());
    }
    path.push(node);
    if let Some(successors) = edges.get(&node) {
        for &next in successors {
            if let Some(cycle) = dfs(edges, next, path) {
                return Some(cycle);
            }
        }
    }
    path.pop();
    None
}
