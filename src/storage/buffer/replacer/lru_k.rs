use std::collections::{HashMap, VecDeque};

use thiserror::Error;

use crate::common::types::FrameId;

#[derive(Error, Debug)]
pub enum ReplacerError {
    #[error("frame {0} is not tracked by the replacer")]
    UnknownFrame(FrameId),
    #[error("frame {0} cannot be removed while it is not evictable")]
    FrameNotEvictable(FrameId),
}

/// LRU-K page replacement policy.
///
/// Tracks the k most recent access timestamps of every frame handed to it.
/// The victim is the evictable frame with the largest backward k-distance
/// (the age of its k-th most recent access); frames with fewer than k
/// recorded accesses have infinite distance and are preferred, breaking
/// ties by classic LRU on the earliest recorded access. Keeping k > 1
/// stops a single sequential scan from flushing the whole pool.
pub struct LruKReplacer {
    k: usize,
    current_timestamp: u64,
    node_store: HashMap<FrameId, LruKNode>,
    evictable_count: usize,
}

struct LruKNode {
    /// The k most recent access timestamps, oldest first
    history: VecDeque<u64>,
    is_evictable: bool,
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k >= 1, "LRU-K needs k >= 1");
        Self {
            k,
            current_timestamp: 0,
            node_store: HashMap::with_capacity(num_frames),
            evictable_count: 0,
        }
    }

    /// Record an access to the frame, tracking it if it was unknown.
    /// New frames start out non-evictable.
    pub fn record_access(&mut self, frame_id: FrameId) {
        let node = self.node_store.entry(frame_id).or_insert_with(|| LruKNode {
            history: VecDeque::new(),
            is_evictable: false,
        });
        node.history.push_back(self.current_timestamp);
        if node.history.len() > self.k {
            node.history.pop_front();
        }
        self.current_timestamp += 1;
    }

    /// Flip the evictable flag of a tracked frame
    pub fn set_evictable(
        &mut self,
        frame_id: FrameId,
        evictable: bool,
    ) -> Result<(), ReplacerError> {
        let node = self
            .node_store
            .get_mut(&frame_id)
            .ok_or(ReplacerError::UnknownFrame(frame_id))?;
        if node.is_evictable != evictable {
            node.is_evictable = evictable;
            if evictable {
                self.evictable_count += 1;
            } else {
                self.evictable_count -= 1;
            }
        }
        Ok(())
    }

    /// Drop a frame's access history entirely. Removing an untracked frame
    /// is a no-op; removing a non-evictable frame is a caller bug.
    pub fn remove(&mut self, frame_id: FrameId) -> Result<(), ReplacerError> {
        match self.node_store.get(&frame_id) {
            None => Ok(()),
            Some(node) if !node.is_evictable => {
                Err(ReplacerError::FrameNotEvictable(frame_id))
            }
            Some(_) => {
                self.node_store.remove(&frame_id);
                self.evictable_count -= 1;
                Ok(())
            }
        }
    }

    /// Pick and forget the eviction victim, if any frame is evictable
    pub fn evict(&mut self) -> Option<FrameId> {
        let mut victim: Option<(FrameId, bool, u64)> = None;
        for (&frame_id, node) in &self.node_store {
            if !node.is_evictable {
                continue;
            }
            let infinite = node.history.len() < self.k;
            // With the history bounded to k entries, the front is the k-th
            // most recent access when full, and the earliest access overall
            // otherwise; smaller front means larger backward distance in
            // both classes.
            let front = match node.history.front() {
                Some(&timestamp) => timestamp,
                None => continue,
            };
            let better = match victim {
                None => true,
                Some((_, best_infinite, best_front)) => {
                    (infinite && !best_infinite)
                        || (infinite == best_infinite && front < best_front)
                }
            };
            if better {
                victim = Some((frame_id, infinite, front));
            }
        }

        let (frame_id, _, _) = victim?;
        self.node_store.remove(&frame_id);
        self.evictable_count -= 1;
        Some(frame_id)
    }

    /// Number of currently evictable frames
    pub fn size(&self) -> usize {
        self.evictable_count
    }
}
