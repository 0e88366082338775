use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

pub type FrameId = usize;
pub type Timestamp = u128;

fn get_now_ts() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

struct LruKNode {
    k: usize,
    is_evictable: bool,
    history: Vec<Timestamp>,
}

impl LruKNode {
    fn new(k: usize) -> Self {
        Self {
            k,
            history: vec![get_now_ts()],
            is_evictable: false,
        }
    }

    fn record_access(&mut self) {
        self.history.push(get_now_ts());
    }

    /// `now - (access k steps back)`, or `None` if fewer than `k` accesses
    /// have been recorded (an infinite backward k-distance).
    fn k_distance(&self, now: Timestamp) -> Option<Timestamp> {
        if self.history.len() < self.k {
            return None;
        }
        let kth_from_last = self.history[self.history.len() - self.k];
        Some(now.saturating_sub(kth_from_last))
    }

    fn earliest_access(&self) -> Timestamp {
        self.history[0]
    }
}

pub enum AccessType {
    Unknown,
    Lookup,
    Scan,
    Index,
}

/// LRU-K replacement policy: evicts the evictable frame with the largest
/// backward k-distance, treating "fewer than k accesses" as an infinite
/// distance; ties among infinite-distance frames break toward the frame
/// with the oldest first access (classic LRU among the under-k group).
pub struct LruKReplacer {
    #[allow(dead_code)]
    num_of_frames: usize,
    k: usize,
    node_store: HashMap<FrameId, LruKNode>,
}

impl LruKReplacer {
    pub fn new(num_of_frames: usize, k: usize) -> Self {
        Self {
            num_of_frames,
            k,
            node_store: HashMap::default(),
        }
    }

    pub fn evict(&mut self) -> Option<FrameId> {
        let now = get_now_ts();
        let mut best: Option<(FrameId, bool, Timestamp)> = None;

        for (&frame_id, node) in &self.node_store {
            if !node.is_evictable {
                continue;
            }

            let (is_inf, rank) = match node.k_distance(now) {
                None => (true, node.earliest_access()),
                Some(distance) => (false, distance),
            };

            let replace = match best {
                None => true,
                Some((_, best_inf, best_rank)) => {
                    if is_inf != best_inf {
                        // infinite-distance frames always outrank finite ones
                        is_inf
                    } else if is_inf {
                        // among infinite frames, oldest first access wins
                        rank < best_rank
                    } else {
                        // among finite frames, largest k-distance wins
                        rank > best_rank
                    }
                }
            };

            if replace {
                best = Some((frame_id, is_inf, rank));
            }
        }

        best.map(|(frame_id, ..)| {
            self.node_store.remove(&frame_id);
            frame_id
        })
    }

    pub fn record_access(&mut self, frame_id: FrameId, _access_type: AccessType) {
        match self.node_store.get_mut(&frame_id) {
            Some(node) => node.record_access(),
            None => {
                self.node_store.insert(frame_id, LruKNode::new(self.k));
            }
        };
    }

    pub fn remove(&mut self, frame_id: FrameId) {
        self.node_store.remove(&frame_id);
    }

    pub fn set_evictable(&mut self, frame_id: FrameId, is_evictable: bool) {
        if let Some(node) = self.node_store.get_mut(&frame_id) {
            node.is_evictable = is_evictable;
        }
    }

    pub fn size(&self) -> usize {
        self.node_store.values().filter(|n| n.is_evictable).count()
    }
}
