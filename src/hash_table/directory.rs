use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::page::PageId;

use super::error::HashTableError;

type BucketIndex = usize;

/// Routing metadata for the extendible hash table: a global depth, and
/// per-slot bucket page ids with parallel local depths. The page's
/// on-disk representation *is* this struct, bincode-serialized.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HashTableDirectoryPage {
    bucket_page_ids: Vec<PageId>,
    local_depths: Vec<u32>,
    max_depth: u32,
    global_depth: u32,
}

impl HashTableDirectoryPage {
    /// A fresh directory: global depth 0, one slot, pointing nowhere yet.
    /// `init` wires up the first bucket once it has been allocated.
    pub fn new(max_depth: u32) -> Self {
        Self {
            max_depth,
            global_depth: 0,
            bucket_page_ids: vec![0],
            local_depths: vec![0],
        }
    }

    pub fn init(&mut self, bucket_page_id: PageId) {
        self.bucket_page_ids[0] = bucket_page_id;
        self.local_depths[0] = 0;
    }

    pub fn hash_to_bucket_index(&self, hash: u32) -> BucketIndex {
        (hash & self.global_depth_mask()) as usize
    }

    pub fn global_depth(&self) -> u32 {
        self.global_depth
    }

    pub fn global_depth_mask(&self) -> u32 {
        if self.global_depth == 0 {
            0
        } else {
            (1 << self.global_depth) - 1
        }
    }

    pub fn size(&self) -> usize {
        1 << self.global_depth
    }

    pub fn local_depth(&self, i: BucketIndex) -> u32 {
        self.local_depths[i]
    }

    pub fn local_depth_mask(&self, i: BucketIndex) -> u32 {
        let ld = self.local_depths[i];
        if ld == 0 {
            0
        } else {
            (1 << ld) - 1
        }
    }

    pub fn bucket_page_id(&self, i: BucketIndex) -> PageId {
        self.bucket_page_ids[i]
    }

    pub fn set_bucket_page_id(&mut self, i: BucketIndex, page_id: PageId) {
        self.bucket_page_ids[i] = page_id;
    }

    pub fn set_local_depth(&mut self, i: BucketIndex, depth: u32) {
        self.local_depths[i] = depth;
    }

    pub fn incr_local_depth(&mut self, i: BucketIndex) {
        self.local_depths[i] += 1;
    }

    pub fn decr_local_depth(&mut self, i: BucketIndex) {
        if self.local_depths[i] > 0 {
            self.local_depths[i] -= 1;
        }
    }

    /// Doubles the directory, mirroring entries `[0, 2^gd)` into
    /// `[2^gd, 2^{gd+1})` so every pair of mirror slots keeps pointing at
    /// the same bucket with the same local depth.
    pub fn incr_global_depth(&mut self) -> Result<(), HashTableError> {
        if self.global_depth >= self.max_depth {
            return Err(HashTableError::MaxDepthExceeded);
        }

        let old_size = self.size();
        self.bucket_page_ids
            .extend_from_within(0..old_size);
        self.local_depths.extend_from_within(0..old_size);
        self.global_depth += 1;

        Ok(())
    }

    /// Halves the directory. Callers must check [`Self::can_shrink`]
    /// first; the upper half is redundant by the aliasing invariant.
    pub fn decr_global_depth(&mut self) {
        if self.global_depth == 0 {
            return;
        }
        let new_size = self.size() / 2;
        self.bucket_page_ids.truncate(new_size);
        self.local_depths.truncate(new_size);
        self.global_depth -= 1;
    }

    pub fn split_image_index(&self, i: BucketIndex) -> BucketIndex {
        let ld = self.local_depths[i];
        if ld == 0 {
            return i;
        }
        i ^ (1 << (ld - 1))
    }

    /// True iff no slot's local depth has caught up with the global
    /// depth yet — i.e. every bucket still has a live split image to
    /// merge back into, so the directory can shed its top bit.
    pub fn can_shrink(&self) -> bool {
        self.local_depths
            .iter()
            .all(|&ld| ld < self.global_depth)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("directory page serialization cannot fail")
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        bincode::deserialize(bytes).expect("corrupt directory page")
    }

    /// Debug assertion: for every slot, local depth stays within bounds
    /// and every alias group shares both a bucket page id and a local
    /// depth, with exactly `2^(gd - ld)` members.
    pub fn verify_integrity(&self) {
        let mut seen_depth: HashMap<PageId, u32> = HashMap::new();
        let mut count: HashMap<PageId, u32> = HashMap::new();

        for i in 0..self.size() {
            let page_id = self.bucket_page_ids[i];
            let ld = self.local_depths[i];

            assert!(
                ld <= self.global_depth,
                "local depth {ld} exceeds global depth {} at slot {i}",
                self.global_depth
            );

            *count.entry(page_id).or_insert(0) += 1;
            match seen_depth.get(&page_id) {
                Some(&other_ld) => assert_eq!(
                    ld, other_ld,
                    "local depth mismatch for bucket page {page_id}"
                ),
                None => {
                    seen_depth.insert(page_id, ld);
                }
            }
        }

        for (page_id, n) in &count {
            let ld = seen_depth[page_id];
            let expected = 1u32 << (self.global_depth - ld);
            assert_eq!(
                *n, expected,
                "bucket page {page_id} aliased by {n} slots, expected {expected}"
            );
        }
    }
}
