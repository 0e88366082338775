use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Page-local associative storage. `occupied[i]` is set the first time
/// slot `i` is ever written and never cleared again; `readable[i]` tracks
/// whether the slot currently holds a live pair. The distinction lets
/// `insert` reuse a deleted slot's space (a tombstone) ahead of a
/// never-used one, while keeping linear probing well-defined.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HashTableBucketPage<K, V> {
    max_size: usize,
    occupied: Vec<bool>,
    readable: Vec<bool>,
    entries: Vec<Option<(K, V)>>,
}

impl<K, V> HashTableBucketPage<K, V>
where
    K: Clone + PartialEq + Serialize + DeserializeOwned,
    V: Clone + PartialEq + Serialize + DeserializeOwned,
{
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            occupied: vec![false; max_size],
            readable: vec![false; max_size],
            entries: vec![None; max_size],
        }
    }

    pub fn lookup(&self, key: &K) -> Vec<V> {
        (0..self.max_size)
            .filter(|&i| self.readable[i])
            .filter_map(|i| self.entries[i].as_ref())
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// `false` if the exact pair is already live or the bucket is full
    /// (no tombstone and no never-used slot); `true` on success.
    pub fn insert(&mut self, key: K, value: V) -> bool {
        if self.contains_live_pair(&key, &value) {
            return false;
        }

        let Some(slot) = self.slot_for_insert() else {
            return false;
        };

        self.entries[slot] = Some((key, value));
        self.occupied[slot] = true;
        self.readable[slot] = true;
        true
    }

    pub fn remove(&mut self, key: &K, value: &V) -> bool {
        for i in 0..self.max_size {
            if self.readable[i] {
                if let Some((k, v)) = &self.entries[i] {
                    if k == key && v == value {
                        self.readable[i] = false;
                        return true;
                    }
                }
            }
        }
        false
    }

    pub fn is_full(&self) -> bool {
        self.max_size > 0 && self.readable.iter().all(|&r| r)
    }

    pub fn is_empty(&self) -> bool {
        self.readable.iter().all(|&r| !r)
    }

    pub fn num_readable(&self) -> usize {
        self.readable.iter().filter(|&&r| r).count()
    }

    /// Snapshot of every currently-readable pair, in slot order.
    pub fn array_copy(&self) -> Vec<(K, V)> {
        (0..self.max_size)
            .filter(|&i| self.readable[i])
            .filter_map(|i| self.entries[i].clone())
            .collect()
    }

    pub fn reset(&mut self) {
        self.occupied.iter_mut().for_each(|o| *o = false);
        self.readable.iter_mut().for_each(|r| *r = false);
        self.entries.iter_mut().for_each(|e| *e = None);
    }

    fn contains_live_pair(&self, key: &K, value: &V) -> bool {
        (0..self.max_size).any(|i| {
            self.readable[i]
                && self
                    .entries[i]
                    .as_ref()
                    .is_some_and(|(k, v)| k == key && v == value)
        })
    }

    fn slot_for_insert(&self) -> Option<usize> {
        let tombstone = (0..self.max_size).find(|&i| self.occupied[i] && !self.readable[i]);
        tombstone.or_else(|| (0..self.max_size).find(|&i| !self.occupied[i]))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("bucket page serialization cannot fail")
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        bincode::deserialize(bytes).expect("corrupt bucket page")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_lookup_round_trips() {
        let mut bucket = HashTableBucketPage::<u32, u32>::new(4);
        assert!(bucket.insert(1, 10));
        assert_eq!(bucket.lookup(&1), vec![10]);
    }

    #[test]
    fn duplicate_pair_is_rejected() {
        let mut bucket = HashTableBucketPage::<u32, u32>::new(4);
        assert!(bucket.insert(1, 10));
        assert!(!bucket.insert(1, 10));
        assert_eq!(bucket.lookup(&1), vec![10]);
    }

    #[test]
    fn same_key_distinct_values_are_both_kept() {
        let mut bucket = HashTableBucketPage::<u32, u32>::new(4);
        assert!(bucket.insert(1, 10));
        assert!(bucket.insert(1, 20));
        let mut values = bucket.lookup(&1);
        values.sort();
        assert_eq!(values, vec![10, 20]);
    }

    #[test]
    fn full_bucket_rejects_insert() {
        let mut bucket = HashTableBucketPage::<u32, u32>::new(2);
        assert!(bucket.insert(1, 1));
        assert!(bucket.insert(2, 2));
        assert!(bucket.is_full());
        assert!(!bucket.insert(3, 3));
    }

    #[test]
    fn remove_clears_readable_but_keeps_slot_occupied() {
        let mut bucket = HashTableBucketPage::<u32, u32>::new(2);
        bucket.insert(1, 1);
        assert!(bucket.remove(&1, &1));
        assert!(!bucket.remove(&1, &1));
        assert!(bucket.is_empty());
        assert_eq!(bucket.lookup(&1), Vec::<u32>::new());
    }

    #[test]
    fn insert_reuses_tombstone_before_a_fresh_slot() {
        let mut bucket = HashTableBucketPage::<u32, u32>::new(2);
        bucket.insert(1, 1);
        bucket.insert(2, 2);
        bucket.remove(&1, &1);

        // bucket looks full by occupancy, but has a tombstone to reuse
        assert!(bucket.insert(3, 3));
        assert_eq!(bucket.num_readable(), 2);
    }

    #[test]
    fn array_copy_only_returns_live_pairs() {
        let mut bucket = HashTableBucketPage::<u32, u32>::new(3);
        bucket.insert(1, 1);
        bucket.insert(2, 2);
        bucket.remove(&1, &1);

        assert_eq!(bucket.array_copy(), vec![(2, 2)]);
    }

    #[test]
    fn reset_clears_everything() {
        let mut bucket = HashTableBucketPage::<u32, u32>::new(2);
        bucket.insert(1, 1);
        bucket.reset();

        assert!(bucket.is_empty());
        assert!(!bucket.is_full());
        assert!(bucket.insert(1, 1));
    }
}
