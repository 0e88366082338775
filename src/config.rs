/// Construction-time parameters for an [`crate::ExtendibleHashTable`] and
/// the buffer pool backing it.
///
/// This mirrors the abstract constants named in the external-interfaces
/// section of the design: `BUCKET_CAPACITY` is derived from a page size
/// and slot layout, `MAX_DEPTH` bounds directory growth and split
/// recursion.
#[derive(Debug, Clone, Copy)]
pub struct HashTableConfig {
    /// Number of frames held by the buffer pool.
    pub pool_size: usize,
    /// `k` used by the LRU-K replacement policy.
    pub replacer_k: usize,
    /// Maximum global/local depth the directory may reach.
    pub directory_max_depth: u32,
    /// Maximum number of (key, value) pairs a bucket page holds.
    pub bucket_max_size: usize,
}

/// bustub caps directory depth at 9 so that `2^gd` bucket ids plus local
/// depths still fit a single 4 KiB directory page.
pub const DEFAULT_DIRECTORY_MAX_DEPTH: u32 = 9;
pub const DEFAULT_BUCKET_MAX_SIZE: usize = 255;

impl Default for HashTableConfig {
    fn default() -> Self {
        Self {
            pool_size: 64,
            replacer_k: 2,
            directory_max_depth: DEFAULT_DIRECTORY_MAX_DEPTH,
            bucket_max_size: DEFAULT_BUCKET_MAX_SIZE,
        }
    }
}
