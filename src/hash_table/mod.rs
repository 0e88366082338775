mod bucket;
mod directory;
mod error;
mod table;

pub use bucket::HashTableBucketPage;
pub use directory::HashTableDirectoryPage;
pub use error::HashTableError;
pub use table::ExtendibleHashTable;

/// Absolute ceiling on global/local depth: bounds directory size and
/// split recursion. A directory this deep plus its local-depth array
/// already strains a single 4 KiB directory page, which is why the
/// design caps it here regardless of what a caller's config asks for.
pub const MAX_DEPTH: u32 = 9;
