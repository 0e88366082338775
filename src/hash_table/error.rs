use thiserror::Error;

#[derive(Error, Debug)]
pub enum HashTableError {
    #[error("directory local depth would exceed the configured maximum depth")]
    MaxDepthExceeded,

    #[error("buffer pool returned no page for id {0}")]
    PageNotFound(usize),

    #[error("buffer pool is exhausted: could not allocate a new page")]
    BufferPoolExhausted,
}
