use thiserror::Error;

use super::types::PageId;

/// Storage engine error types
#[derive(Error, Debug)]
pub enum ArborError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Buffer pool is full, no evictable frames available")]
    BufferPoolFull,

    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("Disk scheduler error: {0}")]
    DiskScheduler(String),

    #[error("Directory page is full")]
    DirectoryFull,

    #[error("Invalid database file")]
    InvalidDatabaseFile,

    #[error("Invalid index name {0:?}")]
    InvalidIndexName(String),

    #[error("Index {0:?} not found")]
    IndexNotFound(String),

    #[error("Index {0:?} already exists")]
    IndexAlreadyExists(String),

    #[error("Invalid index options: {0}")]
    InvalidIndexOptions(String),

    #[error("Key must be {expected} bytes, got {actual}")]
    KeySizeMismatch { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, ArborError>;
