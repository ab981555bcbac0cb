use super::types::PageId;

/// Size of a page in bytes (4 KB)
pub const PAGE_SIZE: usize = 4096;

/// Invalid page ID constant, also the on-disk encoding of "no page"
pub const INVALID_PAGE_ID: PageId = PageId(u32::MAX);

/// Page reserved for the index directory (name -> root page id records)
pub const HEADER_PAGE_ID: PageId = PageId(0);

/// Default buffer pool size (number of frames)
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 64;

/// Default key width in bytes for B+ tree indexes
pub const DEFAULT_KEY_SIZE: usize = 8;

/// Maximum length in bytes of an index name stored in the directory
pub const MAX_INDEX_NAME_LEN: usize = 32;

/// Depth of the disk scheduler's request queue
pub const DISK_SCHEDULER_QUEUE_DEPTH: usize = 128;
