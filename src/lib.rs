//! Arbor - a buffer pool and a concurrent disk-backed B+ tree
//!
//! This crate provides the core of a disk-oriented storage engine: a
//! fixed-size page cache in front of a page store, and a B+ tree index whose
//! nodes live in that cache.
//!
//! # Architecture
//!
//! - **Storage Layer** (`storage`): Page I/O and on-disk metadata
//!   - `PageStore`: Backing store interface (`DiskManager`, `MemoryPageStore`)
//!   - `DiskScheduler`: Background worker that serializes page I/O
//!   - `IndexDirectory`: `name -> root page id` records in the header page
//!
//! - **Buffer Pool** (`buffer`): Memory management for pages
//!   - `BufferPoolManager`: Fetches pages into frames and evicts unpinned ones
//!   - `ParallelBufferPoolManager`: Instances sharded by `page_id % n`
//!   - `LruReplacer`: Least-recently-unpinned eviction policy
//!   - `PinnedPage`/`ReadPageGuard`/`WritePageGuard`: RAII pins and latches
//!
//! - **Index** (`index`): B+ tree with latch crabbing
//!   - `BPlusTree`: Unique-key insert, remove, point lookup
//!   - `IndexIterator`: Ascending scans over the leaf chain
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use arbor::buffer::BufferPoolManager;
//! use arbor::index::{integer_key, BPlusTree, IndexOptions, IntegerComparator};
//! use arbor::storage::disk::DiskManager;
//! use arbor::storage::page::IndexDirectory;
//! use arbor::{PageId, RecordId, SlotId};
//!
//! let disk_manager = Arc::new(DiskManager::new("test.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(64, disk_manager));
//! let directory = Arc::new(IndexDirectory::open(Arc::clone(&bpm)).unwrap());
//!
//! let tree = BPlusTree::new(
//!     "orders_pk",
//!     Arc::clone(&bpm),
//!     directory,
//!     IntegerComparator,
//!     IndexOptions::default(),
//! )
//! .unwrap();
//!
//! let rid = RecordId::new(PageId::new(7), SlotId::new(3));
//! tree.insert(&integer_key(42), rid).unwrap();
//! assert_eq!(tree.get_value(&integer_key(42)).unwrap(), Some(rid));
//!
//! bpm.flush_all_pages().unwrap();
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{ArborError, PageId, RecordId, Result, SlotId};
