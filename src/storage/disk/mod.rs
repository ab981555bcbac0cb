mod disk_manager;
mod disk_scheduler;
mod memory_store;

pub use disk_manager::*;
pub use disk_scheduler::*;
pub use memory_store::*;

use crate::common::{PageId, Result};

/// Raw page-granular backing store used by the buffer pool.
///
/// Implementations must never hand out an id that is still live: an id may be
/// returned by `allocate_page` again only after `deallocate_page` released it.
pub trait PageStore: Send + Sync {
    /// Reads a page into `data`, which must be exactly `PAGE_SIZE` bytes.
    /// Pages that were never written read back as zeros.
    fn read_page(&self, page_id: PageId, data: &mut [u8]) -> Result<()>;

    /// Writes `data` (exactly `PAGE_SIZE` bytes) to the page.
    fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()>;

    /// Allocates a zero-initialized page and returns its id.
    fn allocate_page(&self) -> Result<PageId> {
        self.allocate_page_in(0, 1)
    }

    /// Allocates a zero-initialized page whose id is congruent to `shard`
    /// modulo `shards`. Ids skipped on the way stay free for other shards.
    fn allocate_page_in(&self, shard: u32, shards: u32) -> Result<PageId>;

    /// Releases a page id for reuse.
    fn deallocate_page(&self, page_id: PageId) -> Result<()>;

    /// Number of pages the store currently spans.
    fn num_pages(&self) -> u32;
}
