use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::common::{PageId, Result};
use crate::storage::disk::PageStore;

use super::{BufferPoolManager, PinnedPage, ReadPageGuard, WritePageGuard};

/// A buffer pool split into independent instances over one backing store.
///
/// Page `p` always lives in instance `p % num_instances`, so operations on
/// different instances never share a metadata lock. New pages are spread
/// round-robin: each call starts one instance further along and takes the
/// first instance with a frame to spare.
pub struct ParallelBufferPoolManager {
    instances: Vec<BufferPoolManager>,
    /// Instance the next `new_page` call tries first
    next_instance: AtomicUsize,
}

impl ParallelBufferPoolManager {
    /// Creates `num_instances` pools of `pool_size` frames each.
    pub fn new(num_instances: usize, pool_size: usize, store: Arc<dyn PageStore>) -> Self {
        assert!(num_instances > 0, "a parallel pool needs at least one instance");
        let shards = num_instances as u32;
        let instances = (0..shards)
            .map(|index| {
                BufferPoolManager::new_instance(pool_size, shards, index, Arc::clone(&store))
            })
            .collect();
        tracing::debug!(num_instances, pool_size, "created parallel buffer pool");

        Self {
            instances,
            next_instance: AtomicUsize::new(0),
        }
    }

    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }

    /// Total number of frames across all instances.
    pub fn pool_size(&self) -> usize {
        self.instances.iter().map(BufferPoolManager::pool_size).sum()
    }

    /// The instance responsible for `page_id`.
    pub fn instance_for(&self, page_id: PageId) -> &BufferPoolManager {
        &self.instances[page_id.as_u32() as usize % self.instances.len()]
    }

    pub fn fetch_page(&self, page_id: PageId) -> Result<Option<PinnedPage>> {
        self.instance_for(page_id).fetch_page(page_id)
    }

    pub fn fetch_page_read(&self, page_id: PageId) -> Result<Option<ReadPageGuard>> {
        self.instance_for(page_id).fetch_page_read(page_id)
    }

    pub fn fetch_page_write(&self, page_id: PageId) -> Result<Option<WritePageGuard>> {
        self.instance_for(page_id).fetch_page_write(page_id)
    }

    /// Allocates a page in the first instance, starting from the round-robin
    /// cursor, that has a frame to spare. Returns `Ok(None)` if none does.
    pub fn new_page(&self) -> Result<Option<(PageId, PinnedPage)>> {
        let n = self.instances.len();
        let start = self.next_instance.fetch_add(1, Ordering::Relaxed) % n;
        for offset in 0..n {
            if let Some(page) = self.instances[(start + offset) % n].new_page()? {
                return Ok(Some(page));
            }
        }
        Ok(None)
    }

    /// Like [`Self::new_page`], returning the page write-latched.
    pub fn new_page_write(&self) -> Result<Option<WritePageGuard>> {
        let n = self.instances.len();
        let start = self.next_instance.fetch_add(1, Ordering::Relaxed) % n;
        for offset in 0..n {
            if let Some(guard) = self.instances[(start + offset) % n].new_page_write()? {
                return Ok(Some(guard));
            }
        }
        Ok(None)
    }

    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        self.instance_for(page_id).unpin_page(page_id, is_dirty)
    }

    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        self.instance_for(page_id).delete_page(page_id)
    }

    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        self.instance_for(page_id).flush_page(page_id)
    }

    pub fn flush_all_pages(&self) -> Result<()> {
        for instance in &self.instances {
            instance.flush_all_pages()?;
        }
        Ok(())
    }

    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        self.instance_for(page_id).get_pin_count(page_id)
    }

    pub fn is_resident(&self, page_id: PageId) -> bool {
        self.instance_for(page_id).is_resident(page_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk::MemoryPageStore;

    fn create_pool(num_instances: usize, pool_size: usize) -> ParallelBufferPoolManager {
        ParallelBufferPoolManager::new(num_instances, pool_size, Arc::new(MemoryPageStore::new()))
    }

    #[test]
    fn test_parallel_pool_size_is_total() {
        let pool = create_pool(4, 5);
        assert_eq!(pool.num_instances(), 4);
        assert_eq!(pool.pool_size(), 20);
    }

    #[test]
    fn test_new_pages_rotate_through_instances() {
        let pool = create_pool(3, 2);

        let pages: Vec<(PageId, PinnedPage)> =
            (0..3).map(|_| pool.new_page().unwrap().unwrap()).collect();
        let mut shards: Vec<u32> = pages.iter().map(|(id, _)| id.as_u32() % 3).collect();
        shards.sort_unstable();
        assert_eq!(shards, vec![0, 1, 2]);

        for (page_id, _) in &pages {
            assert_eq!(pool.get_pin_count(*page_id), Some(1));
            assert!(pool.instance_for(*page_id).is_resident(*page_id));
        }
    }

    #[test]
    fn test_new_page_falls_through_full_instances() {
        let pool = create_pool(2, 1);

        let (first, _a) = pool.new_page().unwrap().unwrap();
        let (second, _b) = pool.new_page().unwrap().unwrap();
        assert_ne!(first.as_u32() % 2, second.as_u32() % 2);

        // Both instances are pinned full
        assert!(pool.new_page().unwrap().is_none());
        assert!(pool.new_page_write().unwrap().is_none());
    }

    #[test]
    fn test_fetch_routes_by_page_id() {
        let pool = create_pool(2, 1);

        let page_id = {
            let mut guard = pool.new_page_write().unwrap().unwrap();
            guard.data_mut()[0] = 77;
            guard.page_id()
        };
        let owner = page_id.as_u32() % 2;

        // Fill the other instance; the page stays reachable through its own
        let (other, _pinned) = loop {
            let (id, page) = pool.new_page().unwrap().unwrap();
            if id.as_u32() % 2 != owner {
                break (id, page);
            }
        };
        assert!(pool.is_resident(page_id));
        assert!(!pool.instance_for(other).is_resident(page_id));

        let guard = pool.fetch_page_read(page_id).unwrap().unwrap();
        assert_eq!(guard.data()[0], 77);
    }

    #[test]
    fn test_delete_and_flush_route_to_owner() {
        let store = Arc::new(MemoryPageStore::new());
        let pool = ParallelBufferPoolManager::new(2, 2, store.clone());

        let page_id = {
            let mut guard = pool.new_page_write().unwrap().unwrap();
            guard.data_mut()[1] = 9;
            guard.page_id()
        };
        assert!(pool.flush_page(page_id).unwrap());

        let mut data = [0u8; crate::common::PAGE_SIZE];
        store.read_page(page_id, &mut data).unwrap();
        assert_eq!(data[1], 9);

        assert!(pool.delete_page(page_id).unwrap());
        assert!(!pool.is_resident(page_id));
        pool.flush_all_pages().unwrap();
    }
}
