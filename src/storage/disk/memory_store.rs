use std::collections::{BTreeSet, HashMap};

use parking_lot::Mutex;

use crate::common::{ArborError, PageId, Result, PAGE_SIZE};

use super::PageStore;

#[derive(Default)]
struct MemoryState {
    pages: HashMap<PageId, Box<[u8; PAGE_SIZE]>>,
    free_pages: BTreeSet<PageId>,
    num_pages: u32,
}

/// In-memory `PageStore` with the same allocation rules as `DiskManager`.
/// Useful for tests that do not care about persistence.
#[derive(Default)]
pub struct MemoryPageStore {
    state: Mutex<MemoryState>,
}

impl MemoryPageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PageStore for MemoryPageStore {
    fn read_page(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");
        let state = self.state.lock();
        match state.pages.get(&page_id) {
            Some(page) => data.copy_from_slice(&page[..]),
            None => data.fill(0),
        }
        Ok(())
    }

    fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");
        if !page_id.is_valid() {
            return Err(ArborError::InvalidPageId(page_id));
        }
        let mut state = self.state.lock();
        let page = state
            .pages
            .entry(page_id)
            .or_insert_with(|| Box::new([0u8; PAGE_SIZE]));
        page.copy_from_slice(data);
        state.num_pages = state.num_pages.max(page_id.as_u32() + 1);
        Ok(())
    }

    fn allocate_page_in(&self, shard: u32, shards: u32) -> Result<PageId> {
        assert!(shard < shards, "shard {shard} out of {shards}");

        let mut state = self.state.lock();
        let recycled = state
            .free_pages
            .iter()
            .copied()
            .find(|page_id| page_id.as_u32() % shards == shard);
        let page_id = match recycled {
            Some(page_id) => {
                state.free_pages.remove(&page_id);
                page_id
            }
            None => loop {
                let page_id = PageId::new(state.num_pages);
                state.num_pages += 1;
                if page_id.as_u32() % shards == shard {
                    break page_id;
                }
                state.free_pages.insert(page_id);
            },
        };
        state.pages.insert(page_id, Box::new([0u8; PAGE_SIZE]));
        Ok(page_id)
    }

    fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        let mut state = self.state.lock();
        if page_id.as_u32() >= state.num_pages {
            return Err(ArborError::InvalidPageId(page_id));
        }
        state.pages.remove(&page_id);
        state.free_pages.insert(page_id);
        Ok(())
    }

    fn num_pages(&self) -> u32 {
        self.state.lock().num_pages
    }
}
