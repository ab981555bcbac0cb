use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{ArborError, FrameId, PageId, Result, PAGE_SIZE};
use crate::storage::disk::{DiskScheduler, PageStore};

use super::page_guard::LatchWrite;
use super::{FrameHeader, LruReplacer, PinnedPage, ReadPageGuard, Replacer, WritePageGuard};

/// Bookkeeping guarded by the pool's single metadata lock
struct PoolMeta {
    /// Page table: maps resident page IDs to frame IDs
    page_table: HashMap<PageId, FrameId>,
    /// Free list: frames that hold no page
    free_list: VecDeque<FrameId>,
}

/// State shared between the pool and the guards it hands out
pub(crate) struct BufferPoolState {
    /// The buffer pool frames
    frames: Vec<Arc<FrameHeader>>,
    /// Page table, free list and every pin-count change
    meta: Mutex<PoolMeta>,
    /// Eviction policy; only called with `meta` held
    replacer: Box<dyn Replacer>,
    /// Background I/O against the backing store
    disk_scheduler: DiskScheduler,
}

impl BufferPoolState {
    /// Drops one pin. A frame whose pin count reaches zero becomes evictable,
    /// or goes straight back to the free list if its page was abandoned.
    pub(crate) fn release(&self, page_id: PageId, frame: &FrameHeader) {
        let mut meta = self.meta.lock();
        if let Some(0) = frame.unpin() {
            let frame_id = frame.frame_id();
            if meta.page_table.get(&page_id) == Some(&frame_id) {
                self.replacer.unpin(frame_id);
            } else {
                frame.reset();
                meta.free_list.push_back(frame_id);
            }
        }
    }

    /// Gets a frame to hold a new page, either from the free list or by
    /// evicting the replacer's victim. A dirty victim is written back before
    /// the frame is reused. Returns `Ok(None)` when every frame is pinned.
    fn acquire_frame(&self, meta: &mut PoolMeta) -> Result<Option<FrameId>> {
        if let Some(frame_id) = meta.free_list.pop_front() {
            return Ok(Some(frame_id));
        }

        let Some(frame_id) = self.replacer.victim() else {
            return Ok(None);
        };
        let frame = &self.frames[frame_id.as_usize()];
        let victim = frame.page_id();
        let dirty = frame.is_dirty();

        if dirty {
            // Pin count is zero, so nobody holds the latch
            let data = frame.data.read();
            if let Err(e) = self.disk_scheduler.schedule_write_sync(victim, &data[..]) {
                drop(data);
                self.replacer.unpin(frame_id);
                return Err(e);
            }
        }

        meta.page_table.remove(&victim);
        frame.reset();
        tracing::debug!(%frame_id, page_id = %victim, dirty, "evicted page");

        Ok(Some(frame_id))
    }
}

/// BufferPoolManager is responsible for fetching database pages from the
/// backing store and caching them in a fixed number of frames. It uses an
/// LRU replacement policy to decide which unpinned page to evict.
///
/// Pages are handed out as [`PinnedPage`], [`ReadPageGuard`] or
/// [`WritePageGuard`]; dropping the handle unpins the page.
pub struct BufferPoolManager {
    /// Number of frames in the buffer pool
    pool_size: usize,
    /// New page ids are congruent to `shard` modulo `shards`
    shard: u32,
    shards: u32,
    /// Shared state
    state: Arc<BufferPoolState>,
}

impl BufferPoolManager {
    /// Creates a new BufferPoolManager with the given pool size on top of a
    /// backing store.
    pub fn new(pool_size: usize, store: Arc<dyn PageStore>) -> Self {
        Self::with_replacer(pool_size, store, Box::new(LruReplacer::new(pool_size)))
    }

    /// Creates one instance of a sharded pool. The instance only allocates
    /// page ids congruent to `instance_index` modulo `num_instances`.
    pub fn new_instance(
        pool_size: usize,
        num_instances: u32,
        instance_index: u32,
        store: Arc<dyn PageStore>,
    ) -> Self {
        assert!(
            instance_index < num_instances,
            "instance {instance_index} out of {num_instances}"
        );
        let mut bpm = Self::new(pool_size, store);
        bpm.shard = instance_index;
        bpm.shards = num_instances;
        bpm
    }

    /// Creates a BufferPoolManager with a custom replacement policy.
    pub fn with_replacer(
        pool_size: usize,
        store: Arc<dyn PageStore>,
        replacer: Box<dyn Replacer>,
    ) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(FrameHeader::new(frame_id)));
            free_list.push_back(frame_id);
        }

        let state = Arc::new(BufferPoolState {
            frames,
            meta: Mutex::new(PoolMeta {
                page_table: HashMap::new(),
                free_list,
            }),
            replacer,
            disk_scheduler: DiskScheduler::new(store),
        });

        Self {
            pool_size,
            shard: 0,
            shards: 1,
            state,
        }
    }

    /// Fetches a page and pins it. Returns `Ok(None)` if the page is not
    /// resident and every frame is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Result<Option<PinnedPage>> {
        Ok(self.pin_or_load(page_id)?.map(|(page, latch)| {
            drop(latch);
            page
        }))
    }

    /// Fetches a page for read access.
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<Option<ReadPageGuard>> {
        Ok(self.pin_or_load(page_id)?.map(|(page, latch)| {
            drop(latch);
            page.read()
        }))
    }

    /// Fetches a page for write access.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<Option<WritePageGuard>> {
        Ok(self
            .pin_or_load(page_id)?
            .map(|(page, latch)| match latch {
                Some(latch) => WritePageGuard::from_parts(latch, page),
                None => page.write(),
            }))
    }

    /// Allocates a fresh page in the backing store and gives it a zeroed,
    /// pinned frame. Returns `Ok(None)` if every frame is pinned; no page id
    /// is allocated in that case.
    pub fn new_page(&self) -> Result<Option<(PageId, PinnedPage)>> {
        Ok(self.allocate_frame()?.map(|(latch, page)| {
            drop(latch);
            (page.page_id(), page)
        }))
    }

    /// Allocates a fresh page and returns it write-latched.
    pub fn new_page_write(&self) -> Result<Option<WritePageGuard>> {
        Ok(self
            .allocate_frame()?
            .map(|(latch, page)| WritePageGuard::from_parts(latch, page)))
    }

    /// Drops a pin taken with [`PinnedPage::keep_pinned`]. Returns false if the
    /// page is not resident or its pin count is already zero.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let meta = self.state.meta.lock();
        let Some(&frame_id) = meta.page_table.get(&page_id) else {
            return false;
        };
        let frame = &self.state.frames[frame_id.as_usize()];
        if frame.pin_count() == 0 {
            return false;
        }

        if is_dirty {
            frame.set_dirty(true);
        }
        if let Some(0) = frame.unpin() {
            self.state.replacer.unpin(frame_id);
        }
        true
    }

    /// Deletes a resident page from the buffer pool and releases its id in
    /// the backing store. Returns false if the page is pinned.
    ///
    /// A page that is not resident is reported as deleted and left alone;
    /// its id is only released by a delete that finds it in the pool, or by
    /// [`Self::discard_page`].
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut meta = self.state.meta.lock();

        let Some(&frame_id) = meta.page_table.get(&page_id) else {
            return Ok(true);
        };
        let frame = &self.state.frames[frame_id.as_usize()];
        if frame.pin_count() > 0 {
            return Ok(false);
        }

        meta.page_table.remove(&page_id);
        self.state.replacer.pin(frame_id);
        frame.reset();
        meta.free_list.push_back(frame_id);
        drop(meta);

        self.state.disk_scheduler.store().deallocate_page(page_id)?;
        tracing::trace!(%page_id, "deleted page");

        Ok(true)
    }

    /// Deletes a page through the caller's pin, which must be the last one.
    /// The page leaves the pool, its bytes are dropped and its id is released.
    ///
    /// While other pins remain nothing changes and the handle is given back.
    pub fn discard_page(&self, page: PinnedPage) -> Result<Option<PinnedPage>> {
        let mut meta = self.state.meta.lock();
        let frame = Arc::clone(page.frame());
        if frame.pin_count() > 1 {
            drop(meta);
            return Ok(Some(page));
        }

        let page_id = page.keep_pinned();
        let frame_id = frame.frame_id();
        meta.page_table.remove(&page_id);
        frame.reset();
        meta.free_list.push_back(frame_id);
        drop(meta);

        self.state.disk_scheduler.store().deallocate_page(page_id)?;
        tracing::trace!(%page_id, "discarded page");

        Ok(None)
    }

    /// Rewrites a page in place without claiming a frame for it.
    ///
    /// A resident page is updated under its exclusive latch and marked dirty.
    /// Otherwise the page is read, changed and written straight back to the
    /// store while the metadata lock keeps it from being loaded meanwhile.
    pub fn modify_page<F>(&self, page_id: PageId, f: F) -> Result<()>
    where
        F: FnOnce(&mut [u8]),
    {
        if !page_id.is_valid() {
            return Err(ArborError::InvalidPageId(page_id));
        }

        let meta = self.state.meta.lock();
        if let Some(&frame_id) = meta.page_table.get(&page_id) {
            let frame = &self.state.frames[frame_id.as_usize()];
            frame.pin();
            self.state.replacer.pin(frame_id);
            let page = PinnedPage::new(page_id, Arc::clone(frame), Arc::clone(&self.state));
            drop(meta);

            let mut guard = page.write();
            f(guard.data_mut());
            return Ok(());
        }

        let mut data = vec![0u8; PAGE_SIZE];
        let scheduler = &self.state.disk_scheduler;
        scheduler.schedule_read_sync(page_id, &mut data[..])?;
        f(&mut data[..]);
        scheduler.schedule_write_sync(page_id, &data[..])?;
        drop(meta);

        tracing::trace!(%page_id, "modified page in place");
        Ok(())
    }

    /// Writes a resident page back to the backing store and clears its dirty
    /// flag. Returns false if the page is not resident. Never evicts and
    /// leaves the eviction order as it was.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if !page_id.is_valid() {
            return Err(ArborError::InvalidPageId(page_id));
        }
        self.flush_resident(page_id, false)
    }

    /// Flushes every dirty resident page.
    pub fn flush_all_pages(&self) -> Result<()> {
        let resident: Vec<PageId> = self.state.meta.lock().page_table.keys().copied().collect();

        for page_id in resident {
            self.flush_resident(page_id, true)?;
        }

        Ok(())
    }

    /// Returns the pin count for a page.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let meta = self.state.meta.lock();
        meta.page_table
            .get(&page_id)
            .map(|&frame_id| self.state.frames[frame_id.as_usize()].pin_count())
    }

    /// Returns the dirty flag for a resident page.
    pub fn is_dirty(&self, page_id: PageId) -> Option<bool> {
        let meta = self.state.meta.lock();
        meta.page_table
            .get(&page_id)
            .map(|&frame_id| self.state.frames[frame_id.as_usize()].is_dirty())
    }

    /// Returns whether the page currently occupies a frame.
    pub fn is_resident(&self, page_id: PageId) -> bool {
        self.state.meta.lock().page_table.contains_key(&page_id)
    }

    /// Returns the pool size.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Returns the number of free frames.
    pub fn free_frame_count(&self) -> usize {
        self.state.meta.lock().free_list.len()
    }

    /// Returns the number of frames the replacer could evict right now.
    pub fn evictable_count(&self) -> usize {
        let _meta = self.state.meta.lock();
        self.state.replacer.size()
    }

    /// Returns the backing store.
    pub fn store(&self) -> &Arc<dyn PageStore> {
        self.state.disk_scheduler.store()
    }

    /// Pins a page, loading it if it is not resident. A freshly loaded page
    /// comes back with the exclusive latch still held from the load.
    fn pin_or_load(&self, page_id: PageId) -> Result<Option<(PinnedPage, Option<LatchWrite>)>> {
        if !page_id.is_valid() {
            return Err(ArborError::InvalidPageId(page_id));
        }

        let mut meta = self.state.meta.lock();
        if let Some(&frame_id) = meta.page_table.get(&page_id) {
            let frame = &self.state.frames[frame_id.as_usize()];
            frame.pin();
            self.state.replacer.pin(frame_id);
            let page = PinnedPage::new(page_id, Arc::clone(frame), Arc::clone(&self.state));
            return Ok(Some((page, None)));
        }

        let Some(frame_id) = self.state.acquire_frame(&mut meta)? else {
            return Ok(None);
        };
        let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);

        // Register the page before loading it, then load outside the metadata
        // lock. Concurrent fetchers pin the frame and wait on the latch.
        let mut latch = frame.data.write_arc();
        frame.install(page_id);
        meta.page_table.insert(page_id, frame_id);
        drop(meta);

        let page = PinnedPage::new(page_id, Arc::clone(&frame), Arc::clone(&self.state));
        if let Err(e) = self
            .state
            .disk_scheduler
            .schedule_read_sync(page_id, &mut latch[..])
        {
            latch.fill(0);
            drop(latch);
            self.state.meta.lock().page_table.remove(&page_id);
            // Dropping the last pin returns the frame to the free list
            drop(page);
            return Err(e);
        }
        tracing::trace!(%page_id, %frame_id, "loaded page");

        Ok(Some((page, Some(latch))))
    }

    fn allocate_frame(&self) -> Result<Option<(LatchWrite, PinnedPage)>> {
        let mut meta = self.state.meta.lock();
        let Some(frame_id) = self.state.acquire_frame(&mut meta)? else {
            return Ok(None);
        };

        let store = self.state.disk_scheduler.store();
        let page_id = match store.allocate_page_in(self.shard, self.shards) {
            Ok(page_id) => page_id,
            Err(e) => {
                meta.free_list.push_back(frame_id);
                return Err(e);
            }
        };

        let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);
        let mut latch = frame.data.write_arc();
        latch.fill(0);
        frame.install(page_id);
        meta.page_table.insert(page_id, frame_id);
        drop(meta);

        tracing::trace!(%page_id, %frame_id, "allocated page");
        let page = PinnedPage::new(page_id, frame, Arc::clone(&self.state));
        Ok(Some((latch, page)))
    }

    /// Writes a resident page back without going through the replacer.
    /// Returns false if the page is not resident.
    fn flush_resident(&self, page_id: PageId, only_dirty: bool) -> Result<bool> {
        let meta = self.state.meta.lock();
        let Some(&frame_id) = meta.page_table.get(&page_id) else {
            return Ok(false);
        };
        let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);

        if frame.pin_count() == 0 {
            // Unpinned, so nobody holds the latch and eviction waits on `meta`
            let data = frame.data.read();
            if !only_dirty || frame.is_dirty() {
                self.state.disk_scheduler.schedule_write_sync(page_id, &data[..])?;
                frame.set_dirty(false);
            }
            return Ok(true);
        }

        // Already pinned, hence already out of the replacer
        frame.pin();
        let page = PinnedPage::new(page_id, frame, Arc::clone(&self.state));
        drop(meta);
        self.write_back(&page, only_dirty)?;
        Ok(true)
    }

    /// Writes a pinned page under its shared latch and clears the dirty flag.
    fn write_back(&self, page: &PinnedPage, only_dirty: bool) -> Result<()> {
        let frame = page.frame();
        let data = frame.data.read();
        if only_dirty && !frame.is_dirty() {
            return Ok(());
        }
        self.state
            .disk_scheduler
            .schedule_write_sync(page.page_id(), &data[..])?;
        frame.set_dirty(false);
        Ok(())
    }
}
