use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::RawRwLock;

use crate::common::PageId;

use super::{BufferPoolState, FrameHeader, PageData};

pub(crate) type LatchRead = ArcRwLockReadGuard<RawRwLock, PageData>;
pub(crate) type LatchWrite = ArcRwLockWriteGuard<RawRwLock, PageData>;

/// RAII handle for a pinned page. Holds the pin but no latch; the page
/// cannot be evicted while this handle is alive.
///
/// Dropping the handle unpins the page.
pub struct PinnedPage {
    page_id: PageId,
    frame: Arc<FrameHeader>,
    /// `None` once the pin has been handed over to the caller
    pool: Option<Arc<BufferPoolState>>,
}

impl PinnedPage {
    pub(crate) fn new(page_id: PageId, frame: Arc<FrameHeader>, pool: Arc<BufferPoolState>) -> Self {
        Self {
            page_id,
            frame,
            pool: Some(pool),
        }
    }

    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Takes the shared latch, blocking until it is available.
    pub fn read(self) -> ReadPageGuard {
        let latch = self.frame.data.read_arc();
        ReadPageGuard { latch, pin: self }
    }

    /// Takes the exclusive latch, blocking until it is available.
    pub fn write(self) -> WritePageGuard {
        let latch = self.frame.data.write_arc();
        WritePageGuard { latch, pin: self }
    }

    /// Takes the shared latch without blocking. Hands the pin back on
    /// contention.
    pub fn try_read(self) -> std::result::Result<ReadPageGuard, PinnedPage> {
        match self.frame.data.try_read_arc() {
            Some(latch) => Ok(ReadPageGuard { latch, pin: self }),
            None => Err(self),
        }
    }

    /// Takes the exclusive latch without blocking. Hands the pin back on
    /// contention.
    pub fn try_write(self) -> std::result::Result<WritePageGuard, PinnedPage> {
        match self.frame.data.try_write_arc() {
            Some(latch) => Ok(WritePageGuard { latch, pin: self }),
            None => Err(self),
        }
    }

    /// Gives up the RAII release and leaves the page pinned. The caller must
    /// balance it with `BufferPoolManager::unpin_page`.
    pub fn keep_pinned(mut self) -> PageId {
        self.pool.take();
        self.page_id
    }

    pub(crate) fn frame(&self) -> &Arc<FrameHeader> {
        &self.frame
    }

    /// Marks the page dirty without touching its bytes.
    pub fn mark_dirty(&self) {
        self.frame.set_dirty(true);
    }
}

impl Drop for PinnedPage {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.release(self.page_id, &self.frame);
        }
    }
}

/// RAII guard for read-only access to a page.
/// Releases the shared latch, then the pin, when dropped.
pub struct ReadPageGuard {
    // Field order is drop order: latch before pin
    latch: LatchRead,
    pin: PinnedPage,
}

impl ReadPageGuard {
    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.pin.page_id
    }

    /// Returns a reference to the page data.
    pub fn data(&self) -> &[u8] {
        &self.latch[..]
    }

    /// Releases the latch but keeps the page pinned.
    pub fn unlatch(self) -> PinnedPage {
        let Self { latch, pin } = self;
        drop(latch);
        pin
    }
}

impl Deref for ReadPageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

/// RAII guard for read-write access to a page.
/// Any mutable access marks the page dirty. Releases the exclusive latch,
/// then the pin, when dropped.
pub struct WritePageGuard {
    latch: LatchWrite,
    pin: PinnedPage,
}

impl WritePageGuard {
    pub(crate) fn from_parts(latch: LatchWrite, pin: PinnedPage) -> Self {
        Self { latch, pin }
    }

    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.pin.page_id
    }

    /// Returns a reference to the page data.
    pub fn data(&self) -> &[u8] {
        &self.latch[..]
    }

    /// Returns a mutable reference to the page data.
    /// Automatically marks the page as dirty.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.pin.frame.set_dirty(true);
        &mut self.latch[..]
    }

    /// Releases the latch but keeps the page pinned.
    pub fn unlatch(self) -> PinnedPage {
        let Self { latch, pin } = self;
        drop(latch);
        pin
    }
}

impl Deref for WritePageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl DerefMut for WritePageGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_mut()
    }
}

#[cfg(test)]
mod tests {
    use crate::buffer::BufferPoolManager;
    use crate::storage::disk::MemoryPageStore;
    use std::sync::Arc;

    fn create_bpm(pool_size: usize) -> BufferPoolManager {
        BufferPoolManager::new(pool_size, Arc::new(MemoryPageStore::new()))
    }

    #[test]
    fn test_write_guard_marks_dirty_and_unpins() {
        let bpm = create_bpm(4);
        let (page_id, page) = bpm.new_page().unwrap().unwrap();
        assert_eq!(bpm.get_pin_count(page_id), Some(1));

        let mut guard = page.write();
        guard.data_mut()[0] = 42;
        drop(guard);

        assert_eq!(bpm.get_pin_count(page_id), Some(0));
        assert_eq!(bpm.is_dirty(page_id), Some(true));

        let guard = bpm.fetch_page_read(page_id).unwrap().unwrap();
        assert_eq!(guard.data()[0], 42);
    }

    #[test]
    fn test_read_guards_share_latch() {
        let bpm = create_bpm(4);
        let (page_id, page) = bpm.new_page().unwrap().unwrap();
        drop(page);

        let a = bpm.fetch_page_read(page_id).unwrap().unwrap();
        let b = bpm.fetch_page_read(page_id).unwrap().unwrap();
        assert_eq!(bpm.get_pin_count(page_id), Some(2));

        // A writer cannot get in while readers hold the latch
        let pinned = bpm.fetch_page(page_id).unwrap().unwrap();
        let pinned = match pinned.try_write() {
            Ok(_) => panic!("exclusive latch granted under readers"),
            Err(pinned) => pinned,
        };
        drop(a);
        drop(b);
        assert!(pinned.try_write().is_ok());
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
    }

    #[test]
    fn test_unlatch_keeps_pin() {
        let bpm = create_bpm(4);
        let (page_id, page) = bpm.new_page().unwrap().unwrap();
        let pinned = page.write().unlatch();
        assert_eq!(bpm.get_pin_count(page_id), Some(1));
        let guard = pinned.read();
        assert_eq!(guard.page_id(), page_id);
        drop(guard);
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
    }

    #[test]
    fn test_keep_pinned_requires_manual_unpin() {
        let bpm = create_bpm(4);
        let (page_id, page) = bpm.new_page().unwrap().unwrap();
        assert_eq!(page.keep_pinned(), page_id);
        assert_eq!(bpm.get_pin_count(page_id), Some(1));
        assert!(bpm.unpin_page(page_id, false));
        assert!(!bpm.unpin_page(page_id, false));
    }
}
