use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::common::{FrameId, PageId, INVALID_PAGE_ID, PAGE_SIZE};

/// Page bytes held by a frame. The lock around them is the page latch.
pub type PageData = Box<[u8; PAGE_SIZE]>;

/// One slot of the buffer pool: the cached page bytes plus the pool's
/// bookkeeping for them.
///
/// Page id and pin count only change while the pool's metadata lock is
/// held; the data latch protects page content.
pub struct FrameHeader {
    frame_id: FrameId,
    /// Resident page, `INVALID_PAGE_ID` while the frame is free
    page_id: RwLock<PageId>,
    /// Outstanding `PinnedPage` handles and manual pins
    pin_count: AtomicU32,
    /// Set by writers, cleared once the bytes reach the store
    is_dirty: AtomicBool,
    /// `Arc` so guards can own the latch
    pub(crate) data: Arc<RwLock<PageData>>,
}

impl FrameHeader {
    pub(crate) fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            page_id: RwLock::new(INVALID_PAGE_ID),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            data: Arc::new(RwLock::new(Box::new([0u8; PAGE_SIZE]))),
        }
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Page currently held by the frame.
    pub fn page_id(&self) -> PageId {
        *self.page_id.read()
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    pub(crate) fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::Release);
    }

    /// Claims a free frame for `page_id` with a single pin.
    pub(crate) fn install(&self, page_id: PageId) {
        debug_assert_eq!(self.pin_count(), 0, "installing into a pinned frame");
        *self.page_id.write() = page_id;
        self.is_dirty.store(false, Ordering::Release);
        self.pin_count.store(1, Ordering::Release);
    }

    /// Adds a pin and returns the new count.
    pub(crate) fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drops a pin and returns the new count, or `None` if the frame was
    /// not pinned.
    pub(crate) fn unpin(&self) -> Option<u32> {
        self.pin_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            })
            .ok()
            .map(|previous| previous - 1)
    }

    /// Marks the frame free. Page bytes are zeroed by whoever installs the
    /// next page, under the latch.
    pub(crate) fn reset(&self) {
        *self.page_id.write() = INVALID_PAGE_ID;
        self.pin_count.store(0, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_pins_once() {
        let frame = FrameHeader::new(FrameId::new(3));
        assert_eq!(frame.page_id(), INVALID_PAGE_ID);

        frame.install(PageId::new(9));
        assert_eq!(frame.page_id(), PageId::new(9));
        assert_eq!(frame.pin_count(), 1);
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_unpin_stops_at_zero() {
        let frame = FrameHeader::new(FrameId::new(0));
        frame.install(PageId::new(1));
        assert_eq!(frame.pin(), 2);

        assert_eq!(frame.unpin(), Some(1));
        assert_eq!(frame.unpin(), Some(0));
        assert_eq!(frame.unpin(), None);
    }

    #[test]
    fn test_reset_frees_frame() {
        let frame = FrameHeader::new(FrameId::new(0));
        frame.install(PageId::new(5));
        frame.set_dirty(true);

        frame.reset();

        assert_eq!(frame.page_id(), INVALID_PAGE_ID);
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_latch_is_shared_through_arc() {
        let frame = FrameHeader::new(FrameId::new(0));
        let mut latch = frame.data.write_arc();
        latch[0] = 7;
        assert!(frame.data.try_read().is_none());
        drop(latch);
        assert_eq!(frame.data.read()[0], 7);
    }
}
