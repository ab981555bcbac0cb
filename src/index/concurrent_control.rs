//! Latch crabbing bookkeeping for one tree operation.
//!
//! A `ConcurrentControl` owns every latch and pin an operation holds: the
//! root-id latch, the root-to-leaf window of page guards, and any extra pages
//! (siblings, freshly allocated nodes). Dropping it releases them in
//! acquisition order and then discards the pages a delete freed through the
//! pins it still holds on them.

use std::thread;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::buffer::{BufferPoolManager, PinnedPage, ReadPageGuard, WritePageGuard};
use crate::common::PageId;

/// How many times a freed page is retried while someone still pins it.
const DELETE_RETRIES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Lookup,
    Insert,
    Delete,
}

enum RootLatch<'a> {
    Read(RwLockReadGuard<'a, PageId>),
    Write(RwLockWriteGuard<'a, PageId>),
}

impl RootLatch<'_> {
    fn page_id(&self) -> PageId {
        match self {
            RootLatch::Read(guard) => **guard,
            RootLatch::Write(guard) => **guard,
        }
    }
}

pub(crate) enum PageLatch {
    Read(ReadPageGuard),
    Write(WritePageGuard),
}

impl PageLatch {
    pub(crate) fn page_id(&self) -> PageId {
        match self {
            PageLatch::Read(guard) => guard.page_id(),
            PageLatch::Write(guard) => guard.page_id(),
        }
    }

    pub(crate) fn data(&self) -> &[u8] {
        match self {
            PageLatch::Read(guard) => guard.data(),
            PageLatch::Write(guard) => guard.data(),
        }
    }

    fn unlatch(self) -> PinnedPage {
        match self {
            PageLatch::Read(guard) => guard.unlatch(),
            PageLatch::Write(guard) => guard.unlatch(),
        }
    }
}

pub(crate) struct ConcurrentControl<'a> {
    mode: Mode,
    bpm: &'a BufferPoolManager,
    root: Option<RootLatch<'a>>,
    path: Vec<PageLatch>,
    extra: Vec<WritePageGuard>,
    deleted: Vec<PageId>,
}

impl<'a> ConcurrentControl<'a> {
    pub(crate) fn new(bpm: &'a BufferPoolManager, mode: Mode) -> Self {
        Self {
            mode,
            bpm,
            root: None,
            path: Vec::new(),
            extra: Vec::new(),
            deleted: Vec::new(),
        }
    }

    pub(crate) fn mode(&self) -> Mode {
        self.mode
    }

    /// Latches the root id in the mode's latch mode and returns it.
    pub(crate) fn latch_root(&mut self, root: &'a RwLock<PageId>) -> PageId {
        let latch = match self.mode {
            Mode::Lookup => RootLatch::Read(root.read()),
            Mode::Insert | Mode::Delete => RootLatch::Write(root.write()),
        };
        let page_id = latch.page_id();
        self.root = Some(latch);
        page_id
    }

    pub(crate) fn holds_root(&self) -> bool {
        self.root.is_some()
    }

    /// Replaces the root id. Panics unless the root latch is held exclusively.
    pub(crate) fn set_root(&mut self, page_id: PageId) {
        match self.root.as_mut() {
            Some(RootLatch::Write(guard)) => **guard = page_id,
            _ => panic!("root id changed without holding the root latch exclusively"),
        }
    }

    /// Adds the next page of the descent. Lookups keep only the newest page;
    /// inserts drop every ancestor once the new page is `safe`; deletes keep
    /// everything.
    pub(crate) fn push(&mut self, latch: PageLatch, safe: bool) {
        let release = match self.mode {
            Mode::Lookup => true,
            Mode::Insert => safe,
            Mode::Delete => false,
        };
        if release {
            self.release_ancestors();
        }
        tracing::trace!(page_id = %latch.page_id(), mode = ?self.mode, "latched page");
        self.path.push(latch);
    }

    /// Releases the root latch and every page on the path.
    pub(crate) fn release_ancestors(&mut self) {
        self.root.take();
        for latch in self.path.drain(..) {
            drop(latch);
        }
    }

    pub(crate) fn path_len(&self) -> usize {
        self.path.len()
    }

    pub(crate) fn last(&self) -> Option<&PageLatch> {
        self.path.last()
    }

    /// Takes the newest page off the path, e.g. to hand it to an iterator.
    pub(crate) fn pop(&mut self) -> Option<PageLatch> {
        self.path.pop()
    }

    pub(crate) fn write_at(&mut self, index: usize) -> &mut WritePageGuard {
        match &mut self.path[index] {
            PageLatch::Write(guard) => guard,
            PageLatch::Read(guard) => panic!("page {} is only read-latched", guard.page_id()),
        }
    }

    /// Borrows the page at `index`, its parent, and the held extra page in
    /// slot `extra` (a sibling of the page).
    pub(crate) fn family(
        &mut self,
        index: usize,
        extra: usize,
    ) -> (&mut WritePageGuard, &mut WritePageGuard, &mut WritePageGuard) {
        assert!(index > 0, "the top of the window has no held parent");
        let (upper, lower) = self.path.split_at_mut(index);
        match (&mut upper[index - 1], &mut lower[0]) {
            (PageLatch::Write(parent), PageLatch::Write(child)) => {
                (parent, child, &mut self.extra[extra])
            }
            _ => panic!("structural change on a read-latched page"),
        }
    }

    pub(crate) fn extra(&self, slot: usize) -> &WritePageGuard {
        &self.extra[slot]
    }

    /// Holds an extra exclusively latched page until the operation ends and
    /// returns its slot.
    pub(crate) fn add_extra(&mut self, guard: WritePageGuard) -> usize {
        self.extra.push(guard);
        self.extra.len() - 1
    }

    /// Looks for a held, exclusively latched page.
    pub(crate) fn find_write_mut(&mut self, page_id: PageId) -> Option<&mut WritePageGuard> {
        let on_path = self.path.iter_mut().find_map(|latch| match latch {
            PageLatch::Write(guard) if guard.page_id() == page_id => Some(guard),
            _ => None,
        });
        match on_path {
            Some(guard) => Some(guard),
            None => self.extra.iter_mut().find(|guard| guard.page_id() == page_id),
        }
    }

    /// Schedules a held page for deletion once everything is released.
    pub(crate) fn defer_delete(&mut self, page_id: PageId) {
        self.deleted.push(page_id);
    }

    /// Deletes each freed page through its remaining pin, waiting a little
    /// for readers that pinned it before it was unlinked.
    fn discard_freed_pages(&self, freed: Vec<PinnedPage>) {
        for mut page in freed {
            let page_id = page.page_id();
            let mut attempts = 0;
            loop {
                match self.bpm.discard_page(page) {
                    Ok(None) => break,
                    Ok(Some(still_pinned)) if attempts < DELETE_RETRIES => {
                        attempts += 1;
                        page = still_pinned;
                        thread::yield_now();
                    }
                    Ok(Some(_)) => {
                        tracing::warn!(%page_id, "freed page still pinned, leaving it allocated");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(%page_id, error = %e, "failed to deallocate freed page");
                        break;
                    }
                }
            }
        }
    }
}

impl Drop for ConcurrentControl<'_> {
    fn drop(&mut self) {
        self.root.take();

        let mut freed = Vec::with_capacity(self.deleted.len());
        let latches = self
            .path
            .drain(..)
            .chain(self.extra.drain(..).map(PageLatch::Write));
        for latch in latches {
            if self.deleted.contains(&latch.page_id()) {
                freed.push(latch.unlatch());
            }
        }
        if freed.len() != self.deleted.len() {
            tracing::warn!(
                deleted = self.deleted.len(),
                held = freed.len(),
                "freed page released before it could be discarded"
            );
        }
        self.discard_freed_pages(freed);
    }
}
