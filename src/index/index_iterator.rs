use std::cmp::Ordering;
use std::thread;

use crate::buffer::ReadPageGuard;
use crate::common::{ArborError, PageId, RecordId, Result};

use super::btree_page::BTreeNode;
use super::concurrent_control::{ConcurrentControl, Mode, PageLatch};
use super::{BPlusTree, KeyComparator};

/// Forward cursor over a tree's leaves.
///
/// The cursor keeps its current leaf pinned and read-latched, and latches the
/// next leaf before letting go of the current one. Moving to the next leaf
/// never blocks: if that leaf is busy the cursor drops everything and seeks
/// back to the key after the last one it returned.
///
/// A thread must not modify the tree while it holds an open iterator over
/// it; the writer would wait on the iterator's own latch.
pub struct IndexIterator<'a, C: KeyComparator> {
    tree: &'a BPlusTree<C>,
    leaf: Option<ReadPageGuard>,
    index: usize,
    /// Where to resume after a restart, and whether that key itself counts
    resume: Option<(Vec<u8>, bool)>,
    error: Option<ArborError>,
}

impl<'a, C: KeyComparator> IndexIterator<'a, C> {
    pub(crate) fn seek_to(tree: &'a BPlusTree<C>, key: Option<&[u8]>) -> Result<Self> {
        let mut iter = Self {
            tree,
            leaf: None,
            index: 0,
            resume: key.map(|key| (key.to_vec(), true)),
            error: None,
        };
        iter.seek()?;
        iter.settle()?;
        Ok(iter)
    }

    pub(crate) fn exhausted(tree: &'a BPlusTree<C>) -> Self {
        Self {
            tree,
            leaf: None,
            index: 0,
            resume: None,
            error: None,
        }
    }

    /// True once every entry has been returned.
    pub fn is_end(&self) -> bool {
        self.leaf.is_none() && self.error.is_none()
    }

    /// Page id of the leaf under the cursor.
    pub fn current_page_id(&self) -> Option<PageId> {
        self.leaf.as_ref().map(ReadPageGuard::page_id)
    }

    /// Descends from the root to the resume position.
    fn seek(&mut self) -> Result<()> {
        let tree = self.tree;
        let mut ctl = ConcurrentControl::new(tree.bpm(), Mode::Lookup);
        let start = self.resume.as_ref().map(|(key, _)| key.as_slice());
        if !tree.find_leaf(&mut ctl, start)? {
            self.leaf = None;
            return Ok(());
        }

        let guard = match ctl.pop() {
            Some(PageLatch::Read(guard)) => guard,
            _ => panic!("lookup descent must end on a read-latched leaf"),
        };

        let index = {
            let leaf = tree.leaf_view(guard.data());
            match &self.resume {
                None => 0,
                Some((key, inclusive)) => {
                    let index = leaf.key_index(key, tree.comparator());
                    let equal = index < leaf.size()
                        && tree.comparator().compare(leaf.key_at(index), key) == Ordering::Equal;
                    if equal && !inclusive {
                        index + 1
                    } else {
                        index
                    }
                }
            }
        };

        self.leaf = Some(guard);
        self.index = index;
        Ok(())
    }

    /// Moves past exhausted leaves until the cursor rests on an entry or the
    /// end of the chain.
    fn settle(&mut self) -> Result<()> {
        loop {
            let next = match &self.leaf {
                None => return Ok(()),
                Some(guard) => {
                    let leaf = self.tree.leaf_view(guard.data());
                    if self.index < leaf.size() {
                        return Ok(());
                    }
                    leaf.next_page_id()
                }
            };

            let Some(next) = next else {
                self.leaf = None;
                return Ok(());
            };

            let pinned = self
                .tree
                .bpm()
                .fetch_page(next)?
                .ok_or(ArborError::BufferPoolFull)?;
            if let Ok(guard) = pinned.try_read() {
                // Replacing the guard releases the previous leaf
                self.leaf = Some(guard);
                self.index = 0;
                continue;
            }

            tracing::trace!(page_id = %next, "next leaf busy, re-seeking");
            self.leaf = None;
            thread::yield_now();
            self.seek()?;
        }
    }
}

impl<C: KeyComparator> Iterator for IndexIterator<'_, C> {
    type Item = Result<(Vec<u8>, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.error.take() {
            return Some(Err(e));
        }

        let guard = self.leaf.as_ref()?;
        let leaf = self.tree.leaf_view(guard.data());
        let key = leaf.key_at(self.index).to_vec();
        let value = leaf.value_at(self.index);
        self.index += 1;
        self.resume = Some((key.clone(), false));

        if let Err(e) = self.settle() {
            self.leaf = None;
            self.error = Some(e);
        }
        Some(Ok((key, value)))
    }
}
