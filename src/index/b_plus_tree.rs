use std::cmp::Ordering;
use std::sync::Arc;
use std::thread;

use parking_lot::RwLock;

use crate::buffer::{BufferPoolManager, ReadPageGuard, WritePageGuard};
use crate::common::{ArborError, PageId, RecordId, Result, INVALID_PAGE_ID};
use crate::storage::page::{validate_name, IndexDirectory};

use super::btree_page::{BTreeNode, BTreeNodeMut, BTreePage};
use super::concurrent_control::{ConcurrentControl, Mode, PageLatch};
use super::{IndexIterator, IndexOptions, InternalPage, KeyComparator, LeafPage};

/// Shape of a tree as measured by [`BPlusTree::check_integrity`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub height: usize,
    pub num_leaves: usize,
    pub num_internal: usize,
    pub num_keys: usize,
}

enum RemoveOutcome {
    Done,
    Retry,
}

/// A latched sibling of an underfull node, held as an extra page.
struct Sibling {
    slot: usize,
    is_right: bool,
    /// Position of the underfull node among its parent's children
    node_index: usize,
}

/// A disk-backed B+ tree mapping unique fixed-width keys to [`RecordId`]s.
///
/// Every page lives in the buffer pool. Operations latch pages root to leaf
/// (latch crabbing), so one tree can be shared across threads. The root page
/// id is guarded by its own latch and recorded in the [`IndexDirectory`]
/// whenever it changes.
pub struct BPlusTree<C: KeyComparator> {
    name: String,
    bpm: Arc<BufferPoolManager>,
    directory: Arc<IndexDirectory>,
    comparator: C,
    options: IndexOptions,
    root: RwLock<PageId>,
}

impl<C: KeyComparator> BPlusTree<C> {
    /// Creates an empty tree. The name is recorded in the directory when the
    /// first key is inserted.
    pub fn new(
        name: &str,
        bpm: Arc<BufferPoolManager>,
        directory: Arc<IndexDirectory>,
        comparator: C,
        options: IndexOptions,
    ) -> Result<Self> {
        options.validate()?;
        validate_name(name)?;
        if directory.get_record(name)?.is_some() {
            return Err(ArborError::IndexAlreadyExists(name.to_string()));
        }

        Ok(Self::with_root(name, bpm, directory, comparator, options, INVALID_PAGE_ID))
    }

    /// Reattaches to a tree whose root is recorded in the directory. The
    /// options must match the ones the tree was built with.
    pub fn open(
        name: &str,
        bpm: Arc<BufferPoolManager>,
        directory: Arc<IndexDirectory>,
        comparator: C,
        options: IndexOptions,
    ) -> Result<Self> {
        options.validate()?;
        let root = directory
            .get_record(name)?
            .ok_or_else(|| ArborError::IndexNotFound(name.to_string()))?;
        tracing::debug!(name, root_page_id = %root, "opened index");

        Ok(Self::with_root(name, bpm, directory, comparator, options, root))
    }

    fn with_root(
        name: &str,
        bpm: Arc<BufferPoolManager>,
        directory: Arc<IndexDirectory>,
        comparator: C,
        options: IndexOptions,
        root: PageId,
    ) -> Self {
        Self {
            name: name.to_string(),
            bpm,
            directory,
            comparator,
            options,
            root: RwLock::new(root),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    pub fn comparator(&self) -> &C {
        &self.comparator
    }

    /// Root page id, or `INVALID_PAGE_ID` for an empty tree.
    pub fn root_page_id(&self) -> PageId {
        *self.root.read()
    }

    pub fn is_empty(&self) -> bool {
        !self.root_page_id().is_valid()
    }

    /// Point lookup.
    pub fn get_value(&self, key: &[u8]) -> Result<Option<RecordId>> {
        self.check_key(key)?;

        let mut ctl = ConcurrentControl::new(&self.bpm, Mode::Lookup);
        if !self.find_leaf(&mut ctl, Some(key))? {
            return Ok(None);
        }

        let value = match ctl.last() {
            Some(latch) => self.leaf_view(latch.data()).lookup(key, &self.comparator),
            None => None,
        };
        Ok(value)
    }

    /// Inserts a unique key. Returns false, changing nothing, if the key is
    /// already present.
    ///
    /// Fails with `BufferPoolFull` before touching the tree when the pool
    /// cannot supply every page a split needs.
    pub fn insert(&self, key: &[u8], value: RecordId) -> Result<bool> {
        self.check_key(key)?;

        let mut ctl = ConcurrentControl::new(&self.bpm, Mode::Insert);
        if !self.find_leaf(&mut ctl, Some(key))? {
            self.start_new_tree(&mut ctl, key, value)?;
            return Ok(true);
        }

        let leaf_index = ctl.path_len() - 1;
        {
            let guard = ctl.write_at(leaf_index);
            let leaf = self.leaf_view(guard.data());
            if leaf.contains(key, &self.comparator) {
                return Ok(false);
            }
            if leaf.size() < leaf.max_size() {
                self.leaf_view(guard.data_mut())
                    .insert(key, value, &self.comparator);
                return Ok(true);
            }
        }

        // Every held page splits. The top one only absorbs the pushed-up key
        // unless it is the root, which then also needs a new parent.
        let held = ctl.path_len();
        let needed = if ctl.holds_root() { held + 1 } else { held - 1 };
        let reserved = self.reserve_pages(needed)?;
        self.split_and_insert(&mut ctl, key, value, reserved)?;
        Ok(true)
    }

    /// Removes a key. Absent keys are ignored.
    pub fn remove(&self, key: &[u8]) -> Result<()> {
        self.check_key(key)?;

        loop {
            match self.try_remove(key)? {
                RemoveOutcome::Done => return Ok(()),
                RemoveOutcome::Retry => thread::yield_now(),
            }
        }
    }

    /// Iterator over every entry in ascending key order.
    pub fn begin(&self) -> Result<IndexIterator<'_, C>> {
        IndexIterator::seek_to(self, None)
    }

    /// Iterator starting at the first key >= `key`.
    pub fn begin_at(&self, key: &[u8]) -> Result<IndexIterator<'_, C>> {
        self.check_key(key)?;
        IndexIterator::seek_to(self, Some(key))
    }

    /// An exhausted iterator.
    pub fn end(&self) -> IndexIterator<'_, C> {
        IndexIterator::exhausted(self)
    }

    /// Walks the whole tree and checks its structural invariants, returning
    /// its shape. Meant for quiescent trees; panics on the first violation.
    pub fn check_integrity(&self) -> Result<TreeStats> {
        let root_latch = self.root.read();
        let root = *root_latch;
        let mut stats = TreeStats::default();
        if !root.is_valid() {
            return Ok(stats);
        }

        let mut leaves = Vec::new();
        stats.height = self.check_subtree(root, None, None, None, &mut stats, &mut leaves)?;

        for (i, &leaf_id) in leaves.iter().enumerate() {
            let guard = self.fetch_read(leaf_id)?;
            let next = self.leaf_view(guard.data()).next_page_id();
            assert_eq!(
                next,
                leaves.get(i + 1).copied(),
                "leaf chain broken after {}",
                leaf_id
            );
        }

        drop(root_latch);
        Ok(stats)
    }

    pub(crate) fn bpm(&self) -> &BufferPoolManager {
        &self.bpm
    }

    pub(crate) fn leaf_view<T: AsRef<[u8]>>(&self, data: T) -> LeafPage<T> {
        LeafPage::new(data, self.options.key_size)
    }

    fn internal_view<T: AsRef<[u8]>>(&self, data: T) -> InternalPage<T> {
        InternalPage::new(data, self.options.key_size)
    }

    fn node_view<T: AsRef<[u8]>>(&self, data: T) -> BTreePage<T> {
        BTreePage::new(data, self.options.key_size)
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() != self.options.key_size {
            return Err(ArborError::KeySizeMismatch {
                expected: self.options.key_size,
                actual: key.len(),
            });
        }
        Ok(())
    }

    fn fetch_read(&self, page_id: PageId) -> Result<ReadPageGuard> {
        self.bpm
            .fetch_page_read(page_id)?
            .ok_or(ArborError::BufferPoolFull)
    }

    fn fetch_write(&self, page_id: PageId) -> Result<WritePageGuard> {
        self.bpm
            .fetch_page_write(page_id)?
            .ok_or(ArborError::BufferPoolFull)
    }

    /// Whether one more entry fits without a split.
    fn is_insert_safe(&self, data: &[u8]) -> bool {
        match self.node_view(data) {
            BTreePage::Leaf(leaf) => leaf.size() < leaf.max_size(),
            BTreePage::Internal(node) => node.size() < node.max_size() + 1,
        }
    }

    /// Descends to the leaf covering `key` (the leftmost leaf for `None`),
    /// crabbing latches according to the control's mode. Returns false, with
    /// the root latch still held, when the tree is empty.
    pub(crate) fn find_leaf<'a>(
        &'a self,
        ctl: &mut ConcurrentControl<'a>,
        key: Option<&[u8]>,
    ) -> Result<bool> {
        let mut page_id = ctl.latch_root(&self.root);
        if !page_id.is_valid() {
            return Ok(false);
        }

        loop {
            let latch = match ctl.mode() {
                Mode::Lookup => PageLatch::Read(self.fetch_read(page_id)?),
                Mode::Insert | Mode::Delete => PageLatch::Write(self.fetch_write(page_id)?),
            };

            let safe = self.is_insert_safe(latch.data());
            let child = match self.node_view(latch.data()) {
                BTreePage::Leaf(_) => None,
                BTreePage::Internal(node) => Some(match key {
                    Some(key) => node.lookup(key, &self.comparator),
                    None => node.value_at(0),
                }),
            };
            ctl.push(latch, safe);

            match child {
                Some(child) => page_id = child,
                None => return Ok(true),
            }
        }
    }

    /// Records a new root in the directory, registering the tree on first use.
    fn record_root(&self, root: PageId) -> Result<()> {
        match self.directory.update_record(&self.name, root) {
            Err(ArborError::IndexNotFound(_)) => self.directory.insert_record(&self.name, root),
            other => other,
        }
    }

    /// Creates a single-leaf root. Runs under the exclusive root latch, so
    /// only one thread can create the root.
    fn start_new_tree(&self, ctl: &mut ConcurrentControl<'_>, key: &[u8], value: RecordId) -> Result<()> {
        let mut guard = self
            .bpm
            .new_page_write()?
            .ok_or(ArborError::BufferPoolFull)?;
        let page_id = guard.page_id();

        let mut leaf = self.leaf_view(guard.data_mut());
        leaf.init(page_id, None, self.options.leaf_max_size);
        leaf.insert(key, value, &self.comparator);

        if let Err(e) = self.record_root(page_id) {
            self.give_back(guard)?;
            return Err(e);
        }
        ctl.set_root(page_id);
        tracing::debug!(index = %self.name, root_page_id = %page_id, "started new tree");
        Ok(())
    }

    /// Allocates `count` latched pages, giving all of them back if any one
    /// cannot be had.
    fn reserve_pages(&self, count: usize) -> Result<Vec<WritePageGuard>> {
        let mut reserved = Vec::with_capacity(count);
        let mut failure = None;

        for _ in 0..count {
            match self.bpm.new_page_write() {
                Ok(Some(guard)) => reserved.push(guard),
                Ok(None) => {
                    failure = Some(ArborError::BufferPoolFull);
                    break;
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        let Some(error) = failure else {
            return Ok(reserved);
        };

        tracing::debug!(index = %self.name, needed = count, got = reserved.len(), "not enough frames to split");
        for guard in reserved {
            self.give_back(guard)?;
        }
        Err(error)
    }

    /// Deletes a page allocated for a change that did not happen.
    fn give_back(&self, guard: WritePageGuard) -> Result<()> {
        if let Some(page) = self.bpm.discard_page(guard.unlatch())? {
            tracing::warn!(index = %self.name, page_id = %page.page_id(), "unused page still pinned, leaving it allocated");
        }
        Ok(())
    }

    /// Inserts into the full leaf at the bottom of the window and splits
    /// upward through every held page.
    fn split_and_insert(
        &self,
        ctl: &mut ConcurrentControl<'_>,
        key: &[u8],
        value: RecordId,
        reserved: Vec<WritePageGuard>,
    ) -> Result<()> {
        let mut reserved = reserved.into_iter();
        let mut index = ctl.path_len() - 1;

        let mut new_guard = reserved.next().expect("split reserved too few pages");
        let new_id = new_guard.page_id();
        let (left_id, push_key) = {
            let guard = ctl.write_at(index);
            let left_id = guard.page_id();
            let mut leaf = self.leaf_view(guard.data_mut());
            leaf.insert(key, value, &self.comparator);

            let mut right = self.leaf_view(new_guard.data_mut());
            right.init(new_id, leaf.parent_page_id(), leaf.max_size());
            leaf.move_half_to(&mut right);
            right.set_next_page_id(leaf.next_page_id());
            leaf.set_next_page_id(Some(new_id));
            (left_id, right.key_at(0).to_vec())
        };
        ctl.add_extra(new_guard);
        tracing::debug!(index = %self.name, left = %left_id, right = %new_id, "split leaf");

        let mut left_id = left_id;
        let mut right_id = new_id;
        let mut push_key = push_key;

        loop {
            if index == 0 && ctl.holds_root() {
                let mut root_guard = reserved.next().expect("split reserved too few pages");
                let root_id = root_guard.page_id();
                let mut root = self.internal_view(root_guard.data_mut());
                root.init(root_id, None, self.options.internal_max_size);
                root.populate_new_root(left_id, &push_key, right_id);
                ctl.add_extra(root_guard);

                self.reparent(ctl, &[left_id, right_id], root_id)?;
                self.record_root(root_id)?;
                ctl.set_root(root_id);
                tracing::debug!(index = %self.name, root_page_id = %root_id, "grew new root");
                return Ok(());
            }

            index -= 1;
            let (parent_id, moved, sibling_guard) = {
                let guard = ctl.write_at(index);
                let parent_id = guard.page_id();
                let mut parent = self.internal_view(guard.data_mut());
                let size = parent.insert_node_after(left_id, &push_key, right_id);
                if size <= parent.max_size() + 1 {
                    return Ok(());
                }

                let mut sibling_guard = reserved.next().expect("split reserved too few pages");
                let sibling_id = sibling_guard.page_id();
                let mut sibling = self.internal_view(sibling_guard.data_mut());
                sibling.init(sibling_id, parent.parent_page_id(), parent.max_size());
                let moved = parent.move_half_to(&mut sibling);
                push_key = sibling.key_at(0).to_vec();
                (parent_id, moved, sibling_guard)
            };
            let sibling_id = sibling_guard.page_id();
            ctl.add_extra(sibling_guard);
            self.reparent(ctl, &moved, sibling_id)?;
            tracing::debug!(index = %self.name, left = %parent_id, right = %sibling_id, "split internal node");

            left_id = parent_id;
            right_id = sibling_id;
        }
    }

    /// Points each child's parent pointer at `parent`. Held pages are updated
    /// in place; others are rewritten through the pool without taking a
    /// frame, so a split or merge already under way cannot run out of them.
    fn reparent(&self, ctl: &mut ConcurrentControl<'_>, children: &[PageId], parent: PageId) -> Result<()> {
        for &child in children {
            if let Some(guard) = ctl.find_write_mut(child) {
                self.node_view(guard.data_mut()).set_parent_page_id(Some(parent));
                continue;
            }

            self.bpm.modify_page(child, |data| {
                self.node_view(data).set_parent_page_id(Some(parent));
            })?;
            tracing::trace!(page_id = %child, parent = %parent, "re-parented page");
        }
        Ok(())
    }

    fn try_remove(&self, key: &[u8]) -> Result<RemoveOutcome> {
        let mut ctl = ConcurrentControl::new(&self.bpm, Mode::Delete);
        if !self.find_leaf(&mut ctl, Some(key))? {
            return Ok(RemoveOutcome::Done);
        }

        let leaf_index = ctl.path_len() - 1;
        let (leaf_id, size_after, min_size) = {
            let guard = ctl.write_at(leaf_index);
            let leaf = self.leaf_view(guard.data());
            if !leaf.contains(key, &self.comparator) {
                return Ok(RemoveOutcome::Done);
            }
            (guard.page_id(), leaf.size() - 1, leaf.min_size())
        };

        if leaf_index == 0 {
            if size_after == 0 {
                self.record_root(INVALID_PAGE_ID)?;
                ctl.set_root(INVALID_PAGE_ID);
                ctl.defer_delete(leaf_id);
                tracing::debug!(index = %self.name, "tree emptied");
            }
            self.leaf_view(ctl.write_at(0).data_mut())
                .remove_and_delete_record(key, &self.comparator);
            return Ok(RemoveOutcome::Done);
        }

        if size_after >= min_size {
            self.leaf_view(ctl.write_at(leaf_index).data_mut())
                .remove_and_delete_record(key, &self.comparator);
            return Ok(RemoveOutcome::Done);
        }

        // Every sibling the repair will touch is latched before anything
        // changes, so a busy left sibling or a full pool backs out cleanly.
        let Some(leaf_sibling) = self.latch_sibling(&mut ctl, leaf_index, true)? else {
            tracing::trace!(index = %self.name, page_id = %leaf_id, "left sibling busy, retrying delete");
            return Ok(RemoveOutcome::Retry);
        };
        let siblings = self.latch_merge_path(&mut ctl, leaf_index, leaf_sibling)?;

        self.leaf_view(ctl.write_at(leaf_index).data_mut())
            .remove_and_delete_record(key, &self.comparator);

        if !self.fix_leaf(&mut ctl, leaf_index, &siblings[0]) {
            return Ok(RemoveOutcome::Done);
        }

        for (level, index) in (0..leaf_index).rev().enumerate() {
            if index == 0 {
                self.adjust_root(&mut ctl)?;
                break;
            }

            let Some(sibling) = siblings.get(level + 1) else {
                debug_assert!({
                    let node = self.internal_view(ctl.write_at(index).data());
                    node.key_count() >= node.min_size()
                });
                break;
            };
            if !self.fix_internal(&mut ctl, index, sibling)? {
                break;
            }
        }
        Ok(RemoveOutcome::Done)
    }

    /// Walks up from the leaf and latches a sibling for every internal node
    /// that a merge below would leave underfull. Stops at the first level
    /// that borrows instead of merging, or that can spare an entry.
    fn latch_merge_path(
        &self,
        ctl: &mut ConcurrentControl<'_>,
        leaf_index: usize,
        leaf_sibling: Sibling,
    ) -> Result<Vec<Sibling>> {
        let mut merges = {
            let other = self.leaf_view(ctl.extra(leaf_sibling.slot).data());
            other.size() <= other.min_size()
        };
        let mut siblings = vec![leaf_sibling];

        let mut index = leaf_index - 1;
        while merges && index > 0 {
            let underflows = {
                let node = self.internal_view(ctl.write_at(index).data());
                node.key_count() <= node.min_size()
            };
            if !underflows {
                break;
            }

            let Some(sibling) = self.latch_sibling(ctl, index, false)? else {
                unreachable!("internal siblings are latched blocking");
            };
            merges = {
                let other = self.internal_view(ctl.extra(sibling.slot).data());
                other.key_count() <= other.min_size()
            };
            siblings.push(sibling);
            index -= 1;
        }

        Ok(siblings)
    }

    /// Latches the right sibling of the page at `index`, or the left one if
    /// the page is its parent's last child. A left leaf sibling is only
    /// try-latched; `None` means it was busy.
    fn latch_sibling(&self, ctl: &mut ConcurrentControl<'_>, index: usize, leaf: bool) -> Result<Option<Sibling>> {
        let node_id = ctl.write_at(index).page_id();
        let (sibling_id, node_index, is_right) = {
            let parent = self.internal_view(ctl.write_at(index - 1).data());
            let node_index = parent
                .value_index(node_id)
                .unwrap_or_else(|| panic!("page {} is missing from its parent", node_id));
            if node_index + 1 < parent.size() {
                (parent.value_at(node_index + 1), node_index, true)
            } else {
                (parent.value_at(node_index - 1), node_index, false)
            }
        };

        let guard = if leaf && !is_right {
            let pinned = self
                .bpm
                .fetch_page(sibling_id)?
                .ok_or(ArborError::BufferPoolFull)?;
            match pinned.try_write() {
                Ok(guard) => guard,
                Err(_) => return Ok(None),
            }
        } else {
            self.fetch_write(sibling_id)?
        };

        Ok(Some(Sibling {
            slot: ctl.add_extra(guard),
            is_right,
            node_index,
        }))
    }

    /// Repairs an underfull leaf by borrowing from or merging with its
    /// sibling. Returns true if the parent lost an entry.
    fn fix_leaf(&self, ctl: &mut ConcurrentControl<'_>, index: usize, sibling: &Sibling) -> bool {
        let (parent_guard, node_guard, sibling_guard) = ctl.family(index, sibling.slot);
        let mut parent = self.internal_view(parent_guard.data_mut());
        let mut node = self.leaf_view(node_guard.data_mut());
        let mut other = self.leaf_view(sibling_guard.data_mut());

        if other.size() > other.min_size() {
            if sibling.is_right {
                other.move_first_to_end_of(&mut node);
                parent.set_key_at(sibling.node_index + 1, other.key_at(0));
            } else {
                other.move_last_to_front_of(&mut node);
                parent.set_key_at(sibling.node_index, node.key_at(0));
            }
            tracing::debug!(index = %self.name, page_id = %node.page_id(), from = %other.page_id(), "redistributed leaf");
            return false;
        }

        let (removed_index, removed_id, survivor) = if sibling.is_right {
            other.move_all_to(&mut node);
            (sibling.node_index + 1, other.page_id(), node.page_id())
        } else {
            node.move_all_to(&mut other);
            (sibling.node_index, node.page_id(), other.page_id())
        };
        parent.remove(removed_index);
        ctl.defer_delete(removed_id);
        tracing::debug!(index = %self.name, merged = %removed_id, into = %survivor, "merged leaves");
        true
    }

    /// Internal-node counterpart of `fix_leaf`; separators rotate through
    /// the parent and moved children are re-parented.
    fn fix_internal(&self, ctl: &mut ConcurrentControl<'_>, index: usize, sibling: &Sibling) -> Result<bool> {
        let (parent_guard, node_guard, sibling_guard) = ctl.family(index, sibling.slot);
        let mut parent = self.internal_view(parent_guard.data_mut());
        let mut node = self.internal_view(node_guard.data_mut());
        let mut other = self.internal_view(sibling_guard.data_mut());
        let node_id = node.page_id();
        let other_id = other.page_id();

        if other.key_count() > other.min_size() {
            let moved = if sibling.is_right {
                let separator = sibling.node_index + 1;
                let middle = parent.key_at(separator).to_vec();
                let moved = other.move_first_to_end_of(&mut node, &middle);
                parent.set_key_at(separator, other.key_at(0));
                moved
            } else {
                let separator = sibling.node_index;
                let middle = parent.key_at(separator).to_vec();
                let moved = other.move_last_to_front_of(&mut node, &middle);
                parent.set_key_at(separator, node.key_at(0));
                moved
            };
            self.reparent(ctl, &[moved], node_id)?;
            tracing::debug!(index = %self.name, page_id = %node_id, from = %other_id, "redistributed internal node");
            return Ok(false);
        }

        let (removed_index, removed_id, survivor, moved) = if sibling.is_right {
            let separator = sibling.node_index + 1;
            let middle = parent.key_at(separator).to_vec();
            let moved = other.move_all_to(&mut node, &middle);
            (separator, other_id, node_id, moved)
        } else {
            let separator = sibling.node_index;
            let middle = parent.key_at(separator).to_vec();
            let moved = node.move_all_to(&mut other, &middle);
            (separator, node_id, other_id, moved)
        };
        parent.remove(removed_index);
        ctl.defer_delete(removed_id);
        self.reparent(ctl, &moved, survivor)?;
        tracing::debug!(index = %self.name, merged = %removed_id, into = %survivor, "merged internal nodes");
        Ok(true)
    }

    /// Collapses an internal root that is down to a single child.
    fn adjust_root(&self, ctl: &mut ConcurrentControl<'_>) -> Result<()> {
        let (root_id, only_child) = {
            let guard = ctl.write_at(0);
            match self.node_view(guard.data()) {
                BTreePage::Internal(root) if root.size() == 1 => (guard.page_id(), root.value_at(0)),
                _ => return Ok(()),
            }
        };

        self.record_root(only_child)?;
        self.internal_view(ctl.write_at(0).data_mut())
            .remove_and_return_only_child();
        match ctl.find_write_mut(only_child) {
            Some(guard) => self.node_view(guard.data_mut()).set_parent_page_id(None),
            None => panic!("promoted child {} is not latched", only_child),
        }
        ctl.set_root(only_child);
        ctl.defer_delete(root_id);
        tracing::debug!(index = %self.name, root_page_id = %only_child, "collapsed root");
        Ok(())
    }

    /// Checks one subtree and returns its height.
    fn check_subtree(
        &self,
        page_id: PageId,
        parent: Option<PageId>,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        stats: &mut TreeStats,
        leaves: &mut Vec<PageId>,
    ) -> Result<usize> {
        let guard = self.fetch_read(page_id)?;
        let page = self.node_view(guard.data());
        assert_eq!(page.page_id(), page_id, "page {} has a wrong self id", page_id);
        assert_eq!(page.parent_page_id(), parent, "page {} has a stale parent pointer", page_id);
        let is_root = parent.is_none();

        let in_bounds = |key: &[u8]| {
            lower.map_or(true, |lower| self.comparator.compare(lower, key) != Ordering::Greater)
                && upper.map_or(true, |upper| self.comparator.compare(key, upper) == Ordering::Less)
        };

        let children = match page {
            BTreePage::Leaf(leaf) => {
                assert!(leaf.size() <= leaf.max_size(), "leaf {} overflows", page_id);
                if is_root {
                    assert!(leaf.size() > 0, "root leaf {} is empty", page_id);
                } else {
                    assert!(leaf.size() >= leaf.min_size(), "leaf {} is underfull", page_id);
                }
                for i in 0..leaf.size() {
                    assert!(in_bounds(leaf.key_at(i)), "leaf {} key {} escapes its separators", page_id, i);
                    if i > 0 {
                        assert_eq!(
                            self.comparator.compare(leaf.key_at(i - 1), leaf.key_at(i)),
                            Ordering::Less,
                            "leaf {} keys out of order at {}",
                            page_id,
                            i
                        );
                    }
                }
                stats.num_leaves += 1;
                stats.num_keys += leaf.size();
                leaves.push(page_id);
                return Ok(1);
            }
            BTreePage::Internal(node) => {
                assert!(node.size() <= node.max_size() + 1, "internal {} overflows", page_id);
                if is_root {
                    assert!(node.size() >= 2, "internal root {} has a single child", page_id);
                } else {
                    assert!(node.key_count() >= node.min_size(), "internal {} is underfull", page_id);
                }
                for i in 1..node.size() {
                    assert!(in_bounds(node.key_at(i)), "internal {} key {} escapes its separators", page_id, i);
                    if i > 1 {
                        assert_eq!(
                            self.comparator.compare(node.key_at(i - 1), node.key_at(i)),
                            Ordering::Less,
                            "internal {} keys out of order at {}",
                            page_id,
                            i
                        );
                    }
                }
                stats.num_internal += 1;

                (0..node.size())
                    .map(|i| {
                        let low = if i == 0 { lower.map(<[u8]>::to_vec) } else { Some(node.key_at(i).to_vec()) };
                        let high = if i + 1 < node.size() {
                            Some(node.key_at(i + 1).to_vec())
                        } else {
                            upper.map(<[u8]>::to_vec)
                        };
                        (node.value_at(i), low, high)
                    })
                    .collect::<Vec<_>>()
            }
        };
        drop(guard);

        let mut height = None;
        for (child, low, high) in children {
            let child_height =
                self.check_subtree(child, Some(page_id), low.as_deref(), high.as_deref(), stats, leaves)?;
            match height {
                None => height = Some(child_height),
                Some(h) => assert_eq!(h, child_height, "subtrees under {} differ in depth", page_id),
            }
        }
        Ok(height.unwrap_or(0) + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::SlotId;
    use crate::index::{integer_key, IntegerComparator};
    use crate::storage::disk::{MemoryPageStore, PageStore};

    fn rid(n: i64) -> RecordId {
        RecordId::new(PageId::new(n as u32), SlotId::new((n % 1000) as u16))
    }

    fn small_tree(pool_size: usize, leaf: usize, internal: usize) -> BPlusTree<IntegerComparator> {
        let bpm = Arc::new(BufferPoolManager::new(pool_size, Arc::new(MemoryPageStore::new())));
        let directory = Arc::new(IndexDirectory::open(Arc::clone(&bpm)).unwrap());
        let options = IndexOptions::default().with_capacities(leaf, internal);
        BPlusTree::new("test", bpm, directory, IntegerComparator, options).unwrap()
    }

    #[test]
    fn test_first_insert_creates_root_leaf() {
        let tree = small_tree(16, 3, 3);
        assert!(tree.is_empty());
        assert!(tree.insert(&integer_key(1), rid(1)).unwrap());

        let root = tree.root_page_id();
        assert!(root.is_valid());
        assert_eq!(tree.directory.get_record("test").unwrap(), Some(root));
        assert_eq!(tree.get_value(&integer_key(1)).unwrap(), Some(rid(1)));
    }

    #[test]
    fn test_leaf_split_grows_root() {
        let tree = small_tree(16, 3, 3);
        for k in 1..=4 {
            tree.insert(&integer_key(k), rid(k)).unwrap();
        }

        let stats = tree.check_integrity().unwrap();
        assert_eq!(stats.height, 2);
        assert_eq!(stats.num_leaves, 2);
        assert_eq!(stats.num_internal, 1);
        assert_eq!(stats.num_keys, 4);
        assert_eq!(tree.directory.get_record("test").unwrap(), Some(tree.root_page_id()));
    }

    #[test]
    fn test_duplicate_insert_leaves_page_unchanged() {
        let tree = small_tree(16, 3, 3);
        tree.insert(&integer_key(7), rid(7)).unwrap();
        let root = tree.root_page_id();
        let before = tree.bpm.fetch_page_read(root).unwrap().unwrap().data().to_vec();

        assert!(!tree.insert(&integer_key(7), rid(99)).unwrap());

        let after = tree.bpm.fetch_page_read(root).unwrap().unwrap().data().to_vec();
        assert_eq!(before, after);
        assert_eq!(tree.get_value(&integer_key(7)).unwrap(), Some(rid(7)));
    }

    #[test]
    fn test_wrong_key_width_is_rejected() {
        let tree = small_tree(16, 3, 3);
        assert!(matches!(
            tree.insert(&[1, 2, 3], rid(1)),
            Err(ArborError::KeySizeMismatch { expected: 8, actual: 3 })
        ));
        assert!(tree.get_value(&[0u8; 9]).is_err());
    }

    #[test]
    fn test_remove_merges_back_to_empty() {
        let tree = small_tree(32, 3, 3);
        for k in 0..40 {
            tree.insert(&integer_key(k), rid(k)).unwrap();
        }
        assert!(tree.check_integrity().unwrap().height >= 3);

        for k in (0..40).rev() {
            tree.remove(&integer_key(k)).unwrap();
            let stats = tree.check_integrity().unwrap();
            assert_eq!(stats.num_keys, k as usize);
        }

        assert!(tree.is_empty());
        assert_eq!(tree.directory.get_record("test").unwrap(), Some(INVALID_PAGE_ID));
    }

    #[test]
    fn test_split_fails_cleanly_when_pool_is_exhausted() {
        // Header page, root leaf, and nothing else
        let tree = small_tree(2, 2, 2);
        tree.insert(&integer_key(1), rid(1)).unwrap();
        tree.insert(&integer_key(2), rid(2)).unwrap();

        assert!(matches!(
            tree.insert(&integer_key(3), rid(3)),
            Err(ArborError::BufferPoolFull)
        ));
        assert_eq!(tree.bpm.store().num_pages(), 2);

        let stats = tree.check_integrity().unwrap();
        assert_eq!(stats.num_keys, 2);
        assert_eq!(tree.get_value(&integer_key(3)).unwrap(), None);
    }

    #[test]
    fn test_create_and_open_by_name() {
        let tree = small_tree(16, 3, 3);
        tree.insert(&integer_key(5), rid(5)).unwrap();

        let bpm = Arc::clone(&tree.bpm);
        let directory = Arc::clone(&tree.directory);
        let options = *tree.options();
        assert!(matches!(
            BPlusTree::new("test", Arc::clone(&bpm), Arc::clone(&directory), IntegerComparator, options),
            Err(ArborError::IndexAlreadyExists(_))
        ));
        assert!(matches!(
            BPlusTree::open("missing", Arc::clone(&bpm), Arc::clone(&directory), IntegerComparator, options),
            Err(ArborError::IndexNotFound(_))
        ));

        let reopened = BPlusTree::open("test", bpm, directory, IntegerComparator, options).unwrap();
        assert_eq!(reopened.get_value(&integer_key(5)).unwrap(), Some(rid(5)));
    }
}
