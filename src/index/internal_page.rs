use std::cmp::Ordering;

use crate::common::{PageId, PAGE_SIZE};

use super::btree_page::{read_u32, write_u32, BTreeNode, BTreeNodeMut, PageKind, NODE_HEADER_SIZE};
use super::KeyComparator;

const SLOTS_OFFSET: usize = NODE_HEADER_SIZE;
const CHILD_SIZE: usize = 4;

/// View of an internal page: header followed by `(key, child)` slots.
///
/// Slot 0 carries only a child; its key bytes are unused. For `i >= 1`,
/// every key in child `i` is >= `key_at(i)` and every key in child `i - 1`
/// is < `key_at(i)`. `max_size` counts separator keys, so a node holds at
/// most `max_size + 1` children at rest and `max_size + 2` just before a
/// split.
pub struct InternalPage<T> {
    data: T,
    key_size: usize,
}

impl<T> InternalPage<T> {
    pub fn slot_size(key_size: usize) -> usize {
        key_size + CHILD_SIZE
    }

    pub fn slot_capacity(key_size: usize) -> usize {
        (PAGE_SIZE - SLOTS_OFFSET) / Self::slot_size(key_size)
    }

    fn slot_offset(&self, index: usize) -> usize {
        SLOTS_OFFSET + index * Self::slot_size(self.key_size)
    }
}

impl<T: AsRef<[u8]>> BTreeNode for InternalPage<T> {
    fn bytes(&self) -> &[u8] {
        self.data.as_ref()
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> BTreeNodeMut for InternalPage<T> {
    fn bytes_mut(&mut self) -> &mut [u8] {
        self.data.as_mut()
    }
}

impl<T: AsRef<[u8]>> InternalPage<T> {
    pub fn new(data: T, key_size: usize) -> Self {
        assert_eq!(data.as_ref().len(), PAGE_SIZE);
        Self { data, key_size }
    }

    /// Fewest separator keys a non-root internal node holds at rest.
    pub fn min_size(&self) -> usize {
        self.max_size() / 2
    }

    /// Number of separator keys (children minus one).
    pub fn key_count(&self) -> usize {
        self.size().saturating_sub(1)
    }

    pub fn key_at(&self, index: usize) -> &[u8] {
        assert!(
            index < self.size(),
            "internal key index {} out of range (size {})",
            index,
            self.size()
        );
        let offset = self.slot_offset(index);
        &self.bytes()[offset..offset + self.key_size]
    }

    pub fn value_at(&self, index: usize) -> PageId {
        assert!(
            index < self.size(),
            "internal child index {} out of range (size {})",
            index,
            self.size()
        );
        PageId::new(read_u32(self.bytes(), self.slot_offset(index) + self.key_size))
    }

    /// Position of `child` among this node's children.
    pub fn value_index(&self, child: PageId) -> Option<usize> {
        (0..self.size()).find(|&i| self.value_at(i) == child)
    }

    pub fn children(&self) -> Vec<PageId> {
        (0..self.size()).map(|i| self.value_at(i)).collect()
    }

    /// Index of the child whose range covers `key`: the last `i >= 1` with
    /// `key_at(i) <= key`, or 0 when `key` is below every separator.
    pub fn lookup_index<C: KeyComparator + ?Sized>(&self, key: &[u8], comparator: &C) -> usize {
        let mut left = 1;
        let mut right = self.size();

        while left < right {
            let mid = left + (right - left) / 2;
            if comparator.compare(self.key_at(mid), key) == Ordering::Greater {
                right = mid;
            } else {
                left = mid + 1;
            }
        }

        left - 1
    }

    pub fn lookup<C: KeyComparator + ?Sized>(&self, key: &[u8], comparator: &C) -> PageId {
        self.value_at(self.lookup_index(key, comparator))
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> InternalPage<T> {
    pub fn init(&mut self, page_id: PageId, parent: Option<PageId>, max_size: usize) {
        assert!(
            max_size + 2 <= Self::slot_capacity(self.key_size),
            "internal capacity {} leaves no room for the overflow slot",
            max_size
        );
        self.init_header(PageKind::Internal, page_id, parent, max_size);
    }

    pub fn set_key_at(&mut self, index: usize, key: &[u8]) {
        assert_eq!(key.len(), self.key_size);
        let offset = self.slot_offset(index);
        let key_size = self.key_size;
        self.bytes_mut()[offset..offset + key_size].copy_from_slice(key);
    }

    pub fn set_value_at(&mut self, index: usize, child: PageId) {
        let offset = self.slot_offset(index) + self.key_size;
        write_u32(self.bytes_mut(), offset, child.as_u32());
    }

    fn shift_right(&mut self, from: usize) {
        let start = self.slot_offset(from);
        let end = self.slot_offset(self.size());
        let slot = Self::slot_size(self.key_size);
        self.bytes_mut().copy_within(start..end, start + slot);
    }

    fn shift_left(&mut self, from: usize) {
        let start = self.slot_offset(from + 1);
        let end = self.slot_offset(self.size());
        let slot = Self::slot_size(self.key_size);
        self.bytes_mut().copy_within(start..end, start - slot);
    }

    /// Turns an empty page into a root with two children split by `key`.
    pub fn populate_new_root(&mut self, left: PageId, key: &[u8], right: PageId) {
        self.set_value_at(0, left);
        self.set_key_at(1, key);
        self.set_value_at(1, right);
        self.set_size(2);
    }

    /// Inserts `(key, new_child)` right after `old_child` and returns the new
    /// size. The node may reach `max_size + 2` entries, after which it must
    /// be split.
    pub fn insert_node_after(&mut self, old_child: PageId, key: &[u8], new_child: PageId) -> usize {
        let size = self.size();
        assert!(
            size <= self.max_size() + 1,
            "internal {} holds {} entries and must be split before inserting",
            self.page_id(),
            size
        );
        let index = self
            .value_index(old_child)
            .unwrap_or_else(|| panic!("page {} is not a child of {}", old_child, self.page_id()))
            + 1;

        self.shift_right(index);
        self.set_key_at(index, key);
        self.set_value_at(index, new_child);
        self.set_size(size + 1);
        size + 1
    }

    /// Removes the entry at `index`.
    pub fn remove(&mut self, index: usize) {
        assert!(index < self.size());
        self.shift_left(index);
        self.set_size(self.size() - 1);
    }

    /// Empties a single-child node and returns that child.
    pub fn remove_and_return_only_child(&mut self) -> PageId {
        assert_eq!(self.size(), 1, "internal {} has more than one child", self.page_id());
        let child = self.value_at(0);
        self.set_size(0);
        child
    }

    fn copy_n_from(&mut self, slots: &[u8], count: usize) {
        let size = self.size();
        assert!(
            size + count <= self.max_size() + 2,
            "internal {} cannot take {} more entries",
            self.page_id(),
            count
        );
        let start = self.slot_offset(size);
        self.bytes_mut()[start..start + slots.len()].copy_from_slice(slots);
        self.set_size(size + count);
    }

    /// Moves the upper half of an overflowing node into an empty `recipient`
    /// and returns the children that changed parent. `recipient.key_at(0)`
    /// afterwards holds the separator to push into the parent.
    pub fn move_half_to<U: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        recipient: &mut InternalPage<U>,
    ) -> Vec<PageId> {
        let size = self.size();
        assert_eq!(
            size,
            self.max_size() + 2,
            "internal {} split before reaching its split size",
            self.page_id()
        );

        let keep = size - size / 2;
        let start = self.slot_offset(keep);
        let end = self.slot_offset(size);
        recipient.copy_n_from(&self.bytes()[start..end], size / 2);
        self.set_size(keep);
        recipient.children()
    }

    /// Appends every entry to `recipient`, pulling `middle_key` (the parent's
    /// separator for this node) down as the key of the first moved child.
    pub fn move_all_to<U: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        recipient: &mut InternalPage<U>,
        middle_key: &[u8],
    ) -> Vec<PageId> {
        self.set_key_at(0, middle_key);
        let moved = self.children();
        let size = self.size();
        let end = self.slot_offset(size);
        recipient.copy_n_from(&self.bytes()[SLOTS_OFFSET..end], size);
        self.set_size(0);
        moved
    }

    /// Moves the first child to the end of `recipient` under `middle_key`.
    /// Afterwards `self.key_at(0)` holds this node's new parent separator.
    pub fn move_first_to_end_of<U: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        recipient: &mut InternalPage<U>,
        middle_key: &[u8],
    ) -> PageId {
        let child = self.value_at(0);
        self.shift_left(0);
        self.set_size(self.size() - 1);

        let size = recipient.size();
        recipient.set_size(size + 1);
        recipient.set_key_at(size, middle_key);
        recipient.set_value_at(size, child);
        child
    }

    /// Moves the last child to the front of `recipient`, whose old first
    /// child takes `middle_key`. Afterwards `recipient.key_at(0)` holds the
    /// recipient's new parent separator.
    pub fn move_last_to_front_of<U: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        recipient: &mut InternalPage<U>,
        middle_key: &[u8],
    ) -> PageId {
        let last = self.size() - 1;
        let key = self.key_at(last).to_vec();
        let child = self.value_at(last);
        self.set_size(last);

        recipient.set_key_at(0, middle_key);
        recipient.shift_right(0);
        recipient.set_key_at(0, &key);
        recipient.set_value_at(0, child);
        recipient.set_size(recipient.size() + 1);
        child
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{integer_key, IntegerComparator};

    fn page(n: u32) -> PageId {
        PageId::new(n)
    }

    /// Builds a node with children 100, 101, ... separated by `keys`.
    fn internal_with<'a>(data: &'a mut [u8], keys: &[i64], max_size: usize) -> InternalPage<&'a mut [u8]> {
        let mut node = InternalPage::new(data, 8);
        node.init(page(1), None, max_size);
        node.populate_new_root(page(100), &integer_key(keys[0]), page(101));
        for (i, &k) in keys.iter().enumerate().skip(1) {
            node.insert_node_after(page(100 + i as u32), &integer_key(k), page(101 + i as u32));
        }
        node
    }

    fn separators<T: AsRef<[u8]>>(node: &InternalPage<T>) -> Vec<i64> {
        (1..node.size())
            .map(|i| i64::from_le_bytes(node.key_at(i).try_into().unwrap()))
            .collect()
    }

    #[test]
    fn test_internal_lookup() {
        let mut data = [0u8; PAGE_SIZE];
        let node = internal_with(&mut data, &[10, 20, 30], 4);
        let cmp = IntegerComparator;

        assert_eq!(node.lookup(&integer_key(5), &cmp), page(100));
        assert_eq!(node.lookup(&integer_key(10), &cmp), page(101));
        assert_eq!(node.lookup(&integer_key(25), &cmp), page(102));
        assert_eq!(node.lookup(&integer_key(30), &cmp), page(103));
        assert_eq!(node.lookup(&integer_key(99), &cmp), page(103));
        assert_eq!(node.value_index(page(102)), Some(2));
        assert_eq!(node.value_index(page(7)), None);
    }

    #[test]
    fn test_internal_insert_after_and_remove() {
        let mut data = [0u8; PAGE_SIZE];
        let mut node = internal_with(&mut data, &[10, 30], 4);
        node.insert_node_after(page(101), &integer_key(20), page(200));

        assert_eq!(separators(&node), vec![10, 20, 30]);
        assert_eq!(node.children(), vec![page(100), page(101), page(200), page(102)]);

        node.remove(2);
        assert_eq!(separators(&node), vec![10, 30]);
        assert_eq!(node.children(), vec![page(100), page(101), page(102)]);
    }

    #[test]
    fn test_internal_move_half_to() {
        let mut left_data = [0u8; PAGE_SIZE];
        let mut right_data = [0u8; PAGE_SIZE];
        let mut left = internal_with(&mut left_data, &[10, 20, 30, 40, 50], 4);
        let mut right = InternalPage::new(&mut right_data[..], 8);
        right.init(page(2), None, 4);

        let moved = left.move_half_to(&mut right);
        assert_eq!(left.size(), 3);
        assert_eq!(separators(&left), vec![10, 20]);
        assert_eq!(right.key_at(0), &integer_key(30));
        assert_eq!(separators(&right), vec![40, 50]);
        assert_eq!(moved, vec![page(103), page(104), page(105)]);
    }

    #[test]
    fn test_internal_redistribute_pulls_separator_through_parent() {
        let mut left_data = [0u8; PAGE_SIZE];
        let mut right_data = [0u8; PAGE_SIZE];
        let mut left = internal_with(&mut left_data, &[10, 20, 30], 4);
        let mut right = InternalPage::new(&mut right_data[..], 8);
        right.init(page(2), None, 4);
        right.populate_new_root(page(300), &integer_key(60), page(301));

        // Parent separator between the two nodes is 50
        let moved = left.move_last_to_front_of(&mut right, &integer_key(50));
        assert_eq!(moved, page(103));
        assert_eq!(right.key_at(0), &integer_key(30));
        assert_eq!(separators(&right), vec![50, 60]);
        assert_eq!(separators(&left), vec![10, 20]);

        let moved = right.move_first_to_end_of(&mut left, &integer_key(30));
        assert_eq!(moved, page(103));
        assert_eq!(separators(&left), vec![10, 20, 30]);
        assert_eq!(right.key_at(0), &integer_key(50));
    }

    #[test]
    fn test_internal_merge_and_collapse() {
        let mut left_data = [0u8; PAGE_SIZE];
        let mut right_data = [0u8; PAGE_SIZE];
        let mut left = internal_with(&mut left_data, &[10], 4);
        let mut right = InternalPage::new(&mut right_data[..], 8);
        right.init(page(2), None, 4);
        right.populate_new_root(page(300), &integer_key(60), page(301));

        let moved = right.move_all_to(&mut left, &integer_key(50));
        assert_eq!(moved, vec![page(300), page(301)]);
        assert_eq!(separators(&left), vec![10, 50, 60]);
        assert_eq!(right.size(), 0);

        let mut data = [0u8; PAGE_SIZE];
        let mut root = InternalPage::new(&mut data[..], 8);
        root.init(page(3), None, 4);
        root.set_value_at(0, page(77));
        root.set_size(1);
        assert_eq!(root.remove_and_return_only_child(), page(77));
        assert_eq!(root.size(), 0);
    }
}
