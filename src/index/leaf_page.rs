use std::cmp::Ordering;

use crate::common::{PageId, RecordId, PAGE_SIZE};

use super::btree_page::{read_u32, write_u32, BTreeNode, BTreeNodeMut, PageKind, NODE_HEADER_SIZE};
use super::KeyComparator;

const NEXT_PAGE_OFFSET: usize = NODE_HEADER_SIZE;
const SLOTS_OFFSET: usize = NODE_HEADER_SIZE + 4;

/// View of a leaf page: header, next-leaf page id, then sorted
/// `(key, RecordId)` slots.
pub struct LeafPage<T> {
    data: T,
    key_size: usize,
}

impl<T> LeafPage<T> {
    /// Width of one `(key, RecordId)` slot.
    pub fn slot_size(key_size: usize) -> usize {
        key_size + RecordId::ENCODED_SIZE
    }

    /// Number of slots that physically fit in a page.
    pub fn slot_capacity(key_size: usize) -> usize {
        (PAGE_SIZE - SLOTS_OFFSET) / Self::slot_size(key_size)
    }

    fn slot_offset(&self, index: usize) -> usize {
        SLOTS_OFFSET + index * Self::slot_size(self.key_size)
    }
}

impl<T: AsRef<[u8]>> BTreeNode for LeafPage<T> {
    fn bytes(&self) -> &[u8] {
        self.data.as_ref()
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> BTreeNodeMut for LeafPage<T> {
    fn bytes_mut(&mut self) -> &mut [u8] {
        self.data.as_mut()
    }
}

impl<T: AsRef<[u8]>> LeafPage<T> {
    pub fn new(data: T, key_size: usize) -> Self {
        assert_eq!(data.as_ref().len(), PAGE_SIZE);
        Self { data, key_size }
    }

    /// Fewest entries a non-root leaf holds at rest.
    pub fn min_size(&self) -> usize {
        self.max_size() / 2
    }

    pub fn next_page_id(&self) -> Option<PageId> {
        PageId::from_raw(read_u32(self.bytes(), NEXT_PAGE_OFFSET))
    }

    pub fn key_at(&self, index: usize) -> &[u8] {
        assert!(
            index < self.size(),
            "leaf key index {} out of range (size {})",
            index,
            self.size()
        );
        let offset = self.slot_offset(index);
        &self.bytes()[offset..offset + self.key_size]
    }

    pub fn value_at(&self, index: usize) -> RecordId {
        assert!(
            index < self.size(),
            "leaf value index {} out of range (size {})",
            index,
            self.size()
        );
        let offset = self.slot_offset(index) + self.key_size;
        RecordId::decode(&self.bytes()[offset..offset + RecordId::ENCODED_SIZE])
    }

    /// First index whose key is >= `key`; `size()` if there is none.
    pub fn key_index<C: KeyComparator + ?Sized>(&self, key: &[u8], comparator: &C) -> usize {
        let mut left = 0;
        let mut right = self.size();

        while left < right {
            let mid = left + (right - left) / 2;
            if comparator.compare(self.key_at(mid), key) == Ordering::Less {
                left = mid + 1;
            } else {
                right = mid;
            }
        }

        left
    }

    fn find<C: KeyComparator + ?Sized>(&self, key: &[u8], comparator: &C) -> Option<usize> {
        let index = self.key_index(key, comparator);
        (index < self.size() && comparator.compare(self.key_at(index), key) == Ordering::Equal)
            .then_some(index)
    }

    pub fn lookup<C: KeyComparator + ?Sized>(&self, key: &[u8], comparator: &C) -> Option<RecordId> {
        self.find(key, comparator).map(|index| self.value_at(index))
    }

    pub fn contains<C: KeyComparator + ?Sized>(&self, key: &[u8], comparator: &C) -> bool {
        self.find(key, comparator).is_some()
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> LeafPage<T> {
    pub fn init(&mut self, page_id: PageId, parent: Option<PageId>, max_size: usize) {
        assert!(
            max_size < Self::slot_capacity(self.key_size),
            "leaf capacity {} leaves no room for the overflow slot",
            max_size
        );
        self.init_header(PageKind::Leaf, page_id, parent, max_size);
        self.set_next_page_id(None);
    }

    pub fn set_next_page_id(&mut self, next: Option<PageId>) {
        write_u32(self.bytes_mut(), NEXT_PAGE_OFFSET, PageId::to_raw(next));
    }

    fn write_slot(&mut self, index: usize, key: &[u8], value: RecordId) {
        assert_eq!(key.len(), self.key_size);
        let offset = self.slot_offset(index);
        let key_size = self.key_size;
        let data = self.bytes_mut();
        data[offset..offset + key_size].copy_from_slice(key);
        value.encode(&mut data[offset + key_size..offset + key_size + RecordId::ENCODED_SIZE]);
    }

    /// Shifts slots `from..size` one slot to the right.
    fn shift_right(&mut self, from: usize) {
        let start = self.slot_offset(from);
        let end = self.slot_offset(self.size());
        let slot = Self::slot_size(self.key_size);
        self.bytes_mut().copy_within(start..end, start + slot);
    }

    /// Shifts slots `from + 1..size` one slot to the left over `from`.
    fn shift_left(&mut self, from: usize) {
        let start = self.slot_offset(from + 1);
        let end = self.slot_offset(self.size());
        let slot = Self::slot_size(self.key_size);
        self.bytes_mut().copy_within(start..end, start - slot);
    }

    /// Inserts in key order and returns the new size. The key must not be
    /// present. A leaf may reach `max_size + 1` entries, after which it must
    /// be split before the next insert.
    pub fn insert<C: KeyComparator + ?Sized>(
        &mut self,
        key: &[u8],
        value: RecordId,
        comparator: &C,
    ) -> usize {
        let size = self.size();
        assert!(
            size <= self.max_size(),
            "leaf {} holds {} entries and must be split before inserting",
            self.page_id(),
            size
        );

        let index = self.key_index(key, comparator);
        self.shift_right(index);
        self.write_slot(index, key, value);
        self.set_size(size + 1);
        size + 1
    }

    /// Removes `key` if present and returns the resulting size.
    pub fn remove_and_delete_record<C: KeyComparator + ?Sized>(
        &mut self,
        key: &[u8],
        comparator: &C,
    ) -> usize {
        if let Some(index) = self.find(key, comparator) {
            self.shift_left(index);
            self.set_size(self.size() - 1);
        }
        self.size()
    }

    /// Appends `count` raw slots to the end of this page.
    fn copy_n_from(&mut self, slots: &[u8], count: usize) {
        let size = self.size();
        assert!(
            size + count <= self.max_size() + 1,
            "leaf {} cannot take {} more entries",
            self.page_id(),
            count
        );
        let start = self.slot_offset(size);
        self.bytes_mut()[start..start + slots.len()].copy_from_slice(slots);
        self.set_size(size + count);
    }

    /// Moves the upper half of an overflowing leaf into an empty `recipient`.
    /// This page keeps `size - size / 2` entries.
    pub fn move_half_to<U: AsRef<[u8]> + AsMut<[u8]>>(&mut self, recipient: &mut LeafPage<U>) {
        let size = self.size();
        assert_eq!(
            size,
            self.max_size() + 1,
            "leaf {} split before reaching its split size",
            self.page_id()
        );

        let keep = size - size / 2;
        let start = self.slot_offset(keep);
        let end = self.slot_offset(size);
        recipient.copy_n_from(&self.bytes()[start..end], size / 2);
        self.set_size(keep);
    }

    /// Moves every entry to the end of `recipient`, which inherits this
    /// page's next-leaf link.
    pub fn move_all_to<U: AsRef<[u8]> + AsMut<[u8]>>(&mut self, recipient: &mut LeafPage<U>) {
        let size = self.size();
        let end = self.slot_offset(size);
        recipient.copy_n_from(&self.bytes()[SLOTS_OFFSET..end], size);
        recipient.set_next_page_id(self.next_page_id());
        self.set_size(0);
    }

    /// Moves the first entry to the end of `recipient`.
    pub fn move_first_to_end_of<U: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        recipient: &mut LeafPage<U>,
    ) {
        let key = self.key_at(0).to_vec();
        let value = self.value_at(0);
        self.shift_left(0);
        self.set_size(self.size() - 1);

        let size = recipient.size();
        recipient.write_slot(size, &key, value);
        recipient.set_size(size + 1);
    }

    /// Moves the last entry to the front of `recipient`.
    pub fn move_last_to_front_of<U: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        recipient: &mut LeafPage<U>,
    ) {
        let last = self.size() - 1;
        let key = self.key_at(last).to_vec();
        let value = self.value_at(last);
        self.set_size(last);

        recipient.shift_right(0);
        recipient.write_slot(0, &key, value);
        recipient.set_size(recipient.size() + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::SlotId;
    use crate::index::{integer_key, IntegerComparator};

    fn rid(n: u32) -> RecordId {
        RecordId::new(PageId::new(n), SlotId::new(n as u16))
    }

    fn leaf_with<'a>(data: &'a mut [u8], keys: &[i64], max_size: usize) -> LeafPage<&'a mut [u8]> {
        let mut leaf = LeafPage::new(data, 8);
        leaf.init(PageId::new(1), None, max_size);
        for &k in keys {
            leaf.insert(&integer_key(k), rid(k as u32), &IntegerComparator);
        }
        leaf
    }

    fn keys_of<T: AsRef<[u8]>>(leaf: &LeafPage<T>) -> Vec<i64> {
        (0..leaf.size())
            .map(|i| i64::from_le_bytes(leaf.key_at(i).try_into().unwrap()))
            .collect()
    }

    #[test]
    fn test_leaf_insert_keeps_order() {
        let mut data = [0u8; PAGE_SIZE];
        let leaf = leaf_with(&mut data, &[30, 10, 20, -5], 8);

        assert_eq!(keys_of(&leaf), vec![-5, 10, 20, 30]);
        assert_eq!(leaf.lookup(&integer_key(20), &IntegerComparator), Some(rid(20)));
        assert_eq!(leaf.lookup(&integer_key(25), &IntegerComparator), None);
        assert_eq!(leaf.key_index(&integer_key(25), &IntegerComparator), 3);
        assert_eq!(leaf.key_index(&integer_key(99), &IntegerComparator), 4);
    }

    #[test]
    fn test_leaf_remove() {
        let mut data = [0u8; PAGE_SIZE];
        let mut leaf = leaf_with(&mut data, &[1, 2, 3], 8);

        assert_eq!(leaf.remove_and_delete_record(&integer_key(2), &IntegerComparator), 2);
        assert_eq!(leaf.remove_and_delete_record(&integer_key(2), &IntegerComparator), 2);
        assert_eq!(keys_of(&leaf), vec![1, 3]);
        assert_eq!(leaf.value_at(1), rid(3));
    }

    #[test]
    fn test_leaf_move_half_to() {
        let mut left_data = [0u8; PAGE_SIZE];
        let mut right_data = [0u8; PAGE_SIZE];
        let mut left = leaf_with(&mut left_data, &[1, 2, 3, 4, 5], 4);
        let mut right = LeafPage::new(&mut right_data[..], 8);
        right.init(PageId::new(2), None, 4);

        left.move_half_to(&mut right);
        assert_eq!(keys_of(&left), vec![1, 2, 3]);
        assert_eq!(keys_of(&right), vec![4, 5]);
        assert_eq!(right.value_at(0), rid(4));
    }

    #[test]
    fn test_leaf_redistribute_and_merge() {
        let mut left_data = [0u8; PAGE_SIZE];
        let mut right_data = [0u8; PAGE_SIZE];
        let mut left = leaf_with(&mut left_data, &[1, 2, 3], 4);
        let mut right = LeafPage::new(&mut right_data[..], 8);
        right.init(PageId::new(2), None, 4);
        right.set_next_page_id(Some(PageId::new(9)));
        right.insert(&integer_key(7), rid(7), &IntegerComparator);

        left.move_last_to_front_of(&mut right);
        assert_eq!(keys_of(&left), vec![1, 2]);
        assert_eq!(keys_of(&right), vec![3, 7]);

        right.move_first_to_end_of(&mut left);
        assert_eq!(keys_of(&left), vec![1, 2, 3]);
        assert_eq!(keys_of(&right), vec![7]);

        right.move_all_to(&mut left);
        assert_eq!(keys_of(&left), vec![1, 2, 3, 7]);
        assert_eq!(right.size(), 0);
        assert_eq!(left.next_page_id(), Some(PageId::new(9)));
    }

    #[test]
    #[should_panic(expected = "must be split")]
    fn test_leaf_overflow_panics() {
        let mut data = [0u8; PAGE_SIZE];
        let mut leaf = leaf_with(&mut data, &[1, 2, 3], 2);
        leaf.insert(&integer_key(4), rid(4), &IntegerComparator);
    }
}
