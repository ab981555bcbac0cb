//! Concurrent disk-backed B+ tree.

mod b_plus_tree;
mod btree_page;
mod concurrent_control;
mod index_iterator;
mod internal_page;
mod key_comparator;
mod leaf_page;
mod options;

pub use b_plus_tree::{BPlusTree, TreeStats};
pub use btree_page::{BTreeNode, BTreeNodeMut, BTreePage, PageKind, NODE_HEADER_SIZE};
pub use index_iterator::IndexIterator;
pub use internal_page::InternalPage;
pub use key_comparator::{integer_key, BytewiseComparator, IntegerComparator, KeyComparator};
pub use leaf_page::LeafPage;
pub use options::IndexOptions;
