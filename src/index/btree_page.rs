//! Node header shared by leaf and internal pages, and the tagged page view.
//!
//! Header layout (little-endian, 24 bytes):
//!
//! | offset | field          |
//! |--------|----------------|
//! | 0      | page kind      |
//! | 4      | LSN            |
//! | 8      | entry count    |
//! | 12     | capacity       |
//! | 16     | parent page id |
//! | 20     | self page id   |

use crate::common::{Lsn, PageId, PAGE_SIZE};

use super::{InternalPage, LeafPage};

const PAGE_KIND_OFFSET: usize = 0;
const LSN_OFFSET: usize = 4;
const SIZE_OFFSET: usize = 8;
const MAX_SIZE_OFFSET: usize = 12;
const PARENT_PAGE_OFFSET: usize = 16;
const PAGE_ID_OFFSET: usize = 20;

/// Size of the common node header
pub const NODE_HEADER_SIZE: usize = 24;

pub(crate) fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
}

pub(crate) fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Page kind tag stored in the first header field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Invalid,
    Leaf,
    Internal,
}

impl PageKind {
    fn from_u32(raw: u32) -> Self {
        match raw {
            1 => PageKind::Leaf,
            2 => PageKind::Internal,
            _ => PageKind::Invalid,
        }
    }

    fn as_u32(self) -> u32 {
        match self {
            PageKind::Invalid => 0,
            PageKind::Leaf => 1,
            PageKind::Internal => 2,
        }
    }
}

/// Read access to the node header of a tree page.
pub trait BTreeNode {
    fn bytes(&self) -> &[u8];

    fn kind(&self) -> PageKind {
        PageKind::from_u32(read_u32(self.bytes(), PAGE_KIND_OFFSET))
    }

    fn lsn(&self) -> Lsn {
        read_u32(self.bytes(), LSN_OFFSET)
    }

    /// Number of entries in the node. For internal nodes this includes the
    /// sentinel slot 0.
    fn size(&self) -> usize {
        read_u32(self.bytes(), SIZE_OFFSET) as usize
    }

    /// Capacity: leaf entries, or separator keys for internal nodes.
    fn max_size(&self) -> usize {
        read_u32(self.bytes(), MAX_SIZE_OFFSET) as usize
    }

    fn parent_page_id(&self) -> Option<PageId> {
        PageId::from_raw(read_u32(self.bytes(), PARENT_PAGE_OFFSET))
    }

    fn page_id(&self) -> PageId {
        PageId::new(read_u32(self.bytes(), PAGE_ID_OFFSET))
    }
}

/// Write access to the node header of a tree page.
pub trait BTreeNodeMut: BTreeNode {
    fn bytes_mut(&mut self) -> &mut [u8];

    fn set_kind(&mut self, kind: PageKind) {
        write_u32(self.bytes_mut(), PAGE_KIND_OFFSET, kind.as_u32());
    }

    fn set_lsn(&mut self, lsn: Lsn) {
        write_u32(self.bytes_mut(), LSN_OFFSET, lsn);
    }

    fn set_size(&mut self, size: usize) {
        write_u32(self.bytes_mut(), SIZE_OFFSET, size as u32);
    }

    fn set_max_size(&mut self, max_size: usize) {
        write_u32(self.bytes_mut(), MAX_SIZE_OFFSET, max_size as u32);
    }

    fn set_parent_page_id(&mut self, parent: Option<PageId>) {
        write_u32(self.bytes_mut(), PARENT_PAGE_OFFSET, PageId::to_raw(parent));
    }

    fn set_page_id(&mut self, page_id: PageId) {
        write_u32(self.bytes_mut(), PAGE_ID_OFFSET, page_id.as_u32());
    }

    /// Writes a fresh header; every other byte of the page is zeroed.
    fn init_header(&mut self, kind: PageKind, page_id: PageId, parent: Option<PageId>, max_size: usize) {
        self.bytes_mut().fill(0);
        self.set_kind(kind);
        self.set_lsn(crate::common::INVALID_LSN);
        self.set_size(0);
        self.set_max_size(max_size);
        self.set_parent_page_id(parent);
        self.set_page_id(page_id);
    }
}

/// A tree page interpreted according to its kind tag.
pub enum BTreePage<T> {
    Leaf(LeafPage<T>),
    Internal(InternalPage<T>),
}

impl<T: AsRef<[u8]>> BTreePage<T> {
    /// Wraps page bytes in the view their kind tag selects.
    ///
    /// # Panics
    ///
    /// Panics if the page is not a tree page.
    pub fn new(data: T, key_size: usize) -> Self {
        assert_eq!(data.as_ref().len(), PAGE_SIZE);
        let raw = read_u32(data.as_ref(), PAGE_KIND_OFFSET);
        match PageKind::from_u32(raw) {
            PageKind::Leaf => BTreePage::Leaf(LeafPage::new(data, key_size)),
            PageKind::Internal => BTreePage::Internal(InternalPage::new(data, key_size)),
            PageKind::Invalid => panic!(
                "page {} is not a tree page (kind tag {})",
                read_u32(data.as_ref(), PAGE_ID_OFFSET),
                raw
            ),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, BTreePage::Leaf(_))
    }
}

impl<T: AsRef<[u8]>> BTreeNode for BTreePage<T> {
    fn bytes(&self) -> &[u8] {
        match self {
            BTreePage::Leaf(leaf) => leaf.bytes(),
            BTreePage::Internal(internal) => internal.bytes(),
        }
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> BTreeNodeMut for BTreePage<T> {
    fn bytes_mut(&mut self) -> &mut [u8] {
        match self {
            BTreePage::Leaf(leaf) => leaf.bytes_mut(),
            BTreePage::Internal(internal) => internal.bytes_mut(),
        }
    }
}
