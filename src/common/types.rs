use std::fmt;

use super::config::INVALID_PAGE_ID;

/// Page identifier type - uniquely identifies a page in the backing store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub u32);

impl PageId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        *self != INVALID_PAGE_ID
    }

    /// Decodes the on-disk representation, mapping the sentinel to `None`.
    pub fn from_raw(raw: u32) -> Option<Self> {
        let page_id = Self(raw);
        page_id.is_valid().then_some(page_id)
    }

    /// Encodes an optional page id, using the sentinel for `None`.
    pub fn to_raw(page_id: Option<Self>) -> u32 {
        page_id.unwrap_or(INVALID_PAGE_ID).0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageId({})", self.0)
    }
}

/// Frame identifier type - identifies a buffer frame in the buffer pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub u32);

impl FrameId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameId({})", self.0)
    }
}

/// Slot identifier within a heap page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub u16);

impl SlotId {
    pub fn new(id: u16) -> Self {
        Self(id)
    }

    pub fn as_u16(&self) -> u16 {
        self.0
    }
}

/// Record identifier - the value type stored in B+ tree leaves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot_id: SlotId,
}

impl RecordId {
    /// Encoded width in a leaf slot: page id (4) + slot id (4).
    pub const ENCODED_SIZE: usize = 8;

    pub fn new(page_id: PageId, slot_id: SlotId) -> Self {
        Self { page_id, slot_id }
    }

    pub fn encode(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.page_id.as_u32().to_le_bytes());
        out[4..8].copy_from_slice(&(self.slot_id.as_u16() as u32).to_le_bytes());
    }

    pub fn decode(bytes: &[u8]) -> Self {
        let page_id = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let slot_id = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Self::new(PageId::new(page_id), SlotId::new(slot_id as u16))
    }
}

/// LSN (Log Sequence Number) placeholder carried in node headers
pub type Lsn = u32;

/// Invalid LSN constant
pub const INVALID_LSN: Lsn = 0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_id_raw_sentinel() {
        assert_eq!(PageId::from_raw(u32::MAX), None);
        assert_eq!(PageId::from_raw(3), Some(PageId::new(3)));
        assert_eq!(PageId::to_raw(None), u32::MAX);
        assert_eq!(PageId::to_raw(Some(PageId::new(9))), 9);
    }

    #[test]
    fn test_record_id_layout() {
        let rid = RecordId::new(PageId::new(0x0102_0304), SlotId::new(7));
        let mut buf = [0u8; RecordId::ENCODED_SIZE];
        rid.encode(&mut buf);
        assert_eq!(buf, [4, 3, 2, 1, 7, 0, 0, 0]);
        assert_eq!(RecordId::decode(&buf), rid);
    }
}
