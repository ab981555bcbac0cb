use std::sync::Arc;

use crate::buffer::{BufferPoolManager, PinnedPage};
use crate::common::{ArborError, PageId, Result, HEADER_PAGE_ID, MAX_INDEX_NAME_LEN, PAGE_SIZE};

const MAGIC_NUMBER: u32 = 0x4152_4252; // "ARBR" in hex
const VERSION: u32 = 1;

const MAGIC_OFFSET: usize = 0;
const VERSION_OFFSET: usize = 4;
const RECORD_COUNT_OFFSET: usize = 8;
const RECORDS_OFFSET: usize = 12;

const RECORD_SIZE: usize = MAX_INDEX_NAME_LEN + 4; // name (32) + root_page_id (4)

/// Maximum number of index records the header page can hold
pub const MAX_DIRECTORY_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

/// A single `name -> root page id` record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    pub name: String,
    pub root_page_id: PageId,
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
}

fn record_offset(index: usize) -> usize {
    RECORDS_OFFSET + index * RECORD_SIZE
}

fn decode_name(slot: &[u8]) -> String {
    let end = slot.iter().position(|&b| b == 0).unwrap_or(slot.len());
    String::from_utf8_lossy(&slot[..end]).into_owned()
}

pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_INDEX_NAME_LEN || name.contains('\0') {
        return Err(ArborError::InvalidIndexName(name.to_string()));
    }
    Ok(())
}

/// Mutable view of the header page.
pub struct DirectoryPage<'a> {
    data: &'a mut [u8],
}

impl<'a> DirectoryPage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn init(&mut self) {
        self.data.fill(0);
        self.data[MAGIC_OFFSET..MAGIC_OFFSET + 4].copy_from_slice(&MAGIC_NUMBER.to_le_bytes());
        self.data[VERSION_OFFSET..VERSION_OFFSET + 4].copy_from_slice(&VERSION.to_le_bytes());
        self.set_record_count(0);
    }

    fn view(&self) -> DirectoryPageRef<'_> {
        DirectoryPageRef::new(&self.data[..])
    }

    pub fn is_valid(&self) -> bool {
        self.view().is_valid()
    }

    pub fn record_count(&self) -> usize {
        self.view().record_count()
    }

    fn set_record_count(&mut self, count: usize) {
        self.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
            .copy_from_slice(&(count as u32).to_le_bytes());
    }

    pub fn get_record(&self, name: &str) -> Option<PageId> {
        self.view().get_record(name)
    }

    fn write_record(&mut self, index: usize, name: &str, root_page_id: PageId) {
        let offset = record_offset(index);
        let name_slot = &mut self.data[offset..offset + MAX_INDEX_NAME_LEN];
        name_slot.fill(0);
        name_slot[..name.len()].copy_from_slice(name.as_bytes());
        self.set_root_at(index, root_page_id);
    }

    fn set_root_at(&mut self, index: usize, root_page_id: PageId) {
        let offset = record_offset(index) + MAX_INDEX_NAME_LEN;
        self.data[offset..offset + 4].copy_from_slice(&root_page_id.as_u32().to_le_bytes());
    }

    /// Adds a record for a new index.
    pub fn insert_record(&mut self, name: &str, root_page_id: PageId) -> Result<()> {
        validate_name(name)?;
        if self.view().find(name).is_some() {
            return Err(ArborError::IndexAlreadyExists(name.to_string()));
        }

        let count = self.record_count();
        if count >= MAX_DIRECTORY_RECORDS {
            return Err(ArborError::DirectoryFull);
        }

        self.write_record(count, name, root_page_id);
        self.set_record_count(count + 1);
        Ok(())
    }

    /// Replaces the root page id of an existing record.
    pub fn update_record(&mut self, name: &str, root_page_id: PageId) -> Result<()> {
        let index = self
            .view()
            .find(name)
            .ok_or_else(|| ArborError::IndexNotFound(name.to_string()))?;
        self.set_root_at(index, root_page_id);
        Ok(())
    }

    /// Removes a record, returning its root page id. The last record moves
    /// into the freed slot.
    pub fn remove_record(&mut self, name: &str) -> Result<PageId> {
        let index = self
            .view()
            .find(name)
            .ok_or_else(|| ArborError::IndexNotFound(name.to_string()))?;
        let removed = self.view().record_at(index).root_page_id;

        let count = self.record_count();
        if index < count - 1 {
            let src = record_offset(count - 1);
            self.data
                .copy_within(src..src + RECORD_SIZE, record_offset(index));
        }
        self.set_record_count(count - 1);
        Ok(removed)
    }
}

/// Read-only view of the header page.
pub struct DirectoryPageRef<'a> {
    data: &'a [u8],
}

impl<'a> DirectoryPageRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn is_valid(&self) -> bool {
        read_u32(self.data, MAGIC_OFFSET) == MAGIC_NUMBER
    }

    pub fn version(&self) -> u32 {
        read_u32(self.data, VERSION_OFFSET)
    }

    pub fn record_count(&self) -> usize {
        read_u32(self.data, RECORD_COUNT_OFFSET) as usize
    }

    fn record_at(&self, index: usize) -> IndexRecord {
        let offset = record_offset(index);
        IndexRecord {
            name: decode_name(&self.data[offset..offset + MAX_INDEX_NAME_LEN]),
            root_page_id: PageId::new(read_u32(self.data, offset + MAX_INDEX_NAME_LEN)),
        }
    }

    fn find(&self, name: &str) -> Option<usize> {
        if name.len() > MAX_INDEX_NAME_LEN {
            return None;
        }
        (0..self.record_count()).find(|&i| {
            let offset = record_offset(i);
            let slot = &self.data[offset..offset + MAX_INDEX_NAME_LEN];
            &slot[..name.len()] == name.as_bytes() && slot[name.len()..].iter().all(|&b| b == 0)
        })
    }

    pub fn get_record(&self, name: &str) -> Option<PageId> {
        self.find(name).map(|i| self.record_at(i).root_page_id)
    }

    pub fn records(&self) -> Vec<IndexRecord> {
        (0..self.record_count()).map(|i| self.record_at(i)).collect()
    }
}

/// The `name -> root page id` directory kept in the header page.
///
/// The header page stays pinned for the directory's lifetime, so updating a
/// record never needs a free frame.
pub struct IndexDirectory {
    bpm: Arc<BufferPoolManager>,
    _header: PinnedPage,
}

impl IndexDirectory {
    /// Opens the directory in the header page, formatting it when the
    /// backing store is empty.
    pub fn open(bpm: Arc<BufferPoolManager>) -> Result<Self> {
        let header = if bpm.store().num_pages() == 0 {
            let mut guard = bpm.new_page_write()?.ok_or(ArborError::BufferPoolFull)?;
            if guard.page_id() != HEADER_PAGE_ID {
                return Err(ArborError::InvalidDatabaseFile);
            }
            DirectoryPage::new(guard.data_mut()).init();
            tracing::debug!("formatted index directory");
            guard.unlatch()
        } else {
            let guard = bpm
                .fetch_page_read(HEADER_PAGE_ID)?
                .ok_or(ArborError::BufferPoolFull)?;
            if !DirectoryPageRef::new(guard.data()).is_valid() {
                return Err(ArborError::InvalidDatabaseFile);
            }
            guard.unlatch()
        };

        Ok(Self {
            bpm,
            _header: header,
        })
    }

    /// Registers a new index.
    pub fn insert_record(&self, name: &str, root_page_id: PageId) -> Result<()> {
        let mut guard = self.latch_write()?;
        DirectoryPage::new(guard.data_mut()).insert_record(name, root_page_id)?;
        tracing::debug!(name, %root_page_id, "registered index");
        Ok(())
    }

    /// Records a new root page id for an existing index.
    pub fn update_record(&self, name: &str, root_page_id: PageId) -> Result<()> {
        let mut guard = self.latch_write()?;
        DirectoryPage::new(guard.data_mut()).update_record(name, root_page_id)
    }

    /// Looks up the root page id of an index.
    pub fn get_record(&self, name: &str) -> Result<Option<PageId>> {
        let guard = self.latch_read()?;
        Ok(DirectoryPageRef::new(guard.data()).get_record(name))
    }

    /// Removes an index record, returning the root page id it held.
    pub fn remove_record(&self, name: &str) -> Result<PageId> {
        let mut guard = self.latch_write()?;
        DirectoryPage::new(guard.data_mut()).remove_record(name)
    }

    /// Returns every record in the directory.
    pub fn records(&self) -> Result<Vec<IndexRecord>> {
        let guard = self.latch_read()?;
        Ok(DirectoryPageRef::new(guard.data()).records())
    }

    fn latch_read(&self) -> Result<crate::buffer::ReadPageGuard> {
        self.bpm
            .fetch_page_read(HEADER_PAGE_ID)?
            .ok_or(ArborError::BufferPoolFull)
    }

    fn latch_write(&self) -> Result<crate::buffer::WritePageGuard> {
        self.bpm
            .fetch_page_write(HEADER_PAGE_ID)?
            .ok_or(ArborError::BufferPoolFull)
    }
}
