use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::common::{ArborError, PageId, Result, PAGE_SIZE};

use super::PageStore;

/// DiskManager is responsible for reading and writing pages to/from disk.
/// It manages a single database file and tracks the number of pages allocated.
/// Deallocated pages are recycled by later allocations; the recycle list lives
/// in memory only.
pub struct DiskManager {
    /// The database file
    db_file: Mutex<File>,
    /// Path to the database file
    db_path: String,
    /// Number of pages currently spanned by the file
    num_pages: AtomicU32,
    /// Page ids released by `deallocate_page`, lowest reused first
    free_pages: Mutex<BTreeSet<PageId>>,
    /// Number of disk reads performed
    num_reads: AtomicU32,
    /// Number of disk writes performed
    num_writes: AtomicU32,
}

impl DiskManager {
    /// Creates a new DiskManager for the given database file path.
    /// Creates the file if it doesn't exist.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path_str = db_path.as_ref().to_string_lossy().to_string();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&db_path)?;

        let file_size = file.metadata()?.len();
        if file_size % PAGE_SIZE as u64 != 0 {
            return Err(ArborError::InvalidDatabaseFile);
        }
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        tracing::debug!(path = %path_str, num_pages, "opened database file");

        Ok(Self {
            db_file: Mutex::new(file),
            db_path: path_str,
            num_pages: AtomicU32::new(num_pages),
            free_pages: Mutex::new(BTreeSet::new()),
            num_reads: AtomicU32::new(0),
            num_writes: AtomicU32::new(0),
        })
    }

    /// Returns the number of disk reads performed.
    pub fn get_num_reads(&self) -> u32 {
        self.num_reads.load(Ordering::Relaxed)
    }

    /// Returns the number of disk writes performed.
    pub fn get_num_writes(&self) -> u32 {
        self.num_writes.load(Ordering::Relaxed)
    }

    /// Returns the path to the database file.
    pub fn get_db_path(&self) -> &str {
        &self.db_path
    }

    /// Flushes any buffered writes to disk.
    pub fn sync(&self) -> Result<()> {
        let file = self.db_file.lock();
        file.sync_all()?;
        Ok(())
    }

    fn offset_of(page_id: PageId) -> u64 {
        (page_id.as_u32() as u64) * (PAGE_SIZE as u64)
    }
}

impl PageStore for DiskManager {
    fn read_page(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");
        if !page_id.is_valid() {
            return Err(ArborError::InvalidPageId(page_id));
        }

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(Self::offset_of(page_id)))?;

        // Short reads past the end of the file yield zeros
        let mut filled = 0;
        while filled < PAGE_SIZE {
            let n = file.read(&mut data[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        data[filled..].fill(0);

        self.num_reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");
        if !page_id.is_valid() {
            return Err(ArborError::InvalidPageId(page_id));
        }

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(Self::offset_of(page_id)))?;
        file.write_all(data)?;
        file.flush()?;

        self.num_pages
            .fetch_max(page_id.as_u32() + 1, Ordering::SeqCst);
        self.num_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn allocate_page_in(&self, shard: u32, shards: u32) -> Result<PageId> {
        assert!(shard < shards, "shard {shard} out of {shards}");

        let (page_id, recycled) = {
            let mut free_pages = self.free_pages.lock();
            let recycled = free_pages
                .iter()
                .copied()
                .find(|page_id| page_id.as_u32() % shards == shard);
            match recycled {
                Some(page_id) => {
                    free_pages.remove(&page_id);
                    (page_id, true)
                }
                None => loop {
                    let id = self.num_pages.fetch_add(1, Ordering::SeqCst);
                    if id % shards == shard {
                        break (PageId::new(id), false);
                    }
                    free_pages.insert(PageId::new(id));
                },
            }
        };

        let zeros = [0u8; PAGE_SIZE];
        self.write_page(page_id, &zeros)?;

        tracing::trace!(%page_id, recycled, shard, "allocated page");
        Ok(page_id)
    }

    fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        if page_id.as_u32() >= self.num_pages.load(Ordering::SeqCst) {
            return Err(ArborError::InvalidPageId(page_id));
        }
        self.free_pages.lock().insert(page_id);
        Ok(())
    }

    fn num_pages(&self) -> u32 {
        self.num_pages.load(Ordering::Relaxed)
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let file = self.db_file.get_mut();
        let _ = file.sync_all();
    }
}
