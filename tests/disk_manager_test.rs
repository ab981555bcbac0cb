//! Integration tests for the disk manager and scheduler

use std::sync::Arc;
use std::thread;

use arbor::common::{PageId, PAGE_SIZE};
use arbor::storage::disk::{DiskManager, DiskScheduler, PageStore};
use rand::seq::SliceRandom;
use rand::thread_rng;
use tempfile::NamedTempFile;

#[test]
fn test_disk_manager_create_file() {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = DiskManager::new(temp_file.path()).unwrap();

    assert_eq!(dm.num_pages(), 0);
    assert_eq!(dm.get_num_reads(), 0);
    assert_eq!(dm.get_num_writes(), 0);
    assert_eq!(dm.get_db_path(), temp_file.path().to_string_lossy());
}

#[test]
fn test_disk_manager_random_access() {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = DiskManager::new(temp_file.path()).unwrap();

    let mut page_ids: Vec<PageId> = (0..32).map(|_| dm.allocate_page().unwrap()).collect();
    page_ids.shuffle(&mut thread_rng());

    for &page_id in &page_ids {
        let data = [page_id.as_u32() as u8; PAGE_SIZE];
        dm.write_page(page_id, &data).unwrap();
    }

    page_ids.shuffle(&mut thread_rng());
    for &page_id in &page_ids {
        let mut data = [0u8; PAGE_SIZE];
        dm.read_page(page_id, &mut data).unwrap();
        assert!(data.iter().all(|&b| b == page_id.as_u32() as u8));
    }
}

#[test]
fn test_disk_manager_io_stats() {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = DiskManager::new(temp_file.path()).unwrap();

    // Allocation zero-fills the page on disk
    let page_id = dm.allocate_page().unwrap();
    assert_eq!(dm.get_num_writes(), 1);

    let mut data = [0u8; PAGE_SIZE];
    for _ in 0..3 {
        dm.read_page(page_id, &mut data).unwrap();
    }
    dm.write_page(page_id, &data).unwrap();

    assert_eq!(dm.get_num_reads(), 3);
    assert_eq!(dm.get_num_writes(), 2);
}

#[test]
fn test_disk_manager_persistence_keeps_page_count() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    {
        let dm = DiskManager::new(&path).unwrap();
        for i in 0..5u8 {
            let page_id = dm.allocate_page().unwrap();
            dm.write_page(page_id, &[i; PAGE_SIZE]).unwrap();
        }
        dm.sync().unwrap();
    }

    let dm = DiskManager::new(&path).unwrap();
    assert_eq!(dm.num_pages(), 5);
    assert_eq!(dm.allocate_page().unwrap(), PageId::new(5));

    let mut data = [0u8; PAGE_SIZE];
    dm.read_page(PageId::new(3), &mut data).unwrap();
    assert!(data.iter().all(|&b| b == 3));
}

#[test]
fn test_disk_scheduler_concurrent_requests() {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    let scheduler = Arc::new(DiskScheduler::new(dm));

    let page_ids: Vec<PageId> = (0..16)
        .map(|_| scheduler.store().allocate_page().unwrap())
        .collect();

    let handles: Vec<_> = page_ids
        .chunks(4)
        .map(|chunk| {
            let scheduler = Arc::clone(&scheduler);
            let chunk = chunk.to_vec();
            thread::spawn(move || {
                for page_id in chunk {
                    let data = [page_id.as_u32() as u8 + 1; PAGE_SIZE];
                    scheduler.schedule_write_sync(page_id, &data).unwrap();

                    let mut out = [0u8; PAGE_SIZE];
                    scheduler.schedule_read_sync(page_id, &mut out).unwrap();
                    assert_eq!(out[0], page_id.as_u32() as u8 + 1);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_disk_scheduler_drains_queue_on_drop() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    {
        let dm = Arc::new(DiskManager::new(&path).unwrap());
        let scheduler = DiskScheduler::new(dm);
        let page_id = scheduler.store().allocate_page().unwrap();
        scheduler
            .schedule_write_sync(page_id, &[9u8; PAGE_SIZE])
            .unwrap();
    }

    let dm = DiskManager::new(&path).unwrap();
    let mut data = [0u8; PAGE_SIZE];
    dm.read_page(PageId::new(0), &mut data).unwrap();
    assert!(data.iter().all(|&b| b == 9));
}
