use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use arbor::buffer::BufferPoolManager;
use arbor::index::{integer_key, BPlusTree, IndexOptions, IntegerComparator};
use arbor::storage::disk::DiskManager;
use arbor::storage::page::IndexDirectory;
use arbor::common::DEFAULT_BUFFER_POOL_SIZE;
use arbor::{PageId, RecordId, Result, SlotId};

const DEMO_KEYS: i64 = 500;

fn run(db_path: &str) -> Result<()> {
    // Build a tree with small nodes so the demo shows splits and merges
    {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        let bpm = Arc::new(BufferPoolManager::new(DEFAULT_BUFFER_POOL_SIZE, disk_manager));
        let directory = Arc::new(IndexDirectory::open(Arc::clone(&bpm))?);
        let options = IndexOptions::default().with_capacities(8, 8);
        let tree = BPlusTree::new("demo", Arc::clone(&bpm), directory, IntegerComparator, options)?;

        for k in 0..DEMO_KEYS {
            let rid = RecordId::new(PageId::new(k as u32), SlotId::new(0));
            tree.insert(&integer_key(k), rid)?;
        }
        for k in (0..DEMO_KEYS).filter(|k| k % 3 == 0) {
            tree.remove(&integer_key(k))?;
        }

        let stats = tree.check_integrity()?;
        println!(
            "Built tree: {} keys, height {}, {} leaves, {} internal nodes",
            stats.num_keys, stats.height, stats.num_leaves, stats.num_internal
        );

        bpm.flush_all_pages()?;
    }

    // Reopen through the directory and scan a range
    let disk_manager = Arc::new(DiskManager::new(db_path)?);
    let bpm = Arc::new(BufferPoolManager::new(DEFAULT_BUFFER_POOL_SIZE, disk_manager));
    let directory = Arc::new(IndexDirectory::open(Arc::clone(&bpm))?);
    let options = IndexOptions::default().with_capacities(8, 8);
    let tree = BPlusTree::open("demo", bpm, directory, IntegerComparator, options)?;

    print!("Keys from 100:");
    for entry in tree.begin_at(&integer_key(100))?.take(10) {
        let (key, rid) = entry?;
        let key = i64::from_le_bytes(key.try_into().unwrap());
        print!(" {}@{}", key, rid.page_id);
    }
    println!();

    Ok(())
}

fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db_path = "arbor-demo.db";
    let _ = std::fs::remove_file(db_path);

    if let Err(e) = run(db_path) {
        tracing::error!(error = %e, "demo failed");
        std::process::exit(1);
    }

    std::fs::remove_file(db_path).ok();
    println!("Demo completed successfully!");
}
