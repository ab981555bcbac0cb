use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::{Bytes, BytesMut};
use crossbeam_channel::{bounded, Receiver, Sender};

use crate::common::{ArborError, PageId, Result, DISK_SCHEDULER_QUEUE_DEPTH, PAGE_SIZE};

use super::PageStore;

/// Completion channel for a single disk request
type Completion<T> = Sender<Result<T>>;

/// A disk I/O request. Buffers are owned by the request, so the worker never
/// touches caller memory.
pub enum DiskRequest {
    Read {
        page_id: PageId,
        done: Completion<BytesMut>,
    },
    Write {
        page_id: PageId,
        data: Bytes,
        done: Completion<()>,
    },
}

/// DiskScheduler manages a background worker thread that processes disk I/O
/// requests from a bounded queue. The `*_sync` helpers block the caller until
/// the worker reports completion.
pub struct DiskScheduler {
    /// The backing store the worker performs I/O against
    store: Arc<dyn PageStore>,
    /// Channel sender for queuing requests; `None` once shut down
    request_sender: Option<Sender<DiskRequest>>,
    /// Handle to the background worker thread
    worker_handle: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    /// Creates a new DiskScheduler and spawns its worker thread.
    pub fn new(store: Arc<dyn PageStore>) -> Self {
        let (sender, receiver) = bounded::<DiskRequest>(DISK_SCHEDULER_QUEUE_DEPTH);

        let worker_store = Arc::clone(&store);
        let worker_handle = thread::Builder::new()
            .name("arbor-disk-scheduler".into())
            .spawn(move || Self::run_worker(worker_store, receiver))
            .expect("failed to spawn disk scheduler thread");

        Self {
            store,
            request_sender: Some(sender),
            worker_handle: Some(worker_handle),
        }
    }

    /// Queues a request for the background worker.
    pub fn schedule(&self, request: DiskRequest) -> Result<()> {
        let sender = self
            .request_sender
            .as_ref()
            .ok_or_else(|| ArborError::DiskScheduler("scheduler is shut down".into()))?;
        sender
            .send(request)
            .map_err(|e| ArborError::DiskScheduler(format!("Failed to schedule request: {}", e)))
    }

    /// Reads a page and copies it into `data`, blocking until done.
    pub fn schedule_read_sync(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let (done, rx) = bounded(1);
        self.schedule(DiskRequest::Read { page_id, done })?;

        let page = Self::wait(rx)?;
        data.copy_from_slice(&page);
        Ok(())
    }

    /// Writes a copy of `data` to the page, blocking until done.
    pub fn schedule_write_sync(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let (done, rx) = bounded(1);
        self.schedule(DiskRequest::Write {
            page_id,
            data: Bytes::copy_from_slice(data),
            done,
        })?;

        Self::wait(rx)
    }

    /// Returns the backing store. Allocation and deallocation are metadata
    /// operations and bypass the queue.
    pub fn store(&self) -> &Arc<dyn PageStore> {
        &self.store
    }

    fn wait<T>(rx: Receiver<Result<T>>) -> Result<T> {
        rx.recv().map_err(|e| {
            ArborError::DiskScheduler(format!("Failed to receive completion: {}", e))
        })?
    }

    /// Processes requests until every sender is dropped.
    fn run_worker(store: Arc<dyn PageStore>, receiver: Receiver<DiskRequest>) {
        for request in receiver.iter() {
            match request {
                DiskRequest::Read { page_id, done } => {
                    let mut page = BytesMut::zeroed(PAGE_SIZE);
                    let result = store.read_page(page_id, &mut page).map(|()| page);
                    let _ = done.send(result);
                }
                DiskRequest::Write {
                    page_id,
                    data,
                    done,
                } => {
                    let _ = done.send(store.write_page(page_id, &data));
                }
            }
        }
        tracing::trace!("disk scheduler worker exiting");
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain queued requests and exit
        self.request_sender.take();

        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}
