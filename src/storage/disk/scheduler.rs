use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::common::types::{PageId, PAGE_SIZE};
use crate::storage::disk::{DiskManager, DiskManagerError};

type ReadReply = Result<Box<[u8; PAGE_SIZE]>, DiskManagerError>;
type WriteReply = Result<(), DiskManagerError>;

enum DiskRequest {
    Read {
        page_id: PageId,
        reply: mpsc::Sender<ReadReply>,
    },
    Write {
        page_id: PageId,
        data: Box<[u8; PAGE_SIZE]>,
        reply: mpsc::Sender<WriteReply>,
    },
    Shutdown,
}

/// Serializes page I/O on a background worker thread. Callers enqueue a
/// request and block on its reply channel, so every call completes
/// synchronously from the caller's perspective while each request runs
/// atomically against the backing file.
pub struct DiskScheduler {
    sender: Mutex<mpsc::Sender<DiskRequest>>,
    worker: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    pub fn new(disk_manager: DiskManager) -> Self {
        let (sender, receiver) = mpsc::channel();
        let worker = thread::spawn(move || Self::run_worker(disk_manager, receiver));
        Self {
            sender: Mutex::new(sender),
            worker: Some(worker),
        }
    }

    /// Read a page into the caller's buffer
    pub fn read_page(
        &self,
        page_id: PageId,
        buf: &mut [u8; PAGE_SIZE],
    ) -> Result<(), DiskManagerError> {
        let (reply, result) = mpsc::channel();
        self.sender
            .lock()
            .send(DiskRequest::Read { page_id, reply })
            .map_err(|_| DiskManagerError::WorkerStopped)?;
        let data = result.recv().map_err(|_| DiskManagerError::WorkerStopped)??;
        *buf = *data;
        Ok(())
    }

    /// Write a page out and wait for it to hit the file
    pub fn write_page(
        &self,
        page_id: PageId,
        data: &[u8; PAGE_SIZE],
    ) -> Result<(), DiskManagerError> {
        let (reply, result) = mpsc::channel();
        self.sender
            .lock()
            .send(DiskRequest::Write {
                page_id,
                data: Box::new(*data),
                reply,
            })
            .map_err(|_| DiskManagerError::WorkerStopped)?;
        result.recv().map_err(|_| DiskManagerError::WorkerStopped)?
    }

    fn run_worker(disk_manager: DiskManager, receiver: mpsc::Receiver<DiskRequest>) {
        while let Ok(request) = receiver.recv() {
            match request {
                DiskRequest::Read { page_id, reply } => {
                    let mut buf = Box::new([0u8; PAGE_SIZE]);
                    let result = disk_manager.read_page(page_id, &mut buf).map(|_| buf);
                    // A dropped reply channel means the caller gave up; nothing to do.
                    let _ = reply.send(result);
                }
                DiskRequest::Write {
                    page_id,
                    data,
                    reply,
                } => {
                    let _ = reply.send(disk_manager.write_page(page_id, &data));
                }
                DiskRequest::Shutdown => break,
            }
        }
        log::trace!("disk scheduler worker exiting");
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        let _ = self.sender.lock().send(DiskRequest::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
