use std::collections::{HashMap, HashSet, VecDeque};
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;

use anyhow::Result;
use parking_lot::Mutex;

use crate::disk_manager::DiskManager;
use crate::page::PageId;

#[derive(Debug)]
enum DiskRequest {
    Read {
        page_id: PageId,
        callback: Sender<Result<Vec<u8>>>,
    },
    Write {
        page_id: PageId,
        data: Vec<u8>,
        callback: Sender<Result<()>>,
    },
}

impl DiskRequest {
    fn page_id(&self) -> PageId {
        match self {
            DiskRequest::Read { page_id, .. } => *page_id,
            DiskRequest::Write { page_id, .. } => *page_id,
        }
    }
}

/// Per-page FIFO queues so that a read and a write for the same page are
/// never processed out of order relative to each other, while requests
/// for distinct pages run on distinct worker threads.
#[derive(Debug)]
struct DiskRequestQueue {
    queues: HashMap<PageId, VecDeque<DiskRequest>>,
    in_processing_ids: HashSet<PageId>,
}

impl DiskRequestQueue {
    fn new() -> Self {
        Self {
            queues: HashMap::new(),
            in_processing_ids: HashSet::new(),
        }
    }

    fn push(&mut self, request: DiskRequest) {
        self.queues
            .entry(request.page_id())
            .or_default()
            .push_back(request);
    }

    fn start_processing(&mut self) -> Option<DiskRequest> {
        for (&page_id, queue) in &mut self.queues {
            if !self.in_processing_ids.contains(&page_id) {
                if let Some(request) = queue.pop_front() {
                    self.in_processing_ids.insert(page_id);
                    return Some(request);
                }
            }
        }
        None
    }

    fn end_processing(&mut self, page_id: PageId) {
        self.in_processing_ids.remove(&page_id);
        if let Some(queue) = self.queues.get_mut(&page_id) {
            if queue.is_empty() {
                self.queues.remove(&page_id);
            }
        }
    }
}

#[derive(Debug)]
struct Worker {
    thread: Option<thread::JoinHandle<()>>,
}

impl Worker {
    fn new(
        queue: Arc<Mutex<DiskRequestQueue>>,
        disk_manager: Arc<DiskManager>,
        stop_flag: Arc<AtomicBool>,
    ) -> Self {
        let thread = thread::spawn(move || loop {
            if stop_flag.load(Ordering::Relaxed) {
                return;
            }

            let request = queue.lock().start_processing();
            let Some(request) = request else {
                thread::sleep(std::time::Duration::from_micros(200));
                continue;
            };

            let page_id = request.page_id();
            match request {
                DiskRequest::Read { page_id, callback } => {
                    let mut buf = vec![0u8; crate::page::PAGE_SIZE];
                    let result = disk_manager.read_page(page_id, &mut buf).map(|_| buf);
                    let _ = callback.send(result);
                }
                DiskRequest::Write {
                    page_id,
                    data,
                    callback,
                } => {
                    let result = disk_manager.write_page(page_id, &data);
                    let _ = callback.send(result);
                }
            }

            queue.lock().end_processing(page_id);
        });

        Self {
            thread: Some(thread),
        }
    }
}

#[derive(Debug)]
struct WorkerPool {
    workers: Vec<Worker>,
    queue: Arc<Mutex<DiskRequestQueue>>,
    stop_flag: Arc<AtomicBool>,
}

impl WorkerPool {
    fn new(size: usize, disk_manager: Arc<DiskManager>) -> Self {
        let queue = Arc::new(Mutex::new(DiskRequestQueue::new()));
        let stop_flag = Arc::new(AtomicBool::new(false));
        let workers = (0..size)
            .map(|_| {
                Worker::new(
                    Arc::clone(&queue),
                    Arc::clone(&disk_manager),
                    Arc::clone(&stop_flag),
                )
            })
            .collect();

        Self {
            workers,
            queue,
            stop_flag,
        }
    }

    fn execute(&self, request: DiskRequest) {
        self.queue.lock().push(request);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        for mut worker in mem::take(&mut self.workers) {
            if let Some(thread) = worker.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

/// Indirection between the buffer pool and the disk manager, matching the
/// teacher's worker-pool-backed scheduler. Out of scope per the design
/// (the buffer pool manager is an external collaborator); kept so the
/// buffer pool has somewhere real to read and write bytes.
#[derive(Debug)]
pub struct DiskScheduler {
    pool: WorkerPool,
}

impl DiskScheduler {
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        Self {
            pool: WorkerPool::new(4, disk_manager),
        }
    }

    pub fn schedule_read(&self, page_id: PageId, callback: Sender<Result<Vec<u8>>>) {
        self.pool.execute(DiskRequest::Read { page_id, callback });
    }

    pub fn schedule_write(&self, page_id: PageId, data: Vec<u8>, callback: Sender<Result<()>>) {
        self.pool.execute(DiskRequest::Write {
            page_id,
            data,
            callback,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use tempfile::NamedTempFile;

    #[test]
    fn schedules_write_then_read_back() {
        let file = NamedTempFile::new().unwrap();
        let disk_manager = Arc::new(DiskManager::new(file.path()).unwrap());
        let scheduler = DiskScheduler::new(disk_manager);

        let mut data = vec![0u8; crate::page::PAGE_SIZE];
        data[0] = 42;

        let (tx, rx) = mpsc::channel();
        scheduler.schedule_write(1, data.clone(), tx);
        rx.recv().unwrap().unwrap();

        let (tx, rx) = mpsc::channel();
        scheduler.schedule_read(1, tx);
        let read_back = rx.recv().unwrap().unwrap();

        assert_eq!(read_back, data);
    }
}
