use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Shutdown,
}

/// Fixed-size worker pool for client-facing work (benchmarks, concurrent
/// callers issuing `Insert`/`Lookup` against a shared index). Mirrors the
/// queue/worker split already used by [`crate::disk_scheduler::DiskScheduler`],
/// generalized to arbitrary closures instead of disk requests.
pub struct ThreadPool {
    workers: Vec<JoinHandle<()>>,
    sender: Sender<Message>,
}

impl ThreadPool {
    pub fn new(size: u32) -> Self {
        let size = size.max(1) as usize;
        let (sender, receiver) = mpsc::channel::<Message>();
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..size)
            .map(|_| Self::spawn_worker(Arc::clone(&receiver)))
            .collect();

        Self { workers, sender }
    }

    fn spawn_worker(receiver: Arc<Mutex<Receiver<Message>>>) -> JoinHandle<()> {
        thread::spawn(move || loop {
            let message = receiver.lock().unwrap().recv();
            match message {
                Ok(Message::Run(job)) => job(),
                Ok(Message::Shutdown) | Err(_) => return,
            }
        })
    }

    pub fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let _ = self.sender.send(Message::Run(Box::new(job)));
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        for _ in &self.workers {
            let _ = self.sender.send(Message::Shutdown);
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
