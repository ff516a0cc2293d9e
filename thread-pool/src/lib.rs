#![deny(clippy::unwrap_used, clippy::allow_attributes_without_reason)]
#![warn(clippy::perf, clippy::complexity, clippy::pedantic, clippy::suspicious)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    reason = "We're not going to write comprehensive docs"
)]

use std::{
    io,
    num::NonZero,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        mpsc::{self, Receiver, Sender},
        Arc, Mutex, PoisonError,
    },
    thread::{self, JoinHandle},
};

type Job = Box<dyn FnOnce() + Send + 'static>;
type Rx = Arc<Mutex<Receiver<Job>>>;

/// Fixed-size worker pool. Jobs are drained from a shared channel; dropping
/// the pool closes the channel and joins every worker.
pub struct ThreadPool {
    workers: Vec<Worker>,
    tx: Option<Sender<Job>>,
}

impl ThreadPool {
    /// Create a new `ThreadPool` with `size` worker threads.
    pub fn new(size: NonZero<usize>) -> io::Result<ThreadPool> {
        let (tx, rx) = mpsc::channel();
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(size.into());
        for id in 0..size.into() {
            workers.push(Worker::new(id, Arc::clone(&rx))?);
        }

        Ok(ThreadPool {
            workers,
            tx: Some(tx),
        })
    }

    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx
            .as_ref()
            .expect("Invariant violated: sender should exist before ThreadPool::drop")
            .send(Box::new(f))
            .expect("Invariant violated: channel should always function before ThreadPool::drop");
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        drop(self.tx.take());
        for worker in &mut self.workers {
            worker.join();
        }
    }
}

struct Worker {
    id: usize,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn new(id: usize, rx: Rx) -> io::Result<Worker> {
        let thread = thread::Builder::new()
            .name(format!("{}::Worker({})", module_path!(), id))
            .spawn(move || loop {
                let job = rx
                    .lock()
                    // A panic in another worker's job must not stop this one
                    .unwrap_or_else(PoisonError::into_inner)
                    .recv();
                match job {
                    Ok(job) => {
                        if catch_unwind(AssertUnwindSafe(job)).is_err() {
                            eprintln!("thread-pool: Worker({id}) job panicked");
                        }
                    }
                    Err(_) => break,
                }
            })?;

        Ok(Worker {
            id,
            thread: Some(thread),
        })
    }

    fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                eprintln!("thread-pool: Worker({}) panicked", self.id);
            }
        }
    }
}
