//! Dedicated thread that runs observer callbacks.
//!
//! Event handling only queues work here, so observer code never runs while a
//! cache lock is held and may safely call back into the cache.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::error::WatcherError;
use crate::Result;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Serial executor backed by one named thread.
pub struct CallbackExecutor {
    job_tx: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl CallbackExecutor {
    /// Spawn the executor thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn new(name: &str) -> Result<Self> {
        let (job_tx, job_rx): (Sender<Job>, Receiver<Job>) = unbounded();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(&job_rx))
            .map_err(|e| crate::Error::internal(format!("failed to spawn callback thread: {e}")))?;

        tracing::debug!(name, "Callback executor started");

        Ok(Self {
            job_tx: Mutex::new(Some(job_tx)),
            worker_id: handle.thread().id(),
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Queue `job`. Jobs run one at a time in submission order.
    ///
    /// # Errors
    ///
    /// Returns `WatcherError::Closed` once the executor has been closed.
    pub fn run(&self, job: impl FnOnce() + Send + 'static) -> Result<()> {
        let guard = self.job_tx.lock();
        let tx = guard.as_ref().ok_or(WatcherError::Closed)?;
        tx.send(Box::new(job)).map_err(|_| WatcherError::Closed)?;
        Ok(())
    }

    /// True if called from the executor thread.
    #[must_use]
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.worker_id
    }

    /// Stop accepting jobs, drain the queue, and join the thread.
    ///
    /// Safe to call repeatedly and from a callback; in the latter case the
    /// thread exits after the current job instead of being joined.
    pub fn close(&self) {
        drop(self.job_tx.lock().take());
        if self.is_current() {
            return;
        }
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                tracing::error!("Callback thread panicked");
            }
        }
    }
}

impl Drop for CallbackExecutor {
    fn drop(&mut self) {
        self.close();
    }
}

fn worker_loop(job_rx: &Receiver<Job>) {
    while let Ok(job) = job_rx.recv() {
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::error!("Callback panicked");
        }
    }
    tracing::debug!("Callback executor stopped");
}
