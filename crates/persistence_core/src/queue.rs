//! Serial execution queues that confine contexts.
//!
//! # Responsibility
//! - Run submitted jobs one at a time, in submission order, on one named
//!   worker thread.
//! - Offer fire-and-forget and blocking submission.
//!
//! # Invariants
//! - At most one job runs on a queue at any moment.
//! - A panicking job is logged and does not stop the queue.
//! - Blocking submission from the queue's own thread runs inline; blocking
//!   across two queues that wait on each other deadlocks, as with any serial
//!   queue.

use log::{error, warn};
use parking_lot::Mutex;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};

type Job = Box<dyn FnOnce() + Send + 'static>;

const MAX_PANIC_PAYLOAD_CHARS: usize = 160;

/// Queue submission failure.
#[derive(Debug)]
pub enum QueueError {
    /// Worker thread could not be started.
    Spawn(std::io::Error),
    /// Queue was shut down before the job could run.
    Closed(String),
    /// Job panicked before producing a result.
    JobPanicked(String),
}

impl Display for QueueError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spawn(err) => write!(f, "failed to start queue worker: {err}"),
            Self::Closed(label) => write!(f, "queue `{label}` is closed"),
            Self::JobPanicked(label) => write!(f, "job on queue `{label}` panicked"),
        }
    }
}

impl Error for QueueError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Spawn(err) => Some(err),
            _ => None,
        }
    }
}

/// Single-consumer FIFO queue backed by one worker thread.
pub struct DispatchQueue {
    label: String,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    worker_id: ThreadId,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DispatchQueue {
    /// Starts a worker thread named after `label`.
    pub fn new(label: impl Into<String>) -> Result<Arc<Self>, QueueError> {
        let label = label.into();
        let (sender, receiver) = mpsc::channel::<Job>();
        let worker_label = label.clone();
        let handle = std::thread::Builder::new()
            .name(label.clone())
            .spawn(move || worker_loop(&worker_label, receiver))
            .map_err(QueueError::Spawn)?;

        Ok(Arc::new(Self {
            label,
            sender: Mutex::new(Some(sender)),
            worker_id: handle.thread().id(),
            worker: Mutex::new(Some(handle)),
        }))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns whether the caller is running on this queue's worker.
    pub fn is_current(&self) -> bool {
        std::thread::current().id() == self.worker_id
    }

    /// Enqueues `job` and returns without waiting.
    pub fn dispatch_async(&self, job: impl FnOnce() + Send + 'static) -> Result<(), QueueError> {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(QueueError::Closed(self.label.clone()));
        };
        sender
            .send(Box::new(job))
            .map_err(|_| QueueError::Closed(self.label.clone()))
    }

    /// Runs `job` on the queue and waits for its result.
    pub fn dispatch_sync<T, F>(&self, job: F) -> Result<T, QueueError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.is_current() {
            return Ok(job());
        }

        let (result_tx, result_rx) = mpsc::sync_channel::<T>(1);
        self.dispatch_async(move || {
            let _ = result_tx.send(job());
        })?;
        result_rx
            .recv()
            .map_err(|_| QueueError::JobPanicked(self.label.clone()))
    }

    /// Stops accepting jobs, drains what is queued and joins the worker.
    pub fn shutdown(&self) {
        self.sender.lock().take();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if self.is_current() {
                // Last handle released from inside a job; the loop exits on
                // its own once this job returns.
                return;
            }
            if handle.join().is_err() {
                warn!(
                    "event=queue_shutdown module=queue status=error label={} error_code=worker_panicked",
                    self.label
                );
            }
        }
    }
}

impl Drop for DispatchQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(label: &str, receiver: mpsc::Receiver<Job>) {
    for job in receiver {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
            let message = payload
                .downcast_ref::<&str>()
                .map(|message| (*message).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            let message: String = message
                .replace(['\n', '\r'], " ")
                .chars()
                .take(MAX_PANIC_PAYLOAD_CHARS)
                .collect();
            error!(
                "event=queue_job module=queue status=error label={label} error_code=job_panicked payload={message}"
            );
        }
    }
}
