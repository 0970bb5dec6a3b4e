// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Ordered asynchronous command queue
//!
//! A `Queue` owns a single worker thread fed through an unbounded FIFO channel.
//! `submit` never blocks; `finish` blocks until every command submitted before
//! it has executed. Kernel failures are recorded by the worker and returned by
//! the next `finish`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, trace};

use crate::error::{DeviceError, DeviceResult};

/// A unit of device work
pub type Kernel = Box<dyn FnOnce() -> DeviceResult<()> + Send + 'static>;

/// Process-unique queue identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueId(pub u64);

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

enum Command {
    Run { label: &'static str, kernel: Kernel },
    Fence(Sender<()>),
}

struct QueueShared {
    id: QueueId,
    name: String,
    submitted: AtomicU64,
    completed: AtomicU64,
    /// First kernel failure since the last `finish`
    failure: Mutex<Option<DeviceError>>,
}

struct QueueInner {
    shared: Arc<QueueShared>,
    sender: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop once the backlog is drained.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            // Last handle released by a kernel: the worker cannot join itself.
            if worker.thread().id() == std::thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                error!(queue = %self.shared.name, "queue worker panicked");
            }
        }
    }
}

/// Handle to an ordered device command stream
///
/// Cloning a `Queue` yields another handle to the same stream; two handles
/// compare equal exactly when they refer to the same stream.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<QueueInner>,
}

impl Queue {
    /// Create a queue and start its worker thread
    pub fn new(name: impl Into<String>) -> DeviceResult<Self> {
        let id = QueueId(NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed));
        let shared = Arc::new(QueueShared {
            id,
            name: name.into(),
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failure: Mutex::new(None),
        });

        let (sender, receiver) = channel::unbounded();
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name(format!("popsim-queue-{}", id.0))
            .spawn(move || run_worker(worker_shared, receiver))?;

        debug!(queue = %shared.name, id = %id, "queue created");

        Ok(Self {
            inner: Arc::new(QueueInner {
                shared,
                sender: Some(sender),
                worker: Some(worker),
            }),
        })
    }

    pub fn id(&self) -> QueueId {
        self.inner.shared.id
    }

    pub fn name(&self) -> &str {
        &self.inner.shared.name
    }

    /// Submit a kernel for execution after everything already submitted
    pub fn submit<F>(&self, label: &'static str, kernel: F) -> DeviceResult<()>
    where
        F: FnOnce() -> DeviceResult<()> + Send + 'static,
    {
        let sender = self
            .inner
            .sender
            .as_ref()
            .ok_or_else(|| DeviceError::QueueClosed(self.name().to_string()))?;

        sender
            .send(Command::Run {
                label,
                kernel: Box::new(kernel),
            })
            .map_err(|_| DeviceError::QueueClosed(self.name().to_string()))?;

        self.inner.shared.submitted.fetch_add(1, Ordering::AcqRel);
        trace!(queue = %self.name(), kernel = label, "kernel submitted");
        Ok(())
    }

    /// Block until every previously submitted kernel has completed
    ///
    /// Returns the first kernel failure recorded since the previous drain.
    /// Draining an idle queue is a no-op.
    pub fn finish(&self) -> DeviceResult<()> {
        let sender = self
            .inner
            .sender
            .as_ref()
            .ok_or_else(|| DeviceError::QueueClosed(self.name().to_string()))?;

        let (done_tx, done_rx) = channel::bounded(1);
        sender
            .send(Command::Fence(done_tx))
            .map_err(|_| DeviceError::QueueClosed(self.name().to_string()))?;
        done_rx
            .recv()
            .map_err(|_| DeviceError::Disconnected(self.name().to_string()))?;

        match self.inner.shared.failure.lock().take() {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    /// Kernels submitted over the queue's lifetime
    pub fn submitted(&self) -> u64 {
        self.inner.shared.submitted.load(Ordering::Acquire)
    }

    /// Kernels that have finished executing
    pub fn completed(&self) -> u64 {
        self.inner.shared.completed.load(Ordering::Acquire)
    }

    /// Kernels submitted but not yet executed
    pub fn pending(&self) -> u64 {
        self.submitted().saturating_sub(self.completed())
    }
}

impl PartialEq for Queue {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Queue {}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("submitted", &self.submitted())
            .field("completed", &self.completed())
            .finish()
    }
}

fn run_worker(shared: Arc<QueueShared>, receiver: Receiver<Command>) {
    for command in receiver.iter() {
        match command {
            Command::Run { label, kernel } => {
                if let Err(err) = kernel() {
                    error!(queue = %shared.name, kernel = label, error = %err, "kernel failed");
                    let mut failure = shared.failure.lock();
                    if failure.is_none() {
                        *failure = Some(err);
                    }
                }
                shared.completed.fetch_add(1, Ordering::AcqRel);
            }
            Command::Fence(done) => {
                // The waiter may have given up; nothing to report then.
                let _ = done.send(());
            }
        }
    }
    debug!(queue = %shared.name, "queue worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn test_kernels_run_in_submission_order() {
        let queue = Queue::new("order").unwrap();
        let log = Arc::new(StdMutex::new(Vec::new()));

        for i in 0..100 {
            let log = Arc::clone(&log);
            queue
                .submit("push", move || {
                    log.lock().unwrap().push(i);
                    Ok(())
                })
                .unwrap();
        }
        queue.finish().unwrap();

        let seen = log.lock().unwrap().clone();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
        assert_eq!(queue.submitted(), 100);
        assert_eq!(queue.completed(), 100);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_finish_is_idempotent() {
        let queue = Queue::new("idle").unwrap();
        queue.finish().unwrap();
        queue.finish().unwrap();
        queue.finish().unwrap();
        assert_eq!(queue.submitted(), 0);
        assert_eq!(queue.completed(), 0);
    }

    #[test]
    fn test_kernel_failure_surfaces_once_from_finish() {
        let queue = Queue::new("failing").unwrap();
        queue
            .submit("boom", || {
                Err(DeviceError::KernelFailed {
                    label: "boom",
                    reason: "synthetic".to_string(),
                })
            })
            .unwrap();
        queue.submit("fine", || Ok(())).unwrap();

        let err = queue.finish().unwrap_err();
        assert!(matches!(err, DeviceError::KernelFailed { label: "boom", .. }));
        // Later kernels still ran
        assert_eq!(queue.completed(), 2);
        // Failure was consumed by the first drain
        assert!(queue.finish().is_ok());
    }

    #[test]
    fn test_queue_identity() {
        let a = Queue::new("a").unwrap();
        let b = Queue::new("b").unwrap();
        let a2 = a.clone();
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_drop_drains_backlog() {
        let counter = Arc::new(AtomicU64::new(0));
        {
            let queue = Queue::new("drop").unwrap();
            for _ in 0..10 {
                let counter = Arc::clone(&counter);
                queue
                    .submit("count", move || {
                        counter.fetch_add(1, Ordering::Relaxed);
                        Ok(())
                    })
                    .unwrap();
            }
        }
        assert_eq!(counter.load(Ordering::Relaxed), 10);
    }
}
