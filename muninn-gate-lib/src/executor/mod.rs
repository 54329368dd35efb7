use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::error;

use crate::error::{GateError, Result};

type Task = Box<dyn FnOnce() + Send + 'static>;

enum Job {
    Run(Task),
    Shutdown,
}

/// Handle to one single-consumer task runner.
///
/// Every session is pinned to one executor for its lifetime, so all session
/// state is mutated from a single task and submissions run in FIFO order.
/// `submit` can be rejected even after a positive `is_active` check; callers
/// own that race.
#[derive(Clone)]
pub struct Executor {
    tx: mpsc::UnboundedSender<Job>,
    active: Arc<AtomicBool>,
    index: usize,
}

impl Executor {
    /// False once the executor is draining or stopped.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Queue a task. On rejection the task is dropped, releasing whatever
    /// it captured.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) -> Result<()> {
        if !self.active.load(Ordering::Acquire) {
            return Err(GateError::SubmitRejected);
        }
        self.tx
            .send(Job::Run(Box::new(task)))
            .map_err(|_| GateError::SubmitRejected)
    }

    /// Stop accepting work and shut the worker down after the queue drains.
    pub fn stop(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            let _ = self.tx.send(Job::Shutdown);
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

fn spawn_worker(index: usize) -> Executor {
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            match job {
                Job::Run(task) => {
                    // A panicking task must not take the executor (and every
                    // session pinned to it) down with it.
                    if std::panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                        error!(executor = index, "submitted task panicked");
                    }
                }
                Job::Shutdown => break,
            }
        }
    });
    Executor { tx, active: Arc::new(AtomicBool::new(true)), index }
}

/// A fixed pool of executors, handed out round-robin.
pub struct ExecutorPool {
    executors: Vec<Executor>,
    next: AtomicUsize,
}

impl ExecutorPool {
    /// Spawn `size` workers on the current tokio runtime.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            executors: (0..size).map(spawn_worker).collect(),
            next: AtomicUsize::new(0),
        }
    }

    /// Pick the executor for a new session.
    pub fn acquire(&self) -> Executor {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.executors.len();
        self.executors[index].clone()
    }

    pub fn shutdown(&self) {
        for executor in &self.executors {
            executor.stop();
        }
    }
}
