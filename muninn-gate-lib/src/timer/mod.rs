use std::future::poll_fn;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::time::DelayQueue;

type TimerTask = Box<dyn FnOnce() + Send + 'static>;

/// A hashed timer wheel for session update ticks.
///
/// One background task owns the queue; handles are cheap to clone and only
/// enqueue. Scheduled tasks run on the wheel's task and must hand real work
/// off to an executor. When the last handle drops, pending timers are
/// discarded with the wheel.
#[derive(Clone)]
pub struct TimerWheel {
    tx: mpsc::UnboundedSender<(Duration, TimerTask)>,
}

impl TimerWheel {
    /// Spawn the wheel on the current tokio runtime.
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<(Duration, TimerTask)>();
        tokio::spawn(async move {
            let mut queue: DelayQueue<TimerTask> = DelayQueue::new();
            loop {
                tokio::select! {
                    cmd = rx.recv() => match cmd {
                        Some((delay, task)) => {
                            queue.insert(task, delay);
                        }
                        None => break,
                    },
                    Some(expired) = poll_fn(|cx| queue.poll_expired(cx)), if !queue.is_empty() => {
                        (expired.into_inner())();
                    }
                }
            }
        });
        Self { tx }
    }

    /// Run `task` after `delay`.
    pub fn schedule(&self, delay: Duration, task: impl FnOnce() + Send + 'static) {
        let _ = self.tx.send((delay, Box::new(task)));
    }
}

impl Default for TimerWheel {
    fn default() -> Self {
        Self::new()
    }
}
