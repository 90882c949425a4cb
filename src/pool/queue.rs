//! Per-key session queue and its worker loop.

use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use super::buffer::TaskBuffer;
use super::metrics::PoolMetrics;
use super::traits::{SessionKey, Task};
use crate::config::ClosePolicy;

struct Activity {
    /// Earliest instant the session may be evicted.
    deadline: Instant,
    /// Submitters that resolved this queue and have not finished pushing.
    producers: usize,
}

/// One active session: the producer side of its task buffer plus the
/// inactivity deadline the watcher polls.
pub struct SessionQueue {
    tx: mpsc::Sender<Task>,
    aging: Duration,
    activity: Mutex<Activity>,
    metrics: Arc<PoolMetrics>,
}

impl SessionQueue {
    pub(crate) fn new(tx: mpsc::Sender<Task>, aging: Duration, metrics: Arc<PoolMetrics>) -> Self {
        Self {
            tx,
            aging,
            activity: Mutex::new(Activity {
                deadline: Instant::now() + aging,
                producers: 0,
            }),
            metrics,
        }
    }

    /// Push the inactivity deadline out to a full aging window from now.
    pub fn touch(&self) {
        self.activity.lock().deadline = Instant::now() + self.aging;
    }

    pub fn deadline(&self) -> Instant {
        self.activity.lock().deadline
    }

    /// Reset the deadline, then enqueue. Waits while the buffer is full.
    pub async fn push(&self, task: Task) {
        self.touch();
        if self.tx.send(task).await.is_err() {
            // Only reachable if the worker died outside a task.
            tracing::warn!("session worker is gone; dropping task");
            return;
        }
        self.metrics.tasks_submitted.inc();
    }

    /// Register an in-flight producer. Must be taken under the registry lock
    /// so the watcher never evicts a queue someone is about to push into.
    pub(crate) fn lease(self: &Arc<Self>) -> PushLease {
        self.activity.lock().producers += 1;
        PushLease {
            queue: Arc::clone(self),
        }
    }

    /// Tasks pushed but not yet picked up by the worker.
    pub fn buffered(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// `None` when the session is evictable at `now`; otherwise when to look again.
    ///
    /// A session with buffered tasks is still busy: evicting it would let a
    /// replacement session for the same key run ahead of them.
    pub(crate) fn next_check(&self, now: Instant) -> Option<Instant> {
        let activity = self.activity.lock();
        if activity.producers > 0 || self.buffered() > 0 {
            Some(now + self.aging)
        } else if now < activity.deadline {
            Some(activity.deadline)
        } else {
            None
        }
    }
}

/// Keeps a queue alive and un-evictable while its holder pushes.
pub(crate) struct PushLease {
    queue: Arc<SessionQueue>,
}

impl PushLease {
    pub(crate) async fn push(&self, task: Task) {
        self.queue.push(task).await;
    }
}

impl Drop for PushLease {
    fn drop(&mut self) {
        let mut activity = self.queue.activity.lock();
        activity.deadline = Instant::now() + self.queue.aging;
        activity.producers -= 1;
    }
}

/// Worker loop for one session: run tasks one at a time, in order, until the
/// watcher signals close. Hands the buffer back through `freed` once it is
/// done touching it.
pub(crate) async fn convoy<K: SessionKey>(
    key: K,
    mut buffer: TaskBuffer,
    mut closed: oneshot::Receiver<()>,
    freed: oneshot::Sender<TaskBuffer>,
    policy: ClosePolicy,
    metrics: Arc<PoolMetrics>,
) {
    loop {
        tokio::select! {
            biased;
            // A dropped sender means the pool itself is gone; treat as close.
            _ = &mut closed => break,
            Some(task) = buffer.receiver().recv() => run_task(&key, task, &metrics).await,
        }
    }

    match policy {
        ClosePolicy::Drain => {
            while let Ok(task) = buffer.receiver().try_recv() {
                run_task(&key, task, &metrics).await;
            }
        }
        ClosePolicy::Discard => {
            let dropped = buffer.clear();
            if dropped > 0 {
                tracing::debug!(key = ?key, dropped, "Discarded buffered tasks on close");
                metrics.tasks_discarded.inc_by(dropped as u64);
            }
        }
    }

    tracing::trace!(key = ?key, "Session worker exiting");
    if freed.send(buffer).is_err() {
        tracing::debug!(key = ?key, "Close watcher gone; buffer not recycled");
    }
}

async fn run_task<K: SessionKey>(key: &K, task: Task, metrics: &PoolMetrics) {
    match AssertUnwindSafe(task).catch_unwind().await {
        Ok(()) => metrics.tasks_completed.inc(),
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(key = ?key, %reason, "Session task panicked");
            metrics.tasks_panicked.inc();
        }
    }
}
