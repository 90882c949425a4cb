//! Keyed registry of session queues with idle eviction.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tokio::time::{self, Instant};

use super::buffer::{BufferCache, TaskBuffer};
use super::metrics::{PoolMetrics, PoolSnapshot};
use super::queue::{convoy, PushLease, SessionQueue};
use super::traits::SessionKey;
use crate::config::PoolConfig;

/// Registry and buffer cache share one lock.
struct PoolState<K> {
    sessions: HashMap<K, Arc<SessionQueue>>,
    buffers: BufferCache,
}

struct Shared<K> {
    config: PoolConfig,
    state: Mutex<PoolState<K>>,
    metrics: Arc<PoolMetrics>,
}

/// Serializes tasks per session key.
///
/// Tasks submitted under the same key run one at a time, in submission
/// order, on that key's worker. Different keys run concurrently. A key that
/// sees no submissions for `nat_timeout` is evicted and its buffer goes back
/// to the reuse cache.
///
/// Cloning is cheap; every clone drives the same registry. Once the last
/// handle is dropped, each remaining session closes at its next deadline.
pub struct TaskPool<K: SessionKey> {
    shared: Arc<Shared<K>>,
}

impl<K: SessionKey> Clone for TaskPool<K> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K: SessionKey> TaskPool<K> {
    /// Build a pool without validating `config`. A zero `queue_capacity`
    /// panics on first submit; [`create_task_pool`](super::create_task_pool)
    /// checks it up front.
    pub fn new(config: PoolConfig) -> Self {
        let buffers = BufferCache::new(config.queue_capacity, config.max_idle_buffers);
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(PoolState {
                    sessions: HashMap::new(),
                    buffers,
                }),
                metrics: Arc::new(PoolMetrics::new()),
            }),
        }
    }

    /// Queue `task` on `key`'s session, creating the session if needed.
    ///
    /// Resolves once the task is buffered, not once it has run. Waits while
    /// the session's buffer is full.
    ///
    /// Must be polled from within a tokio runtime: creating a session spawns
    /// its worker and deadline watcher with `tokio::spawn`.
    pub async fn submit<F>(&self, key: K, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let lease = self.resolve(key);
        lease.push(Box::pin(task)).await;
    }

    /// [`submit`](Self::submit) for a plain closure.
    pub async fn submit_fn<F>(&self, key: K, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(key, async move { task() }).await;
    }

    /// Look up or create the session for `key` and lease it for one push.
    fn resolve(&self, key: K) -> PushLease {
        let mut state = self.shared.state.lock();
        if let Some(queue) = state.sessions.get(&key) {
            return queue.lease();
        }

        let (buffer, reused) = state.buffers.acquire();
        let metrics = &self.shared.metrics;
        if reused {
            metrics.buffers_reused.inc();
            metrics.idle_buffers.dec();
        } else {
            metrics.buffers_allocated.inc();
        }

        let queue = Arc::new(SessionQueue::new(
            buffer.sender(),
            self.shared.config.nat_timeout(),
            Arc::clone(metrics),
        ));
        let (closed_tx, closed_rx) = oneshot::channel();
        let (freed_tx, freed_rx) = oneshot::channel();

        tokio::spawn(convoy(
            key.clone(),
            buffer,
            closed_rx,
            freed_tx,
            self.shared.config.close_policy,
            Arc::clone(metrics),
        ));
        tokio::spawn(watch_deadline(
            key.clone(),
            Arc::clone(&queue),
            Arc::downgrade(&self.shared),
            closed_tx,
            freed_rx,
        ));

        let lease = queue.lease();
        state.sessions.insert(key.clone(), queue);
        metrics.sessions_created.inc();
        metrics.active_sessions.inc();
        tracing::debug!(key = ?key, reused, "Session created");
        lease
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.shared.state.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` currently has a live session.
    pub fn contains(&self, key: &K) -> bool {
        self.shared.state.lock().sessions.contains_key(key)
    }

    /// Buffers waiting in the reuse cache.
    pub fn idle_buffers(&self) -> usize {
        self.shared.state.lock().buffers.len()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub fn metrics(&self) -> &PoolMetrics {
        &self.shared.metrics
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        self.shared.metrics.snapshot()
    }
}

/// Owns teardown for one session. Sleeps until the deadline, then
/// re-validates under the registry lock: no submitter may hold a lease, the
/// buffer must be empty, and the deadline must really have passed. Any
/// failed check just re-arms.
async fn watch_deadline<K: SessionKey>(
    key: K,
    queue: Arc<SessionQueue>,
    pool: Weak<Shared<K>>,
    closed: oneshot::Sender<()>,
    freed: oneshot::Receiver<TaskBuffer>,
) {
    let mut wake = queue.deadline();
    let shared = loop {
        time::sleep_until(wake).await;

        let Some(shared) = pool.upgrade() else {
            break None;
        };

        let mut state = shared.state.lock();
        // Only this watcher removes `key`, so the entry is always ours.
        let registered = state
            .sessions
            .get(&key)
            .is_some_and(|current| Arc::ptr_eq(current, &queue));
        debug_assert!(registered, "session replaced before its watcher evicted it");
        if let Some(next) = queue.next_check(Instant::now()) {
            wake = next;
            continue;
        }
        if registered {
            state.sessions.remove(&key);
            shared.metrics.active_sessions.dec();
            shared.metrics.sessions_evicted.inc();
        }
        drop(state);

        tracing::debug!(key = ?key, "Session evicted after inactivity");
        break Some(shared);
    };

    // Nothing can push into `queue` any more; let the worker finish.
    drop(queue);
    let _ = closed.send(());
    let Ok(buffer) = freed.await else {
        tracing::warn!(key = ?key, "Session worker exited without returning its buffer");
        return;
    };

    if let Some(shared) = shared {
        let mut state = shared.state.lock();
        if state.buffers.release(buffer) {
            shared.metrics.idle_buffers.inc();
        }
    }
}
