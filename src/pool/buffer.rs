//! Reusable bounded task buffers.

use tokio::sync::mpsc;

use super::traits::Task;

/// A bounded task channel kept as a sender/receiver pair so it outlives the
/// session that used it and can be handed to the next one.
///
/// Holding our own sender keeps the channel open, so `recv` on an idle
/// buffer parks instead of reporting disconnection.
pub struct TaskBuffer {
    tx: mpsc::Sender<Task>,
    rx: mpsc::Receiver<Task>,
}

impl TaskBuffer {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self { tx, rx }
    }

    /// A producer handle for the owning session queue.
    pub fn sender(&self) -> mpsc::Sender<Task> {
        self.tx.clone()
    }

    pub fn receiver(&mut self) -> &mut mpsc::Receiver<Task> {
        &mut self.rx
    }

    /// Tasks currently buffered.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Drop every buffered task without running it. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}

/// Free-list of released buffers, capped at `max_idle` entries.
///
/// Not synchronized on its own: the pool keeps it under the registry lock.
pub struct BufferCache {
    capacity: usize,
    max_idle: usize,
    idle: Vec<TaskBuffer>,
}

impl BufferCache {
    pub fn new(capacity: usize, max_idle: usize) -> Self {
        Self {
            capacity,
            max_idle,
            idle: Vec::new(),
        }
    }

    /// Take a cached buffer if one is available. The flag is `true` on reuse.
    pub fn acquire(&mut self) -> (TaskBuffer, bool) {
        match self.idle.pop() {
            Some(buffer) => (buffer, true),
            None => (TaskBuffer::new(self.capacity), false),
        }
    }

    /// Return a buffer for reuse. Non-empty buffers and anything past
    /// `max_idle` are dropped. Returns whether the buffer was kept.
    pub fn release(&mut self, buffer: TaskBuffer) -> bool {
        if self.idle.len() >= self.max_idle || buffer.pending() > 0 {
            return false;
        }
        self.idle.push(buffer);
        true
    }

    pub fn len(&self) -> usize {
        self.idle.len()
    }
}
