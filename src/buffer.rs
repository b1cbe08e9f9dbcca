use crate::error::EmitterError;
use crate::event::EventRecord;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Notify;

/// Bounded FIFO queue between the foreground `track` path and the batcher.
///
/// Backpressure policy is reject-newest: `enqueue` fails fast with
/// `BufferFull` once at capacity and never blocks the caller.
pub struct EventBuffer {
    capacity: usize,
    queue: Mutex<VecDeque<EventRecord>>,
    notify: Notify,
}

impl EventBuffer {
    pub fn new(capacity: usize) -> Self {
        EventBuffer {
            capacity,
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            notify: Notify::new(),
        }
    }

    /// Append a record, taking ownership. Synchronous and lock-only, so it is
    /// safe to call from non-async code.
    pub fn enqueue(&self, record: EventRecord) -> Result<(), EmitterError> {
        {
            let mut queue = self.queue.lock().unwrap();
            if queue.len() >= self.capacity {
                return Err(EmitterError::BufferFull {
                    capacity: self.capacity,
                });
            }
            queue.push_back(record);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Remove and return up to `max` records in FIFO order. Non-blocking;
    /// returns an empty vec when the buffer is empty.
    pub fn drain(&self, max: usize) -> Vec<EventRecord> {
        let mut queue = self.queue.lock().unwrap();
        let take = max.min(queue.len());
        queue.drain(..take).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves after the next `enqueue`. A permit stored by an enqueue that
    /// raced ahead of the wait resolves it immediately.
    pub async fn wait_for_records(&self) {
        self.notify.notified().await;
    }
}
