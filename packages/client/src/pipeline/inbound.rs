//! Bounded inbound queue between `log_event` callers and the pipeline.
//!
//! Producers are plain threads; the consumer is the pipeline task. A
//! condvar gives producers a bounded wait under the `Block` policy, a
//! `Notify` wakes the async consumer. `DropOldest` evicts from the front
//! instead of ever blocking.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;
use tracing::trace;

use crate::config::InboundOverflowPolicy;
use crate::error::LogEventError;
use crate::storage::StorageRecord;

struct QueueState {
    items: VecDeque<StorageRecord>,
    closed: bool,
}

/// MPSC record queue with a hard capacity.
pub struct InboundQueue {
    state: Mutex<QueueState>,
    space: Condvar,
    notify: Notify,
    capacity: usize,
    policy: InboundOverflowPolicy,
}

impl InboundQueue {
    /// Creates a queue holding at most `capacity` records.
    #[must_use]
    pub fn new(capacity: usize, policy: InboundOverflowPolicy) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity.min(1_024)),
                closed: false,
            }),
            space: Condvar::new(),
            notify: Notify::new(),
            capacity,
            policy,
        }
    }

    /// Enqueues a record from a producer thread.
    ///
    /// # Errors
    ///
    /// [`LogEventError::InboundQueueFull`] when the queue stays full for
    /// `timeout` under the `Block` policy; [`LogEventError::Closed`] after
    /// [`close`](Self::close).
    pub fn push(&self, record: StorageRecord, timeout: Duration) -> Result<(), LogEventError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(LogEventError::Closed);
        }
        if state.items.len() >= self.capacity {
            match self.policy {
                InboundOverflowPolicy::DropOldest => {
                    state.items.pop_front();
                    metrics::counter!("beacon_inbound_dropped_total").increment(1);
                    trace!("inbound queue full, dropped oldest");
                }
                InboundOverflowPolicy::Block => {
                    let deadline = Instant::now() + timeout;
                    while state.items.len() >= self.capacity && !state.closed {
                        if self.space.wait_until(&mut state, deadline).timed_out() {
                            return Err(LogEventError::InboundQueueFull);
                        }
                    }
                    if state.closed {
                        return Err(LogEventError::Closed);
                    }
                }
            }
        }
        state.items.push_back(record);
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    /// Dequeues up to `max` records, waiting while the queue is empty.
    /// Returns an empty batch only after the queue is closed and drained.
    pub async fn pop_batch(&self, max: usize) -> Vec<StorageRecord> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock();
                if !state.items.is_empty() {
                    let n = state.items.len().min(max);
                    let batch: Vec<StorageRecord> = state.items.drain(..n).collect();
                    drop(state);
                    self.space.notify_all();
                    return batch;
                }
                if state.closed {
                    return Vec::new();
                }
            }
            notified.await;
        }
    }

    /// Number of queued records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// `true` when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Rejects future pushes and wakes all waiters. Queued records remain
    /// poppable so the pipeline can drain before shutdown.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.space.notify_all();
        self.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use beacon_core::{EventLatency, EventPersistence};

    use super::*;

    fn record(id: &str) -> StorageRecord {
        StorageRecord::new(
            id,
            "t",
            EventLatency::Normal,
            EventPersistence::Normal,
            0,
            vec![],
        )
    }

    #[tokio::test]
    async fn push_then_pop_preserves_order() {
        let queue = InboundQueue::new(8, InboundOverflowPolicy::Block);
        queue.push(record("a"), Duration::ZERO).unwrap();
        queue.push(record("b"), Duration::ZERO).unwrap();
        let batch = queue.pop_batch(10).await;
        assert_eq!(
            batch.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }

    #[tokio::test]
    async fn block_policy_times_out_when_full() {
        let queue = InboundQueue::new(1, InboundOverflowPolicy::Block);
        queue.push(record("a"), Duration::ZERO).unwrap();
        let err = queue
            .push(record("b"), Duration::from_millis(10))
            .unwrap_err();
        assert_eq!(err, LogEventError::InboundQueueFull);
    }

    #[tokio::test]
    async fn drop_oldest_policy_evicts_head() {
        let queue = InboundQueue::new(2, InboundOverflowPolicy::DropOldest);
        for id in ["a", "b", "c"] {
            queue.push(record(id), Duration::ZERO).unwrap();
        }
        let batch = queue.pop_batch(10).await;
        assert_eq!(
            batch.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["b", "c"]
        );
    }

    #[tokio::test]
    async fn close_rejects_pushes_but_drains() {
        let queue = InboundQueue::new(8, InboundOverflowPolicy::Block);
        queue.push(record("a"), Duration::ZERO).unwrap();
        queue.close();
        assert_eq!(
            queue.push(record("b"), Duration::ZERO),
            Err(LogEventError::Closed)
        );
        assert_eq!(queue.pop_batch(10).await.len(), 1);
        assert!(queue.pop_batch(10).await.is_empty());
    }

    #[tokio::test]
    async fn consumer_wakes_a_blocked_producer() {
        let queue = std::sync::Arc::new(InboundQueue::new(1, InboundOverflowPolicy::Block));
        queue.push(record("a"), Duration::ZERO).unwrap();

        let producer = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.push(record("b"), Duration::from_secs(5)))
        };
        // Give the producer time to park, then free a slot.
        std::thread::sleep(Duration::from_millis(50));
        let batch = queue.pop_batch(1).await;
        assert_eq!(batch[0].id, "a");
        producer.join().unwrap().unwrap();
        assert_eq!(queue.len(), 1);
    }
}
