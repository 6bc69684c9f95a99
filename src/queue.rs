//! Bounded FIFO between the Receiver and the Worker Pool, with a
//! configurable backpressure policy and optional durable backing.

use crate::config::BackpressurePolicy;
use signal_protocol::RawEnvelope;
use signal_storage::StorageAdapter;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

pub const QUEUE_STORAGE_KEY: &str = "queue";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    DroppedOldest,
    Rejected,
}

struct Entry {
    envelope: RawEnvelope,
    storage_id: Option<i64>,
}

struct State {
    items: VecDeque<Entry>,
    dropped_oldest_total: u64,
}

/// A bounded queue. `enqueue` applies the configured backpressure policy
/// when full; `dequeue` suspends until an item is available.
///
/// When `storage` is set, every accepted item is durably appended before
/// becoming visible in memory, and the durable record is deleted the moment
/// a worker dequeues it (that dequeue is the "ack" for durability purposes).
pub struct BoundedQueue {
    policy: BackpressurePolicy,
    capacity: usize,
    state: Mutex<State>,
    not_full: Notify,
    not_empty: Notify,
    storage: Option<Arc<dyn StorageAdapter>>,
}

/// An item handed to a Worker, carrying its enqueue time for latency metrics.
pub struct DequeuedItem {
    pub envelope: RawEnvelope,
}

impl BoundedQueue {
    pub fn new(
        policy: BackpressurePolicy,
        capacity: usize,
        storage: Option<Arc<dyn StorageAdapter>>,
    ) -> Self {
        Self {
            policy,
            capacity,
            state: Mutex::new(State {
                items: VecDeque::new(),
                dropped_oldest_total: 0,
            }),
            not_full: Notify::new(),
            not_empty: Notify::new(),
            storage,
        }
    }

    /// Rehydrate from durable storage, in append order, before the receiver
    /// starts. No-op when no storage is configured.
    pub async fn rehydrate(&self) -> Result<(), signal_storage::StorageError> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        let records = storage.read_all(QUEUE_STORAGE_KEY).await?;
        let mut state = self.state.lock().await;
        for record in records {
            let payload = String::from_utf8_lossy(&record.payload).into_owned();
            state.items.push_back(Entry {
                envelope: RawEnvelope::new(payload),
                storage_id: Some(record.id),
            });
        }
        if !state.items.is_empty() {
            self.not_empty.notify_waiters();
        }
        metrics::gauge!(signal_metrics::QUEUE_DEPTH).set(state.items.len() as f64);
        Ok(())
    }

    pub async fn enqueue(&self, envelope: RawEnvelope) -> EnqueueOutcome {
        loop {
            {
                let mut state = self.state.lock().await;
                if state.items.len() < self.capacity {
                    let storage_id = self.persist(&envelope).await;
                    state.items.push_back(Entry {
                        envelope,
                        storage_id,
                    });
                    metrics::gauge!(signal_metrics::QUEUE_DEPTH).set(state.items.len() as f64);
                    self.not_empty.notify_one();
                    return EnqueueOutcome::Accepted;
                }
                match self.policy {
                    BackpressurePolicy::Block => {}
                    BackpressurePolicy::DropOldest => {
                        if let Some(evicted) = state.items.pop_front() {
                            if let Some(id) = evicted.storage_id {
                                self.delete_persisted(id).await;
                            }
                        }
                        state.dropped_oldest_total += 1;
                        let storage_id = self.persist(&envelope).await;
                        state.items.push_back(Entry {
                            envelope,
                            storage_id,
                        });
                        metrics::counter!(
                            signal_metrics::MESSAGES_DROPPED_TOTAL,
                            "reason" => "drop_oldest"
                        )
                        .increment(1);
                        self.not_empty.notify_one();
                        return EnqueueOutcome::DroppedOldest;
                    }
                    BackpressurePolicy::Reject => {
                        metrics::counter!(
                            signal_metrics::MESSAGES_DROPPED_TOTAL,
                            "reason" => "reject"
                        )
                        .increment(1);
                        return EnqueueOutcome::Rejected;
                    }
                }
            }
            // Only the `block` policy falls through to here: wait for space.
            self.not_full.notified().await;
        }
    }

    pub async fn dequeue(&self) -> DequeuedItem {
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(entry) = state.items.pop_front() {
                    metrics::gauge!(signal_metrics::QUEUE_DEPTH).set(state.items.len() as f64);
                    self.not_full.notify_one();
                    if let Some(id) = entry.storage_id {
                        self.delete_persisted(id).await;
                    }
                    let latency = (signal_protocol::now_ms().saturating_sub(entry.envelope.enqueued_at_ms))
                        as f64
                        / 1000.0;
                    metrics::histogram!(signal_metrics::QUEUE_LATENCY_SECONDS).record(latency);
                    return DequeuedItem {
                        envelope: entry.envelope,
                    };
                }
            }
            self.not_empty.notified().await;
        }
    }

    pub async fn depth(&self) -> usize {
        self.state.lock().await.items.len()
    }

    pub async fn dropped_oldest_total(&self) -> u64 {
        self.state.lock().await.dropped_oldest_total
    }

    async fn persist(&self, envelope: &RawEnvelope) -> Option<i64> {
        match &self.storage {
            None => None,
            Some(storage) => match storage.append(QUEUE_STORAGE_KEY, envelope.payload.as_bytes()).await {
                Ok(id) => Some(id),
                Err(err) => {
                    tracing::error!(error = %err, "failed to persist queue item");
                    None
                }
            },
        }
    }

    async fn delete_persisted(&self, id: i64) {
        if let Some(storage) = &self.storage {
            if let Err(err) = storage.delete(QUEUE_STORAGE_KEY, id).await {
                tracing::error!(error = %err, "failed to delete persisted queue item");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signal_storage::MemoryStorage;
    use std::time::Duration;

    #[tokio::test]
    async fn drop_oldest_evicts_head_and_counts_drop() {
        let queue = BoundedQueue::new(BackpressurePolicy::DropOldest, 2, None);
        queue.enqueue(RawEnvelope::new("a")).await;
        queue.enqueue(RawEnvelope::new("b")).await;
        let outcome = queue.enqueue(RawEnvelope::new("c")).await;
        assert_eq!(outcome, EnqueueOutcome::DroppedOldest);
        let first = queue.dequeue().await;
        assert_eq!(first.envelope.payload, "b");
        let second = queue.dequeue().await;
        assert_eq!(second.envelope.payload, "c");
        assert_eq!(queue.dropped_oldest_total().await, 1);
    }

    #[tokio::test]
    async fn reject_refuses_without_growing_depth() {
        let queue = BoundedQueue::new(BackpressurePolicy::Reject, 1, None);
        queue.enqueue(RawEnvelope::new("a")).await;
        let outcome = queue.enqueue(RawEnvelope::new("b")).await;
        assert_eq!(outcome, EnqueueOutcome::Rejected);
        assert_eq!(queue.depth().await, 1);
    }

    #[tokio::test]
    async fn block_suspends_producer_until_dequeue() {
        let queue = Arc::new(BoundedQueue::new(BackpressurePolicy::Block, 1, None));
        queue.enqueue(RawEnvelope::new("a")).await;

        let producer_queue = queue.clone();
        let producer = tokio::spawn(async move {
            producer_queue.enqueue(RawEnvelope::new("b")).await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        queue.dequeue().await;
        tokio::time::timeout(Duration::from_secs(1), producer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(queue.depth().await, 1);
    }

    #[tokio::test]
    async fn durable_queue_round_trips_across_rehydrate() {
        let storage = Arc::new(MemoryStorage::new());
        let queue = BoundedQueue::new(BackpressurePolicy::Block, 10, Some(storage.clone()));
        queue.enqueue(RawEnvelope::new("first")).await;
        queue.enqueue(RawEnvelope::new("second")).await;

        // Simulates a restart: a fresh queue over the same durable storage,
        // with nothing dequeued (acked) from the crashed instance.
        let rehydrated = BoundedQueue::new(BackpressurePolicy::Block, 10, Some(storage.clone()));
        rehydrated.rehydrate().await.unwrap();
        assert_eq!(rehydrated.depth().await, 2);
        let first = rehydrated.dequeue().await;
        assert_eq!(first.envelope.payload, "first");
        let second = rehydrated.dequeue().await;
        assert_eq!(second.envelope.payload, "second");
    }

    #[tokio::test]
    async fn queue_latency_is_non_negative() {
        let queue = BoundedQueue::new(BackpressurePolicy::Block, 10, None);
        queue.enqueue(RawEnvelope::new("x")).await;
        let item = queue.dequeue().await;
        let latency = signal_protocol::now_ms().saturating_sub(item.envelope.enqueued_at_ms);
        assert!(latency < 5_000);
    }
}
