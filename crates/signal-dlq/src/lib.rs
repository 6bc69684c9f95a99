//! Dead Letter Queue: persists failed messages with exponential-backoff
//! retry scheduling, bounded by `max_attempts`.

use serde::{Deserialize, Serialize};
use signal_protocol::RawEnvelope;
use signal_resilience::jittered;
use std::sync::Arc;
use std::time::Duration;
use signal_storage::StorageAdapter;
use tokio::sync::mpsc;

pub const DLQ_STORAGE_KEY: &str = "dlq";

#[derive(Debug, Clone, Copy)]
pub struct DlqConfig {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
    pub jitter: f64,
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(5),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(300),
            jitter: 0.1,
        }
    }
}

impl DlqConfig {
    /// `min(initial_backoff * multiplier^attempts, max_backoff)`, then
    /// jittered by a factor drawn from `[1 - jitter, 1 + jitter]`.
    pub fn backoff_for(&self, attempts: u32) -> Duration {
        let unjittered = self.initial_backoff.as_secs_f64() * self.multiplier.powi(attempts as i32);
        let capped = unjittered.min(self.max_backoff.as_secs_f64());
        jittered(Duration::from_secs_f64(capped), self.jitter)
    }
}

/// A persisted failed message plus its retry bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
    pub payload: String,
    pub last_error_kind: String,
    pub last_error_message: String,
    pub attempts: u32,
    pub next_attempt_at_ms: u64,
    pub first_failed_at_ms: u64,
}

/// A `DlqEntry` plus the storage id it was persisted under.
#[derive(Debug, Clone)]
pub struct StoredDlqEntry {
    pub id: i64,
    pub entry: DlqEntry,
}

/// Appends failures and scans for due retries. Retries are handed back to
/// the caller (the main queue's producer side) via `re_enqueue`.
pub struct DeadLetterQueue {
    storage: Arc<dyn StorageAdapter>,
    config: DlqConfig,
}

impl DeadLetterQueue {
    pub fn new(storage: Arc<dyn StorageAdapter>, config: DlqConfig) -> Self {
        Self { storage, config }
    }

    /// Record a failed handler attempt. `attempts` is the attempt number
    /// that just failed (0 on first failure). When `attempts + 1` would
    /// exceed `max_attempts`, the entry is still persisted (for the backlog
    /// gauge and for operator inspection) but `next_attempt_at_ms` is set
    /// far enough out that the scheduler never picks it up automatically.
    pub async fn push(
        &self,
        envelope: &RawEnvelope,
        error_kind: &str,
        error_message: &str,
        attempts: u32,
        terminal: bool,
    ) -> Result<(), signal_storage::StorageError> {
        let now = signal_protocol::now_ms();
        let next_attempt_at_ms = if terminal || attempts + 1 >= self.config.max_attempts {
            u64::MAX
        } else {
            now + self.config.backoff_for(attempts).as_millis() as u64
        };
        let entry = DlqEntry {
            payload: envelope.payload.clone(),
            last_error_kind: error_kind.to_string(),
            last_error_message: error_message.to_string(),
            attempts: attempts + 1,
            next_attempt_at_ms,
            first_failed_at_ms: now,
        };
        let bytes = serde_json::to_vec(&entry).expect("DlqEntry serializes");
        self.storage.append(DLQ_STORAGE_KEY, &bytes).await?;
        metrics::gauge!(signal_metrics::DLQ_BACKLOG).increment(1.0);
        Ok(())
    }

    /// All persisted entries, most-recently-appended last.
    pub async fn all(&self) -> Result<Vec<StoredDlqEntry>, signal_storage::StorageError> {
        let records = self.storage.read_all(DLQ_STORAGE_KEY).await?;
        Ok(records
            .into_iter()
            .filter_map(|r| {
                serde_json::from_slice::<DlqEntry>(&r.payload)
                    .ok()
                    .map(|entry| StoredDlqEntry { id: r.id, entry })
            })
            .collect())
    }

    async fn due_entries(&self, now_ms: u64) -> Result<Vec<StoredDlqEntry>, signal_storage::StorageError> {
        Ok(self
            .all()
            .await?
            .into_iter()
            .filter(|e| e.entry.next_attempt_at_ms <= now_ms)
            .collect())
    }

    async fn remove(&self, id: i64) -> Result<(), signal_storage::StorageError> {
        self.storage.delete(DLQ_STORAGE_KEY, id).await?;
        metrics::gauge!(signal_metrics::DLQ_BACKLOG).decrement(1.0);
        Ok(())
    }

    pub async fn backlog_len(&self) -> Result<usize, signal_storage::StorageError> {
        Ok(self.all().await?.len())
    }
}

/// Background loop: scan due entries at `poll_interval`, re-enqueue each via
/// `sender`, and delete it from storage. Runs until `cancel` fires.
pub async fn run_scheduler(
    dlq: Arc<DeadLetterQueue>,
    sender: mpsc::Sender<RawEnvelope>,
    poll_interval: Duration,
    mut cancel: tokio::sync::watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    loop {
        tokio::select! {
            biased;
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let now = signal_protocol::now_ms();
                match dlq.due_entries(now).await {
                    Ok(due) => {
                        for stored in due {
                            let envelope = RawEnvelope::with_attempt_count(
                                stored.entry.payload.clone(),
                                stored.entry.attempts,
                            );
                            if sender.send(envelope).await.is_err() {
                                break;
                            }
                            if let Err(err) = dlq.remove(stored.id).await {
                                tracing::error!(error = %err, "failed to remove replayed DLQ entry");
                            }
                        }
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "failed to scan DLQ for due entries");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signal_storage::MemoryStorage;

    fn config(jitter: f64) -> DlqConfig {
        DlqConfig {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(5),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(300),
            jitter,
        }
    }

    #[test]
    fn backoff_grows_geometrically_and_caps() {
        let cfg = config(0.0);
        assert_eq!(cfg.backoff_for(0), Duration::from_secs(5));
        assert_eq!(cfg.backoff_for(1), Duration::from_secs(10));
        assert_eq!(cfg.backoff_for(2), Duration::from_secs(20));
        assert_eq!(cfg.backoff_for(10), Duration::from_secs(300));
    }

    #[test]
    fn backoff_jitter_stays_within_bounds() {
        let cfg = config(0.1);
        for _ in 0..100 {
            let d = cfg.backoff_for(1).as_secs_f64();
            assert!((9.0..=11.0).contains(&d), "jittered backoff {d} out of range");
        }
    }

    #[tokio::test]
    async fn push_persists_entry_and_backlog_grows() {
        let storage = Arc::new(MemoryStorage::new());
        let dlq = DeadLetterQueue::new(storage, config(0.0));
        let envelope = RawEnvelope::new("payload");
        dlq.push(&envelope, "transient_network", "boom", 0, false)
            .await
            .unwrap();
        assert_eq!(dlq.backlog_len().await.unwrap(), 1);
        let entries = dlq.all().await.unwrap();
        assert_eq!(entries[0].entry.attempts, 1);
    }

    #[tokio::test]
    async fn attempt_count_threaded_through_replay_eventually_caps_retries() {
        let storage = Arc::new(MemoryStorage::new());
        let dlq = DeadLetterQueue::new(
            storage,
            DlqConfig {
                max_attempts: 3,
                ..config(0.0)
            },
        );

        // First failure: a fresh envelope has never been attempted before.
        let envelope = RawEnvelope::new("payload");
        assert_eq!(envelope.attempt_count, 0);
        dlq.push(&envelope, "transient_network", "boom", envelope.attempt_count, false)
            .await
            .unwrap();
        let entries = dlq.all().await.unwrap();
        assert_eq!(entries[0].entry.attempts, 1);
        assert!(entries[0].entry.next_attempt_at_ms < u64::MAX);

        // Replay carries the stored attempt count onto the new envelope, as
        // `run_scheduler` does.
        let replay = RawEnvelope::with_attempt_count("payload", entries[0].entry.attempts);
        assert_eq!(replay.attempt_count, 1);
        dlq.remove(entries[0].id).await.unwrap();
        dlq.push(&replay, "transient_network", "boom again", replay.attempt_count, false)
            .await
            .unwrap();
        let entries = dlq.all().await.unwrap();
        assert_eq!(entries[0].entry.attempts, 2);
        assert!(entries[0].entry.next_attempt_at_ms < u64::MAX);

        // Third failure reaches max_attempts: the entry is parked forever.
        let replay2 = RawEnvelope::with_attempt_count("payload", entries[0].entry.attempts);
        dlq.remove(entries[0].id).await.unwrap();
        dlq.push(&replay2, "transient_network", "boom thrice", replay2.attempt_count, false)
            .await
            .unwrap();
        let entries = dlq.all().await.unwrap();
        assert_eq!(entries[0].entry.attempts, 3);
        assert_eq!(entries[0].entry.next_attempt_at_ms, u64::MAX);
        assert!(dlq.due_entries(u64::MAX - 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn terminal_failure_is_never_due() {
        let storage = Arc::new(MemoryStorage::new());
        let dlq = DeadLetterQueue::new(storage, config(0.0));
        let envelope = RawEnvelope::new("payload");
        dlq.push(&envelope, "terminal_unparseable", "bad json", 0, true)
            .await
            .unwrap();
        let due = dlq.due_entries(u64::MAX - 1).await.unwrap();
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn scheduler_replays_due_entries_and_clears_backlog() {
        let storage = Arc::new(MemoryStorage::new());
        let dlq = Arc::new(DeadLetterQueue::new(
            storage,
            DlqConfig {
                initial_backoff: Duration::from_millis(1),
                ..config(0.0)
            },
        ));
        let envelope = RawEnvelope::new("retry-me");
        dlq.push(&envelope, "transient_network", "boom", 0, false)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let (tx, mut rx) = mpsc::channel(4);
        let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
        let scheduler = tokio::spawn(run_scheduler(
            dlq.clone(),
            tx,
            Duration::from_millis(1),
            cancel_rx,
        ));

        let replayed = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(replayed.payload, "retry-me");

        cancel_tx.send(true).unwrap();
        scheduler.await.unwrap();
        assert_eq!(dlq.backlog_len().await.unwrap(), 0);
    }
}
