//! [`Context`]: the single argument passed to a command handler.

use crate::rest_client::{ApiError, SignalApiClient};
use signal_protocol::Message;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Process-local named mutual exclusion for handlers that need to
/// serialize on some key (e.g. a group id). When the storage backend is a
/// shared key-value store in a multi-node deployment this would need to
/// become a cluster-visible compare-and-set lock instead; a single-process
/// bot only needs the in-memory form.
#[derive(Default)]
pub struct NamedLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl NamedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, name: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        mutex.lock_owned().await
    }
}

/// The handler-facing façade over the REST clients, rate limiter, circuit
/// breaker, and structured logging. Constructed fresh by the Worker for
/// each dispatched message.
pub struct Context {
    pub message: Message,
    pub command_name: String,
    pub worker_id: usize,
    api: Arc<SignalApiClient>,
    locks: Arc<NamedLocks>,
    redact_source: bool,
}

impl Context {
    pub fn new(
        message: Message,
        command_name: String,
        worker_id: usize,
        api: Arc<SignalApiClient>,
        locks: Arc<NamedLocks>,
        redact_source: bool,
    ) -> Self {
        Self {
            message,
            command_name,
            worker_id,
            api,
            locks,
            redact_source,
        }
    }

    fn recipient(&self) -> &str {
        self.message
            .group_id
            .as_deref()
            .unwrap_or(&self.message.source)
    }

    /// The source, masked to its last 4 digits unless redaction is disabled.
    pub fn logged_source(&self) -> String {
        if self.redact_source {
            mask_phone_number(&self.message.source)
        } else {
            self.message.source.clone()
        }
    }

    pub async fn send(&self, recipient: &str, text: &str) -> Result<(), ApiError> {
        self.api.send_message(recipient, text, None, None).await
    }

    /// Reply to the triggering message, auto-populating quote fields.
    pub async fn reply(&self, text: &str) -> Result<(), ApiError> {
        self.api
            .send_message(
                self.recipient(),
                text,
                Some(self.message.timestamp),
                Some(&self.message.source),
            )
            .await
    }

    pub async fn react(&self, emoji: &str) -> Result<(), ApiError> {
        self.api
            .send_reaction(
                self.recipient(),
                emoji,
                &self.message.source,
                self.message.timestamp,
                false,
            )
            .await
    }

    pub async fn remove_reaction(&self, emoji: &str) -> Result<(), ApiError> {
        self.api
            .send_reaction(
                self.recipient(),
                emoji,
                &self.message.source,
                self.message.timestamp,
                true,
            )
            .await
    }

    pub async fn start_typing(&self) -> Result<(), ApiError> {
        self.api.set_typing(self.recipient(), false).await
    }

    pub async fn stop_typing(&self) -> Result<(), ApiError> {
        self.api.set_typing(self.recipient(), true).await
    }

    pub async fn download_attachment(&self, attachment_id: &str) -> Result<Vec<u8>, ApiError> {
        self.api.download_attachment(attachment_id).await
    }

    pub async fn lock(&self, name: &str) -> OwnedMutexGuard<()> {
        self.locks.acquire(name).await
    }
}

fn mask_phone_number(source: &str) -> String {
    let visible = 4.min(source.len());
    let (masked, tail) = source.split_at(source.len() - visible);
    format!("{}{}", "*".repeat(masked.len()), tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_phone_number_keeps_last_four_digits() {
        assert_eq!(mask_phone_number("+15550001234"), "********1234");
    }

    #[tokio::test]
    async fn named_locks_serialize_same_name() {
        let locks = NamedLocks::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let locks_ref = Arc::new(locks);
        let l1 = locks_ref.clone();
        let o1 = order.clone();
        let t1 = tokio::spawn(async move {
            let _guard = l1.acquire("group-1").await;
            o1.lock().await.push(1);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            o1.lock().await.push(2);
        });

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let l2 = locks_ref.clone();
        let o2 = order.clone();
        let t2 = tokio::spawn(async move {
            let _guard = l2.acquire("group-1").await;
            o2.lock().await.push(3);
        });

        t1.await.unwrap();
        t2.await.unwrap();
        assert_eq!(*order.lock().await, vec![1, 2, 3]);
    }
}
