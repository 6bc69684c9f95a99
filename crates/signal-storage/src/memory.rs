use crate::{StorageAdapter, StorageError, StoredRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Non-durable in-process log. Valid for tests and for runs with
/// `durable_queue_enabled = false`.
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<HashMap<String, Vec<StoredRecord>>>,
    next_id: Mutex<i64>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
    async fn append(&self, key: &str, payload: &[u8]) -> Result<i64, StorageError> {
        let id = {
            let mut next_id = self.next_id.lock().unwrap();
            *next_id += 1;
            *next_id
        };
        self.inner
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push(StoredRecord {
                id,
                payload: payload.to_vec(),
            });
        Ok(id)
    }

    async fn read_all(&self, key: &str) -> Result<Vec<StoredRecord>, StorageError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete(&self, key: &str, id: i64) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(records) = inner.get_mut(key) {
            records.retain(|r| r.id != id);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
