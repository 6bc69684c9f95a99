//! Pluggable append-only storage for the durable queue and the DLQ.
//!
//! Three interchangeable backends implement [`StorageAdapter`]: an
//! in-memory one for tests and non-durable deployments, an embedded-SQL one
//! (SQLite) for single-node durability, and a key-value one for a simpler
//! on-disk representation. The queue and DLQ import only the trait.

mod embedded_sql;
mod key_value;
mod memory;

pub use embedded_sql::EmbeddedSqlStorage;
pub use key_value::KeyValueStorage;
pub use memory::MemoryStorage;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("integrity check failed: {0}")]
    IntegrityCheckFailed(String),
    #[error("no record with id {0}")]
    NotFound(i64),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One persisted record: an opaque payload plus the id the backend assigned
/// it. Ordering of `read_all` is append order.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub id: i64,
    pub payload: Vec<u8>,
}

/// An append-only durable log, shared by the durable queue and the dead
/// letter queue.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn append(&self, key: &str, payload: &[u8]) -> Result<i64, StorageError>;
    async fn read_all(&self, key: &str) -> Result<Vec<StoredRecord>, StorageError>;
    async fn delete(&self, key: &str, id: i64) -> Result<(), StorageError>;
    async fn close(&self) -> Result<(), StorageError>;
}

#[cfg(test)]
mod contract_tests {
    use super::*;

    async fn exercise(adapter: &dyn StorageAdapter) {
        assert!(adapter.read_all("q").await.unwrap().is_empty());
        let id1 = adapter.append("q", b"one").await.unwrap();
        let id2 = adapter.append("q", b"two").await.unwrap();
        assert_ne!(id1, id2);
        let all = adapter.read_all("q").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].payload, b"one");
        assert_eq!(all[1].payload, b"two");
        adapter.delete("q", id1).await.unwrap();
        let remaining = adapter.read_all("q").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, id2);
    }

    #[tokio::test]
    async fn memory_adapter_satisfies_contract() {
        exercise(&MemoryStorage::new()).await;
    }

    #[tokio::test]
    async fn embedded_sql_adapter_satisfies_contract() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let adapter = EmbeddedSqlStorage::open(file.path()).unwrap();
        exercise(&adapter).await;
    }

    #[tokio::test]
    async fn key_value_adapter_satisfies_contract() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let adapter = KeyValueStorage::open(file.path()).unwrap();
        exercise(&adapter).await;
    }
}
