use crate::{StorageAdapter, StorageError, StoredRecord};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Mutex;

/// A minimal key-value-shaped durable log: a single `kv` table of
/// `(full_key, payload)` pairs with no secondary index, modeling what a
/// key-value store backend (as opposed to a relational one) would expose.
/// Synthesizes ids as `log_key` + a per-key counter rather than relying on
/// row autoincrement, since a real KV store has no such built-in concept.
pub struct KeyValueStorage {
    conn: Mutex<Connection>,
}

impl KeyValueStorage {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             CREATE TABLE IF NOT EXISTS kv (
                 full_key TEXT PRIMARY KEY,
                 log_key TEXT NOT NULL,
                 seq INTEGER NOT NULL,
                 payload BLOB NOT NULL
             );
             CREATE TABLE IF NOT EXISTS kv_counters (
                 log_key TEXT PRIMARY KEY,
                 next_seq INTEGER NOT NULL
             );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE kv (full_key TEXT PRIMARY KEY, log_key TEXT NOT NULL, seq INTEGER NOT NULL, payload BLOB NOT NULL);
             CREATE TABLE kv_counters (log_key TEXT PRIMARY KEY, next_seq INTEGER NOT NULL);",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn next_seq(conn: &Connection, log_key: &str) -> Result<i64, StorageError> {
        let existing: Option<i64> = conn
            .query_row(
                "SELECT next_seq FROM kv_counters WHERE log_key = ?1",
                params![log_key],
                |row| row.get(0),
            )
            .optional()?;
        let seq = existing.unwrap_or(1);
        conn.execute(
            "INSERT INTO kv_counters (log_key, next_seq) VALUES (?1, ?2)
             ON CONFLICT(log_key) DO UPDATE SET next_seq = excluded.next_seq",
            params![log_key, seq + 1],
        )?;
        Ok(seq)
    }
}

#[async_trait]
impl StorageAdapter for KeyValueStorage {
    async fn append(&self, key: &str, payload: &[u8]) -> Result<i64, StorageError> {
        let conn = self.conn.lock().unwrap();
        let seq = Self::next_seq(&conn, key)?;
        let full_key = format!("{key}:{seq}");
        conn.execute(
            "INSERT INTO kv (full_key, log_key, seq, payload) VALUES (?1, ?2, ?3, ?4)",
            params![full_key, key, seq, payload],
        )?;
        Ok(seq)
    }

    async fn read_all(&self, key: &str) -> Result<Vec<StoredRecord>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT seq, payload FROM kv WHERE log_key = ?1 ORDER BY seq ASC")?;
        let rows = stmt
            .query_map(params![key], |row| {
                Ok(StoredRecord {
                    id: row.get(0)?,
                    payload: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn delete(&self, key: &str, id: i64) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        let full_key = format!("{key}:{id}");
        conn.execute("DELETE FROM kv WHERE full_key = ?1", params![full_key])?;
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
