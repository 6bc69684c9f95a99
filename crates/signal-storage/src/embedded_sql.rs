use crate::{StorageAdapter, StorageError, StoredRecord};
use async_trait::async_trait;
use rusqlite::{Connection, params};
use std::path::Path;
use std::sync::Mutex;

/// SQLite-backed durable log.
///
/// Applies WAL + synchronous=FULL at open and runs `PRAGMA integrity_check`
/// before accepting the connection, matching the durability posture used
/// elsewhere in this codebase for on-disk logs.
pub struct EmbeddedSqlStorage {
    conn: Mutex<Connection>,
}

impl EmbeddedSqlStorage {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        apply_pragmas(&conn)?;
        run_integrity_check(&conn)?;
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn apply_pragmas(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=FULL;
         PRAGMA wal_autocheckpoint=1000;
         PRAGMA foreign_keys=ON;",
    )?;
    Ok(())
}

fn run_integrity_check(conn: &Connection) -> Result<(), StorageError> {
    let result: String = conn.pragma_query_value(None, "integrity_check", |row| row.get(0))?;
    if result != "ok" {
        return Err(StorageError::IntegrityCheckFailed(result));
    }
    Ok(())
}

#[async_trait]
impl StorageAdapter for EmbeddedSqlStorage {
    async fn append(&self, key: &str, payload: &[u8]) -> Result<i64, StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO log_entries (log_key, payload) VALUES (?1, ?2)",
            params![key, payload],
        )?;
        Ok(conn.last_insert_rowid())
    }

    async fn read_all(&self, key: &str) -> Result<Vec<StoredRecord>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT id, payload FROM log_entries WHERE log_key = ?1 ORDER BY id ASC")?;
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
        conn.execute(
            "DELETE FROM log_entries WHERE log_key = ?1 AND id = ?2",
            params![key, id],
        )?;
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn survives_across_separate_handles_to_same_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        {
            let storage = EmbeddedSqlStorage::open(file.path()).unwrap();
            storage.append("q", b"payload").await.unwrap();
        }
        let storage = EmbeddedSqlStorage::open(file.path()).unwrap();
        let all = storage.read_all("q").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].payload, b"payload");
    }
}
