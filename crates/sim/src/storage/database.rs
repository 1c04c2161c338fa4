//! Low-level database operations and schema management.

use crate::errors::StorageError;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::time::Duration;

/// How long a connection waits for a lock held by another item's writer.
const BUSY_TIMEOUT: Duration = Duration::from_secs(60);

/// Database connection wrapper with schema management.
#[derive(Debug)]
pub struct Database {
    conn: Connection,
    db_path: String,
}

impl Database {
    /// Open (or create) a database at the specified path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let conn =
            Connection::open(&path_str).map_err(|e| StorageError::Connection(e.to_string()))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        // Repertoires are written in bulk, one transaction each
        conn.execute_batch(
            "PRAGMA synchronous = NORMAL;
             PRAGMA journal_mode = WAL;
             PRAGMA temp_store = MEMORY;
             PRAGMA cache_size = -64000;",
        )
        .map_err(|e| StorageError::Initialization(e.to_string()))?;

        let mut db = Self {
            conn,
            db_path: path_str,
        };

        db.initialize_schema()?;
        Ok(db)
    }

    fn initialize_schema(&mut self) -> Result<(), StorageError> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS metadata (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                -- One row per repertoire; labels are a JSON object
                CREATE TABLE IF NOT EXISTS repertoires (
                    repertoire_id TEXT PRIMARY KEY,
                    item_name TEXT NOT NULL,
                    subject_id TEXT NOT NULL,
                    element_count INTEGER NOT NULL,
                    labels TEXT NOT NULL,
                    created_at INTEGER NOT NULL
                );

                -- Column data, bincode encoded
                CREATE TABLE IF NOT EXISTS repertoire_columns (
                    repertoire_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    data BLOB NOT NULL,
                    PRIMARY KEY (repertoire_id, name)
                );

                CREATE INDEX IF NOT EXISTS idx_repertoires_item ON repertoires(item_name);",
            )
            .map_err(|e| StorageError::Initialization(e.to_string()))?;

        Ok(())
    }

    /// Begin a transaction for batched operations.
    pub fn transaction(&mut self) -> Result<Transaction<'_>, StorageError> {
        self.conn
            .transaction()
            .map_err(|e| StorageError::Transaction(e.to_string()))
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Insert or replace a metadata entry.
    pub fn set_metadata(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(|e| StorageError::Insert(e.to_string()))?;
        Ok(())
    }

    pub fn metadata(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .conn
            .query_row("SELECT value FROM metadata WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    /// Close the database and clean up WAL files.
    pub fn close(self) -> Result<(), StorageError> {
        if let Err(e) = self.conn.execute_batch(
            "PRAGMA wal_checkpoint(TRUNCATE);
             PRAGMA journal_mode = DELETE;",
        ) {
            log::warn!("Failed to checkpoint/truncate WAL: {e}");
        }

        self.conn
            .close()
            .map_err(|(_conn, e)| StorageError::Close(e.to_string()))?;

        for suffix in &["-wal", "-shm"] {
            let fname = format!("{}{}", self.db_path, suffix);
            if let Err(e) = std::fs::remove_file(&fname) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("Failed to remove {fname}: {e}");
                }
            }
        }

        Ok(())
    }

    /// Get database statistics.
    pub fn stats(&self) -> Result<DatabaseStats, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")?;
        let tables = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let repertoires: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM repertoires", [], |row| row.get(0))?;
        let sequences: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(element_count), 0) FROM repertoires",
            [],
            |row| row.get(0),
        )?;

        Ok(DatabaseStats {
            repertoires: repertoires as usize,
            sequences: sequences as usize,
            tables,
        })
    }
}

/// Database statistics.
#[derive(Debug, Clone)]
pub struct DatabaseStats {
    pub repertoires: usize,
    pub sequences: usize,
    pub tables: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_schema_initialization() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.sqlite");

        let db = Database::open(&path).expect("Failed to create database");
        let stats = db.stats().expect("Failed to get stats");

        assert!(stats.tables.contains(&"metadata".to_string()));
        assert!(stats.tables.contains(&"repertoires".to_string()));
        assert!(stats.tables.contains(&"repertoire_columns".to_string()));
        assert_eq!(stats.repertoires, 0);

        db.close().expect("Failed to close database");
        assert!(path.exists());
        assert!(!dir.path().join("store.sqlite-wal").exists());
    }

    #[test]
    fn test_metadata_roundtrip() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("meta.sqlite")).unwrap();
        assert_eq!(db.metadata("config").unwrap(), None);
        db.set_metadata("config", "{}").unwrap();
        db.set_metadata("config", "{\"a\": 1}").unwrap();
        assert_eq!(db.metadata("config").unwrap().as_deref(), Some("{\"a\": 1}"));
        db.close().unwrap();
    }

    #[test]
    fn test_uncommitted_transaction_rolls_back() {
        let dir = tempdir().unwrap();
        let mut db = Database::open(dir.path().join("tx.sqlite")).unwrap();
        {
            let tx = db.transaction().unwrap();
            tx.execute(
                "INSERT INTO metadata (key, value) VALUES ('k', 'v')",
                [],
            )
            .unwrap();
        }
        assert_eq!(db.metadata("k").unwrap(), None);
        db.close().unwrap();
    }
}
