use chrono::Utc;
use rusqlite::{OptionalExtension, params};
use std::path::Path;

use super::database::Database;
use super::ensure_parent_dir;
use crate::error::StorageError;

/// Persists the session token (single row).
pub struct SessionDatabase {
    db: Database,
}

impl SessionDatabase {
    pub fn with_path<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        ensure_parent_dir(path.as_ref())?;
        Self::init(Database::new(path)?)
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        Self::init(Database::in_memory()?)
    }

    fn init(db: Database) -> Result<Self, StorageError> {
        db.with_connection(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS session (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    token TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                )",
                [],
            )
        })?;
        Ok(Self { db })
    }

    pub fn token(&self) -> Result<Option<String>, StorageError> {
        self.db.with_connection(|conn| {
            conn.query_row("SELECT token FROM session WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()
        })
    }

    pub fn save_token(&self, token: &str) -> Result<(), StorageError> {
        self.db.with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO session (id, token, updated_at) VALUES (1, ?1, ?2)",
                params![token, Utc::now().timestamp()],
            )
        })?;
        Ok(())
    }

    pub fn clear_token(&self) -> Result<(), StorageError> {
        self.db
            .with_connection(|conn| conn.execute("DELETE FROM session", []))?;
        Ok(())
    }
}
