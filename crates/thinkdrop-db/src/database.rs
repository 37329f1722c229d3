use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;
use thinkdrop_common::{Error, Result};
use tracing::{info, warn};

use crate::migrations;

const OPEN_ATTEMPTS: u32 = 5;
const OPEN_BACKOFF_BASE_SECS: u64 = 3;

/// Shared handle to the single local database file.
///
/// All stores go through this one connection; SQLite serialises writers
/// internally and WAL keeps readers concurrent.
pub struct Database {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Database {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        info!("opening database at {}", db_path.display());
        let conn = Connection::open(db_path).map_err(map_open_error)?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| Error::Database(format!("failed to set busy timeout: {e}")))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        let db = Self {
            conn: Mutex::new(conn),
            path: Some(db_path.to_path_buf()),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open with the bounded retry schedule for lock contention:
    /// up to 5 attempts, sleeping `3s * attempt` between them.
    pub async fn open_with_retry(db_path: &Path) -> Result<Self> {
        let mut last_err = None;
        for attempt in 1..=OPEN_ATTEMPTS {
            match Self::open(db_path) {
                Ok(db) => return Ok(db),
                Err(e) if e.is_retryable() => {
                    let delay = Duration::from_secs(OPEN_BACKOFF_BASE_SECS * u64::from(attempt));
                    warn!(
                        "database locked (attempt {attempt}/{OPEN_ATTEMPTS}), retrying in {}s",
                        delay.as_secs()
                    );
                    last_err = Some(e);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| Error::Database("database open failed".into())))
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        let db = Self {
            conn: Mutex::new(conn),
            path: None,
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.connection()?;
        for migration in migrations::ALL {
            conn.execute_batch(migration.sql).map_err(|e| {
                Error::Database(format!("migration {} failed: {e}", migration.name))
            })?;
        }
        Ok(())
    }

    pub(crate) fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("database lock poisoned".into()))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Truncate the WAL into the main file. Part of the retention purge
    /// sequence and of graceful shutdown.
    pub fn checkpoint(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
            .map_err(|e| Error::Database(format!("wal checkpoint failed: {e}")))
    }
}

fn map_open_error(e: rusqlite::Error) -> Error {
    if let rusqlite::Error::SqliteFailure(code, ref msg) = e
        && matches!(
            code.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        )
    {
        return Error::StoreUnavailable(
            msg.clone().unwrap_or_else(|| "database file is locked".into()),
        );
    }
    Error::Database(format!("failed to open database: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_creates_all_tables() {
        let db = Database::in_memory().expect("failed to create in-memory database");
        let conn = db.connection().expect("lock should not be poisoned");

        for table in [
            "memory",
            "memory_entities",
            "skill_prompts",
            "context_rules",
            "installed_skills",
        ] {
            let exists: i64 = conn
                .query_row(
                    "SELECT count(*) FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |row| row.get(0),
                )
                .expect("failed to query sqlite_master");
            assert_eq!(exists, 1, "missing table {table}");
        }
    }

    #[test]
    fn migrations_are_idempotent() {
        let db = Database::in_memory().expect("failed to create in-memory database");
        db.run_migrations().expect("second run should be a no-op");
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let nested = dir.path().join("data").join("user_memory.db");

        let db = Database::open(&nested).expect("open should create parents");
        assert!(nested.exists());
        assert_eq!(db.path(), Some(nested.as_path()));
    }
}
