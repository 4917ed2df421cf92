
use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use log::error;
use rusqlite::{params, Connection};

use crate::error::Result;

const STATE_FAILED: i64 = 0;
const STATE_SUCCEEDED: i64 = 1;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS files (
    path TEXT PRIMARY KEY,
    state INTEGER NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0
)";

/// Durable per-path delivery record. Every operation is serialised by one
/// mutex; on the first unrecoverable store error the ledger disposes itself
/// and silently degrades to a no-op (`exists` answers false, pops answer
/// empty), which callers must treat as valid.
pub struct Ledger {
    connection: Mutex<Option<Connection>>,
    fail_limit: u32,
}

impl Ledger {
    pub fn open(path: &Path, fail_limit: u32) -> Result<Self> {
        Self::with_connection(Connection::open(path)?, fail_limit)
    }

    pub fn open_in_memory(fail_limit: u32) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, fail_limit)
    }

    fn with_connection(connection: Connection, fail_limit: u32) -> Result<Self> {
        connection.execute(SCHEMA, [])?;
        Ok(Ledger {
            connection: Mutex::new(Some(connection)),
            fail_limit,
        })
    }

    /// Record a failed push for `path`, incrementing its attempt counter.
    pub fn mark_failed(&self, path: &Path) {
        let path = path.to_string_lossy().into_owned();
        self.run((), |connection| {
            connection.execute(
                "INSERT INTO files (path, state, attempts) VALUES (?1, ?2, 1)
                 ON CONFLICT(path) DO UPDATE SET state = ?2, attempts = attempts + 1",
                params![path, STATE_FAILED],
            )?;
            Ok(())
        });
    }

    /// Record a successful delivery, dropping any failed row for `path` in
    /// the same transaction.
    pub fn mark_succeeded(&self, path: &Path) {
        let path = path.to_string_lossy().into_owned();
        self.run((), |connection| {
            let tx = connection.transaction()?;
            tx.execute(
                "DELETE FROM files WHERE path = ?1 AND state = ?2",
                params![path, STATE_FAILED],
            )?;
            tx.execute(
                "INSERT INTO files (path, state, attempts) VALUES (?1, ?2, 0)
                 ON CONFLICT(path) DO UPDATE SET state = ?2, attempts = 0",
                params![path, STATE_SUCCEEDED],
            )?;
            tx.commit()?;
            Ok(())
        });
    }

    /// True iff any row, in either state, exists for `path`.
    pub fn exists(&self, path: &Path) -> bool {
        let path = path.to_string_lossy().into_owned();
        self.run(false, |connection| {
            let mut statement = connection.prepare("SELECT 1 FROM files WHERE path = ?1")?;
            statement.exists(params![path])
        })
    }

    /// Up to `limit` failed paths still under the attempt limit. Not a true
    /// pop: rows stay until the upload succeeds or maintenance removes
    /// them, and tombstoned rows are skipped.
    pub fn pop_failed(&self, limit: u32) -> Vec<PathBuf> {
        let fail_limit = self.fail_limit;
        self.run(Vec::new(), |connection| {
            let mut statement = connection.prepare(
                "SELECT path FROM files WHERE state = ?1 AND attempts < ?2 LIMIT ?3",
            )?;
            let rows = statement.query_map(params![STATE_FAILED, fail_limit, limit], |row| {
                row.get::<_, String>(0)
            })?;
            rows.map(|row| row.map(PathBuf::from)).collect()
        })
    }

    /// Every recorded path, regardless of state.
    pub fn pop_all(&self) -> Vec<PathBuf> {
        self.run(Vec::new(), |connection| {
            let mut statement = connection.prepare("SELECT path FROM files")?;
            let rows = statement.query_map([], |row| row.get::<_, String>(0))?;
            rows.map(|row| row.map(PathBuf::from)).collect()
        })
    }

    pub fn remove(&self, path: &Path) {
        let path = path.to_string_lossy().into_owned();
        self.run((), |connection| {
            connection.execute("DELETE FROM files WHERE path = ?1", params![path])?;
            Ok(())
        });
    }

    #[cfg(test)]
    pub fn attempts(&self, path: &Path) -> Option<u32> {
        let path = path.to_string_lossy().into_owned();
        self.run(None, |connection| {
            let mut statement = connection.prepare("SELECT attempts FROM files WHERE path = ?1")?;
            let mut rows = statement.query_map(params![path], |row| row.get::<_, u32>(0))?;
            rows.next().transpose()
        })
    }

    fn run<T>(&self, default: T, operation: impl FnOnce(&mut Connection) -> rusqlite::Result<T>) -> T {
        let mut guard = match self.connection.lock() {
            Ok(guard) => guard,
            Err(_) => return default,
        };
        let Some(connection) = guard.as_mut() else {
            return default;
        };

        match operation(connection) {
            Ok(value) => value,
            Err(err) => {
                error!("ledger store failed and is now disabled: {err}");
                *guard = None;
                default
            }
        }
    }
}
