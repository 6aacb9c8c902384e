//! Shared SQLite store.
//!
//! Every conditional write in this crate is a single SQL statement executed
//! while the mutex is held, so the statement's `WHERE` clause is the
//! compare half of a compare-and-set and the affected-row count is its
//! result.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

use actuator_core::error::ActuatorError;

use crate::migrations;

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path.
    ///
    /// Configures WAL mode, synchronous=NORMAL, a busy timeout so that
    /// several processes can share one file, and runs pending migrations.
    pub fn new(path: &Path) -> Result<Self, ActuatorError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| ActuatorError::Storage(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| ActuatorError::Storage(format!("Failed to set pragmas: {}", e)))?;

        info!("Database opened at {}", path.display());

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Private in-memory store with the full schema.
    pub fn in_memory() -> Result<Self, ActuatorError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ActuatorError::Storage(format!("Failed to open in-memory db: {}", e)))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| ActuatorError::Storage(format!("Failed to set pragmas: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Run `f` against the connection. No other caller in this process
    /// touches the store until `f` returns.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, ActuatorError>
    where
        F: FnOnce(&Connection) -> Result<T, ActuatorError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ActuatorError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

/// Map a rusqlite error into a storage error with context.
pub(crate) fn sql_err(context: &'static str) -> impl Fn(rusqlite::Error) -> ActuatorError {
    move |e| ActuatorError::Storage(format!("{}: {}", context, e))
}
