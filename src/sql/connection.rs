use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::error::{ErrorExt, QuizError, QuizResult};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS q_table (
    user_id     TEXT    NOT NULL,
    state_hash  TEXT    NOT NULL,
    action      TEXT    NOT NULL,
    q_value     REAL    NOT NULL DEFAULT 0.0,
    version     INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT    NOT NULL,
    updated_at  TEXT    NOT NULL,
    PRIMARY KEY (user_id, state_hash, action)
);
CREATE INDEX IF NOT EXISTS idx_q_table_state ON q_table (user_id, state_hash);

CREATE TABLE IF NOT EXISTS attempts (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     TEXT    NOT NULL,
    question_id TEXT,
    difficulty  TEXT    NOT NULL,
    is_correct  INTEGER NOT NULL,
    time_spent  REAL    NOT NULL DEFAULT 0.0,
    created_at  TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_attempts_user_difficulty ON attempts (user_id, difficulty, id);

CREATE TABLE IF NOT EXISTS profiles (
    user_id         TEXT    PRIMARY KEY,
    level           TEXT    NOT NULL,
    xp              INTEGER NOT NULL DEFAULT 0,
    total_xp        INTEGER NOT NULL DEFAULT 0,
    streak_correct  INTEGER NOT NULL DEFAULT 0,
    last_difficulty TEXT,
    updated_at      TEXT    NOT NULL
);
";

/// Represents a database connection shared by the SQLite stores
#[derive(Debug, Clone)]
pub struct DbConnection {
    /// Path to the database file
    path: PathBuf,
    /// Connection to the database
    connection: Arc<Mutex<Connection>>,
}

/// Type of database connection
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConnectionType {
    /// In-memory database
    Memory,
    /// File-based database
    File,
}

impl DbConnection {
    /// Open a connection and create the schema if needed
    pub fn open(path: Option<impl AsRef<Path>>) -> QuizResult<Self> {
        let (path_buf, conn) = match path {
            Some(path) => {
                let path_buf = PathBuf::from(path.as_ref());
                debug!("Opening database connection to {}", path_buf.display());
                let conn = Connection::open(&path_buf).storage_context("open")?;
                (path_buf, conn)
            }
            None => {
                debug!("Opening in-memory database connection");
                let conn = Connection::open_in_memory().storage_context("open")?;
                (PathBuf::from(":memory:"), conn)
            }
        };

        let db = Self {
            path: path_buf,
            connection: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Get the connection type
    pub fn connection_type(&self) -> ConnectionType {
        if self.path.to_string_lossy() == ":memory:" {
            ConnectionType::Memory
        } else {
            ConnectionType::File
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn migrate(&self) -> QuizResult<()> {
        self.with_connection("migrate", |conn| {
            // WAL only applies to files; in-memory databases report "memory"
            conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
            conn.busy_timeout(std::time::Duration::from_secs(5))?;
            conn.execute_batch(SCHEMA)
        })
    }

    /// Run `f` on the locked connection; any failure is a storage error for `operation`
    pub fn with_connection<T, F>(&self, operation: &str, f: F) -> QuizResult<T>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T>,
    {
        let mut conn = self
            .connection
            .lock()
            .map_err(|_| QuizError::storage(operation, "connection mutex poisoned"))?;
        f(&mut conn).storage_context(operation)
    }
}
