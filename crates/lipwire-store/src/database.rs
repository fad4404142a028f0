//! Database connection management.
//!
//! The [`Store`] owns a [`rusqlite::Connection`] behind a mutex and
//! guarantees that migrations are run before any other operation. Every
//! operation is a short synchronous critical section; callers on the async
//! side treat the store as a service and never hold the lock across a
//! suspension point.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use directories::ProjectDirs;
use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::migrations;

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the default application database.
    ///
    /// The database file is placed in the platform-appropriate data
    /// directory, e.g. `~/.local/share/lipwire/lipwire.db` on Linux.
    pub fn open_default() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("io", "lipwire", "lipwire").ok_or(StoreError::NoDataDir)?;

        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        Self::open_at(&data_dir.join("lipwire.db"))
    }

    /// Open (or create) a database at an explicit path. Useful for tests and
    /// for deployments with their own directory layout.
    pub fn open_at(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "opening database");
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// An in-memory database; used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        // WAL only applies to file-backed databases.
        if conn.path().is_some_and(|p| !p.is_empty()) {
            conn.pragma_update(None, "journal_mode", "WAL")?;
        }
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn().path().map(PathBuf::from)
    }
}
