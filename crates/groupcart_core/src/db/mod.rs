//! SQLite bootstrap shared by the document store and the local identity
//! provider.
//!
//! # Responsibility
//! - Open file or in-memory connections with migrations applied.
//! - Hand out one mutex-guarded connection that several components share.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - No component touches tables before migrations succeed.

use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory, open_shared_db, open_shared_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

/// Connection handle shared between the store and the identity provider.
pub type SharedConnection = Arc<Mutex<Connection>>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// A thread panicked while holding the connection lock.
    LockPoisoned,
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::LockPoisoned => write!(f, "database connection lock poisoned"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } | Self::LockPoisoned => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Wraps an opened connection for sharing.
pub fn share(conn: Connection) -> SharedConnection {
    Arc::new(Mutex::new(conn))
}

/// Locks a shared connection, mapping poisoning to [`DbError::LockPoisoned`].
pub fn lock(conn: &SharedConnection) -> DbResult<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|_| DbError::LockPoisoned)
}
