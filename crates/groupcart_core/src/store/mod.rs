//! Hierarchical document store with live subscriptions.
//!
//! # Responsibility
//! - Define the storage contract used by repositories and sessions.
//! - Keep the concrete backend (SQLite) behind [`DocumentStore`].
//!
//! # Invariants
//! - Values are JSON trees; `null` and empty objects mean "absent".
//! - Writes are last-write-wins; there is no compare-and-set.
//! - Every write notifies watchers on overlapping paths before returning.

use crate::db::DbError;
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub mod path;
mod sqlite_store;
pub mod watch;

pub use path::StorePath;
pub use sqlite_store::SqliteDocumentStore;
pub use watch::{Snapshot, Subscription, WatchRegistry};

pub type StoreResult<T> = Result<T, StoreError>;

/// Store handle shared across services and sessions.
pub type SharedStore = Arc<dyn DocumentStore>;

#[derive(Debug)]
pub enum StoreError {
    Db(DbError),
    Serialization(serde_json::Error),
    InvalidPath(String),
    /// Write payload has the wrong shape for the operation.
    InvalidValue(String),
}

impl StoreError {
    /// Stable error code used in log events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Db(_) => "store_db",
            Self::Serialization(_) => "store_serialization",
            Self::InvalidPath(_) => "store_invalid_path",
            Self::InvalidValue(_) => "store_invalid_value",
        }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Serialization(err) => write!(f, "store serialization failed: {err}"),
            Self::InvalidPath(message) => write!(f, "invalid store path: {message}"),
            Self::InvalidValue(message) => write!(f, "invalid store value: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Serialization(err) => Some(err),
            Self::InvalidPath(_) | Self::InvalidValue(_) => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

/// Hierarchical key-value store contract.
pub trait DocumentStore: Send + Sync {
    /// Reads the full subtree at `path`.
    fn get(&self, path: &StorePath) -> StoreResult<Option<Value>>;

    /// Replaces the subtree at `path`. `Value::Null` removes it.
    fn set(&self, path: &StorePath, value: Value) -> StoreResult<()>;

    /// Replaces each named child of `path`, leaving other children untouched.
    fn update(&self, path: &StorePath, children: Map<String, Value>) -> StoreResult<()>;

    /// Removes the subtree at `path`. Removing an absent path succeeds.
    fn remove(&self, path: &StorePath) -> StoreResult<()>;

    /// Stores `value` under a new time-ordered child key and returns the key.
    fn push(&self, path: &StorePath, value: Value) -> StoreResult<String>;

    /// Starts watching `path`. The initial snapshot is queued immediately.
    fn watch(&self, path: &StorePath) -> StoreResult<Subscription>;
}
