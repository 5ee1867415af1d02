//! Typed repositories over the document store.
//!
//! # Responsibility
//! - Map store paths and JSON documents to model records.
//! - Reject malformed persisted documents instead of masking them.
//!
//! # Invariants
//! - Write paths validate records before touching the store.
//! - Read paths validate records after decoding.

use crate::model::RecordValidationError;
use crate::store::{StoreError, StorePath};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod group_repo;
pub mod list_repo;
pub mod user_repo;

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug)]
pub enum RepoError {
    Store(StoreError),
    /// Record about to be written failed validation.
    Validation(RecordValidationError),
    /// Persisted document cannot be converted into a valid record.
    InvalidData { path: String, message: String },
}

impl RepoError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Store(err) => err.code(),
            Self::Validation(_) => "record_invalid",
            Self::InvalidData { .. } => "record_corrupt",
        }
    }

    fn invalid_data(path: &StorePath, message: impl Display) -> Self {
        Self::InvalidData {
            path: path.to_string(),
            message: message.to_string(),
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "{err}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::InvalidData { path, message } => {
                write!(f, "invalid document at {path}: {message}")
            }
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::Validation(err) => Some(err),
            Self::InvalidData { .. } => None,
        }
    }
}

impl From<StoreError> for RepoError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<RecordValidationError> for RepoError {
    fn from(value: RecordValidationError) -> Self {
        Self::Validation(value)
    }
}

fn decode<T: DeserializeOwned>(path: &StorePath, value: Value) -> RepoResult<T> {
    serde_json::from_value(value).map_err(|err| RepoError::invalid_data(path, err))
}

fn encode<T: serde::Serialize>(value: &T) -> RepoResult<Value> {
    serde_json::to_value(value).map_err(|err| RepoError::Store(StoreError::Serialization(err)))
}
