//! Typed records stored in the document tree.
//!
//! # Responsibility
//! - Replace loosely-typed key/value documents with explicit records.
//! - Validate documents on read instead of trusting field presence.
//!
//! # Invariants
//! - A group has exactly one admin, fixed at creation.
//! - Admin status is `group.admin == uid`; there is no second admin set.
//! - A user belongs to at most one group at a time (`UserRecord::group_id`).

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod group;
pub mod item;
pub mod user;

/// Validation failure for one stored or about-to-be-stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordValidationError {
    /// Required text field is blank after trimming.
    BlankField(&'static str),
    /// Membership entry holds neither `true` nor a non-blank email.
    InvalidMemberValue { key: String },
}

impl Display for RecordValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankField(field) => write!(f, "field `{field}` must not be blank"),
            Self::InvalidMemberValue { key } => {
                write!(f, "membership entry `{key}` has an invalid value")
            }
        }
    }
}

impl Error for RecordValidationError {}

pub(crate) fn require_text(field: &'static str, value: &str) -> Result<(), RecordValidationError> {
    if value.trim().is_empty() {
        return Err(RecordValidationError::BlankField(field));
    }
    Ok(())
}
