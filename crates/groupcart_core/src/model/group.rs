//! Group record stored at `groups/{id}` and its membership entries.
//!
//! # Invariants
//! - `admin` is set at creation and never rewritten.
//! - Account members are keyed by user id with value `true`.
//! - Email invitations are keyed by a generated id with the email as value;
//!   they never count as account members.

use super::{require_text, RecordValidationError};
use crate::identity::UserId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Group identifier: a short generated token or, for implicit single-user
/// groups, the owner's user id.
pub type GroupId = String;

/// Default length of generated group tokens.
pub const DEFAULT_GROUP_ID_LEN: usize = 8;

/// Stored value of one membership entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MemberValue {
    Flag(bool),
    Email(String),
}

/// Wire shape of `groups/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDocument {
    pub admin: UserId,
    #[serde(default)]
    pub members: BTreeMap<String, MemberValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberKind {
    /// Signed-up user; the entry key is the user id.
    Account,
    /// Email added by an admin. Not linked to any account.
    Invited { email: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberEntry {
    pub key: String,
    pub kind: MemberKind,
}

impl MemberEntry {
    pub fn account(uid: impl Into<String>) -> Self {
        Self {
            key: uid.into(),
            kind: MemberKind::Account,
        }
    }

    pub fn from_value(key: &str, value: &MemberValue) -> Result<Self, RecordValidationError> {
        let kind = match value {
            MemberValue::Flag(true) => MemberKind::Account,
            MemberValue::Email(email) if !email.trim().is_empty() => MemberKind::Invited {
                email: email.trim().to_string(),
            },
            MemberValue::Flag(false) | MemberValue::Email(_) => {
                return Err(RecordValidationError::InvalidMemberValue {
                    key: key.to_string(),
                });
            }
        };
        Ok(Self {
            key: key.to_string(),
            kind,
        })
    }

    /// Builds an entry from a raw `groups/{id}/members/{key}` value.
    pub fn from_json(key: &str, raw: &Value) -> Result<Self, RecordValidationError> {
        let value = match raw {
            Value::Bool(flag) => MemberValue::Flag(*flag),
            Value::String(email) => MemberValue::Email(email.clone()),
            _ => {
                return Err(RecordValidationError::InvalidMemberValue {
                    key: key.to_string(),
                })
            }
        };
        Self::from_value(key, &value)
    }

    pub fn to_value(&self) -> MemberValue {
        match &self.kind {
            MemberKind::Account => MemberValue::Flag(true),
            MemberKind::Invited { email } => MemberValue::Email(email.clone()),
        }
    }

    pub fn is_account(&self) -> bool {
        matches!(self.kind, MemberKind::Account)
    }
}

/// Validated group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub id: GroupId,
    pub admin: UserId,
    /// Sorted by key.
    pub members: Vec<MemberEntry>,
}

impl Group {
    /// New group with `admin` as admin and sole member.
    pub fn new(id: impl Into<GroupId>, admin: impl Into<UserId>) -> Self {
        let admin = admin.into();
        Self {
            id: id.into(),
            members: vec![MemberEntry::account(admin.clone())],
            admin,
        }
    }

    pub fn from_document(id: &str, document: GroupDocument) -> Result<Self, RecordValidationError> {
        require_text("admin", &document.admin)?;
        let members = document
            .members
            .iter()
            .map(|(key, value)| MemberEntry::from_value(key, value))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            id: id.to_string(),
            admin: document.admin,
            members,
        })
    }

    pub fn to_document(&self) -> GroupDocument {
        GroupDocument {
            admin: self.admin.clone(),
            members: self
                .members
                .iter()
                .map(|entry| (entry.key.clone(), entry.to_value()))
                .collect(),
        }
    }

    /// The single canonical admin check.
    pub fn is_admin(&self, uid: &str) -> bool {
        self.admin == uid
    }

    pub fn has_account_member(&self, uid: &str) -> bool {
        self.members
            .iter()
            .any(|entry| entry.is_account() && entry.key == uid)
    }

    pub fn account_member_ids(&self) -> Vec<&str> {
        self.members
            .iter()
            .filter(|entry| entry.is_account())
            .map(|entry| entry.key.as_str())
            .collect()
    }
}

/// Generates a short group token of `len` hex characters (clamped to 4..=32).
pub fn generate_group_id(len: usize) -> GroupId {
    let token = Uuid::new_v4().simple().to_string();
    token[..len.clamp(4, token.len())].to_string()
}
