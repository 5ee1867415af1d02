//! `groups/{id}` access, including membership entries.

use super::{decode, encode, RepoError, RepoResult};
use crate::model::group::{Group, GroupDocument};
use crate::store::{path, SharedStore};
use serde_json::Value;

#[derive(Clone)]
pub struct GroupRepository {
    store: SharedStore,
}

impl GroupRepository {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub fn get_group(&self, group_id: &str) -> RepoResult<Option<Group>> {
        let value = self.store.get(&path::group(group_id)?)?;
        parse_group(group_id, value)
    }

    /// Writes the whole group document. Overwrites any existing group.
    pub fn create_group(&self, group: &Group) -> RepoResult<()> {
        let value = encode(&group.to_document())?;
        self.store.set(&path::group(&group.id)?, value)?;
        Ok(())
    }

    /// Writes `groups/{id}/members/{uid} = true`.
    pub fn add_account_member(&self, group_id: &str, uid: &str) -> RepoResult<()> {
        self.store
            .set(&path::group_member(group_id, uid)?, Value::Bool(true))?;
        Ok(())
    }

    /// Appends an email invitation under a generated key and returns the key.
    pub fn invite_member(&self, group_id: &str, email: &str) -> RepoResult<String> {
        let key = self.store.push(
            &path::group_members(group_id)?,
            Value::String(email.to_string()),
        )?;
        Ok(key)
    }

    /// Removes one membership entry. Removing an absent entry succeeds.
    pub fn remove_member(&self, group_id: &str, key: &str) -> RepoResult<()> {
        self.store.remove(&path::group_member(group_id, key)?)?;
        Ok(())
    }

}

/// Decodes and validates a `groups/{id}` snapshot value.
///
/// A node without an `admin` field is not a group: implicit single-user groups
/// only ever hold a `shopping` subtree.
pub fn parse_group(group_id: &str, value: Option<Value>) -> RepoResult<Option<Group>> {
    let Some(value) = value.filter(|value| value.get("admin").is_some()) else {
        return Ok(None);
    };
    let group_path = path::group(group_id)?;
    let document: GroupDocument = decode(&group_path, value)?;
    let group = Group::from_document(group_id, document)
        .map_err(|err| RepoError::invalid_data(&group_path, err))?;
    Ok(Some(group))
}
