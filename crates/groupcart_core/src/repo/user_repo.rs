//! `users/{uid}` access.

use super::{decode, encode, RepoError, RepoResult};
use crate::model::user::UserRecord;
use crate::store::{path, SharedStore};
use serde_json::Value;

#[derive(Clone)]
pub struct UserRepository {
    store: SharedStore,
}

impl UserRepository {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub fn get_user(&self, uid: &str) -> RepoResult<Option<UserRecord>> {
        let value = self.store.get(&path::user(uid)?)?;
        parse_user(uid, value)
    }

    pub fn put_user(&self, record: &UserRecord) -> RepoResult<()> {
        record.validate()?;
        let value = encode(record)?;
        self.store.set(&path::user(&record.uid)?, value)?;
        Ok(())
    }

    /// Writes or clears `users/{uid}/groupId` without touching other fields.
    pub fn set_group_id(&self, uid: &str, group_id: Option<&str>) -> RepoResult<()> {
        let value = group_id.map_or(Value::Null, |id| Value::String(id.to_string()));
        self.store.set(&path::user_group_id(uid)?, value)?;
        Ok(())
    }

    pub fn remove_user(&self, uid: &str) -> RepoResult<()> {
        self.store.remove(&path::user(uid)?)?;
        Ok(())
    }
}

/// Decodes and validates a `users/{uid}` snapshot value.
pub fn parse_user(uid: &str, value: Option<Value>) -> RepoResult<Option<UserRecord>> {
    let Some(value) = value else {
        return Ok(None);
    };
    let record_path = path::user(uid)?;
    let record: UserRecord = decode(&record_path, value)?;
    record
        .validate()
        .map_err(|err| RepoError::invalid_data(&record_path, err))?;
    if record.uid != uid {
        return Err(RepoError::invalid_data(
            &record_path,
            format!("stored uid `{}` does not match key", record.uid),
        ));
    }
    Ok(Some(record))
}
