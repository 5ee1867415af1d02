//! User record stored at `users/{uid}`.

use super::group::GroupId;
use super::{require_text, RecordValidationError};
use crate::identity::{AuthUser, UserId};
use serde::{Deserialize, Serialize};

/// Per-user linkage to the group whose list the user sees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub uid: UserId,
    pub email: String,
    /// `None` after leaving a group. Readers fall back to the user's own id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
}

impl UserRecord {
    pub fn new(user: &AuthUser, group_id: Option<GroupId>) -> Self {
        Self {
            uid: user.uid.clone(),
            email: user.email.clone(),
            group_id,
        }
    }

    pub fn validate(&self) -> Result<(), RecordValidationError> {
        require_text("uid", &self.uid)?;
        require_text("email", &self.email)?;
        if let Some(group_id) = &self.group_id {
            require_text("groupId", group_id)?;
        }
        Ok(())
    }

    /// Group id to scope the list by: the stored one, else the user's own id.
    pub fn effective_group_id(&self) -> &str {
        self.group_id.as_deref().unwrap_or(self.uid.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::UserRecord;
    use crate::model::RecordValidationError;
    use serde_json::json;

    #[test]
    fn missing_group_id_falls_back_to_uid() {
        let record: UserRecord =
            serde_json::from_value(json!({"uid": "u1", "email": "a@x.io"})).unwrap();
        assert_eq!(record.group_id, None);
        assert_eq!(record.effective_group_id(), "u1");
    }

    #[test]
    fn serializes_with_camel_case_and_skips_empty_group() {
        let record = UserRecord {
            uid: "u1".to_string(),
            email: "a@x.io".to_string(),
            group_id: None,
        };
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({"uid": "u1", "email": "a@x.io"})
        );
    }

    #[test]
    fn blank_group_id_is_invalid() {
        let record = UserRecord {
            uid: "u1".to_string(),
            email: "a@x.io".to_string(),
            group_id: Some(" ".to_string()),
        };
        assert_eq!(
            record.validate(),
            Err(RecordValidationError::BlankField("groupId"))
        );
    }
}
