//! Store paths and the canonical path layout.
//!
//! # Invariants
//! - A path is a `/`-joined list of non-empty segments; the root is empty.
//! - Segments never contain `/ . # $ [ ]` or control characters, so ids taken
//!   from user input cannot escape their parent node.

use super::{StoreError, StoreResult};
use std::fmt::{Display, Formatter};

const FORBIDDEN_SEGMENT_CHARS: &[char] = &['/', '.', '#', '$', '[', ']'];

/// Validated location in the document tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct StorePath(String);

impl StorePath {
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Parses a slash-separated path. Leading and trailing slashes are ignored.
    pub fn parse(raw: &str) -> StoreResult<Self> {
        let trimmed = raw.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        trimmed
            .split('/')
            .try_fold(Self::root(), |path, segment| path.child(segment))
    }

    /// Returns a new path one level below `self`.
    pub fn child(&self, segment: &str) -> StoreResult<Self> {
        validate_segment(segment)?;
        if self.0.is_empty() {
            Ok(Self(segment.to_string()))
        } else {
            Ok(Self(format!("{}/{segment}", self.0)))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|segment| !segment.is_empty())
    }

    /// Last segment, i.e. the key of this node inside its parent.
    pub fn key(&self) -> Option<&str> {
        self.segments().last()
    }

    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(index) => Some(Self(self.0[..index].to_string())),
            None => Some(Self::root()),
        }
    }

    /// Whether `self` is `other` or one of its ancestors.
    pub fn contains(&self, other: &StorePath) -> bool {
        if self.is_root() || self.0 == other.0 {
            return true;
        }
        other.0.len() > self.0.len()
            && other.0.starts_with(self.0.as_str())
            && other.0.as_bytes()[self.0.len()] == b'/'
    }

    /// Whether a write at one path can change the value seen at the other.
    pub fn overlaps(&self, other: &StorePath) -> bool {
        self.contains(other) || other.contains(self)
    }

    /// Strict ancestors, nearest first. The root is not included.
    pub fn ancestors(&self) -> Vec<StorePath> {
        let mut out = Vec::new();
        let mut current = self.parent();
        while let Some(path) = current {
            if path.is_root() {
                break;
            }
            current = path.parent();
            out.push(path);
        }
        out
    }
}

impl Display for StorePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}", self.0)
    }
}

fn validate_segment(segment: &str) -> StoreResult<()> {
    if segment.is_empty() {
        return Err(StoreError::InvalidPath("empty path segment".to_string()));
    }
    if let Some(bad) = segment
        .chars()
        .find(|ch| FORBIDDEN_SEGMENT_CHARS.contains(ch) || ch.is_control())
    {
        return Err(StoreError::InvalidPath(format!(
            "segment `{}` contains forbidden character {bad:?}",
            segment.escape_debug()
        )));
    }
    Ok(())
}

/// `users/{uid}`
pub fn user(uid: &str) -> StoreResult<StorePath> {
    StorePath::root().child("users")?.child(uid)
}

/// `users/{uid}/groupId`
pub fn user_group_id(uid: &str) -> StoreResult<StorePath> {
    user(uid)?.child("groupId")
}

/// `groups/{group_id}`
pub fn group(group_id: &str) -> StoreResult<StorePath> {
    StorePath::root().child("groups")?.child(group_id)
}

/// `groups/{group_id}/admin`, the single canonical admin field.
pub fn group_admin(group_id: &str) -> StoreResult<StorePath> {
    group(group_id)?.child("admin")
}

/// `groups/{group_id}/members`
pub fn group_members(group_id: &str) -> StoreResult<StorePath> {
    group(group_id)?.child("members")
}

/// `groups/{group_id}/members/{key}`
pub fn group_member(group_id: &str, key: &str) -> StoreResult<StorePath> {
    group_members(group_id)?.child(key)
}

/// `groups/{group_id}/shopping`
pub fn group_shopping(group_id: &str) -> StoreResult<StorePath> {
    group(group_id)?.child("shopping")
}

#[cfg(test)]
mod tests {
    use super::{group_member, StorePath};

    #[test]
    fn parse_ignores_outer_slashes_and_builds_segments() {
        let path = StorePath::parse("/groups/g1/members/").unwrap();
        assert_eq!(path.as_str(), "groups/g1/members");
        assert_eq!(path.key(), Some("members"));
        assert_eq!(path.segments().count(), 3);
        assert!(StorePath::parse("").unwrap().is_root());
    }

    #[test]
    fn forbidden_characters_are_rejected() {
        assert!(StorePath::parse("groups/a.b").is_err());
        assert!(group_member("g1", "x/y").is_err());
        assert!(group_member("g1", "").is_err());
        assert!(group_member("g$1", "u").is_err());
    }

    #[test]
    fn contains_respects_segment_boundaries() {
        let members = StorePath::parse("groups/g1/members").unwrap();
        let member = StorePath::parse("groups/g1/members/u1").unwrap();
        let sibling = StorePath::parse("groups/g1/membersx").unwrap();

        assert!(members.contains(&member));
        assert!(!member.contains(&members));
        assert!(!members.contains(&sibling));
        assert!(member.overlaps(&members));
        assert!(StorePath::root().contains(&member));
    }

    #[test]
    fn ancestors_are_nearest_first_without_root() {
        let path = StorePath::parse("a/b/c").unwrap();
        let ancestors: Vec<String> = path
            .ancestors()
            .into_iter()
            .map(|p| p.as_str().to_string())
            .collect();
        assert_eq!(ancestors, vec!["a/b".to_string(), "a".to_string()]);
        assert_eq!(path.parent().unwrap().as_str(), "a/b");
        assert!(StorePath::parse("a").unwrap().parent().unwrap().is_root());
    }
}
