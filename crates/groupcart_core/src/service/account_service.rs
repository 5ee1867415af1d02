//! Account and group membership use-cases.
//!
//! # Responsibility
//! - Sign up: create credentials, the user record, and either a new group or
//!   a membership in an existing one.
//! - Log in/out, fetch group details, leave a group.
//!
//! # Invariants
//! - Sign-up is a compensating sequence: when a later step fails, earlier
//!   steps are undone in reverse order (best effort).
//! - Joining requires the group to exist.
//! - The admin of a group cannot leave it, so groups never become adminless.
//! - Every operation returns a classified error; nothing is swallowed.

use crate::identity::{AuthError, AuthUser, IdentityProvider};
use crate::model::group::{generate_group_id, Group, GroupId, DEFAULT_GROUP_ID_LEN};
use crate::model::user::UserRecord;
use crate::repo::group_repo::GroupRepository;
use crate::repo::user_repo::UserRepository;
use crate::repo::RepoError;
use crate::store::{path, SharedStore};
use log::{error, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Attempts at finding an unused generated group id.
const GROUP_ID_ATTEMPTS: usize = 5;

#[derive(Debug)]
pub enum AccountError {
    /// Identity provider rejection; its message is shown verbatim.
    Auth(AuthError),
    InvalidGroupId(String),
    GroupNotFound(GroupId),
    /// Could not find an unused generated group id.
    GroupIdExhausted,
    NotSignedIn,
    NotInGroup,
    AdminCannotLeave(GroupId),
    Repo(RepoError),
    /// A sign-up step failed after the account was created; completed steps
    /// were undone. `rollback_failures` lists undo steps that failed in turn.
    SignUpRolledBack {
        cause: Box<AccountError>,
        rollback_failures: Vec<String>,
    },
}

impl AccountError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Auth(err) => err.code(),
            Self::InvalidGroupId(_) => "invalid_group_id",
            Self::GroupNotFound(_) => "group_not_found",
            Self::GroupIdExhausted => "group_id_exhausted",
            Self::NotSignedIn => "not_signed_in",
            Self::NotInGroup => "not_in_group",
            Self::AdminCannotLeave(_) => "admin_cannot_leave",
            Self::Repo(err) => err.code(),
            Self::SignUpRolledBack { .. } => "sign_up_rolled_back",
        }
    }

    /// Human-readable message for the UI. Storage causes stay in `source()`.
    pub fn user_message(&self) -> String {
        match self {
            Self::Auth(err) => err.to_string(),
            Self::InvalidGroupId(_) => "That group ID is not valid.".to_string(),
            Self::GroupNotFound(id) => format!("No group with ID {id} exists."),
            Self::NotSignedIn => "Please log in first.".to_string(),
            Self::NotInGroup => "You are not in a group.".to_string(),
            Self::AdminCannotLeave(_) => "The group admin cannot leave the group.".to_string(),
            Self::GroupIdExhausted => {
                "Failed to save user to the database. Please try again.".to_string()
            }
            Self::SignUpRolledBack { cause, .. } => match cause.as_ref() {
                Self::Repo(_) | Self::GroupIdExhausted => {
                    "Failed to save user to the database. Please try again.".to_string()
                }
                other => other.user_message(),
            },
            Self::Repo(_) => "Something went wrong. Please try again.".to_string(),
        }
    }
}

impl Display for AccountError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auth(err) => write!(f, "{err}"),
            Self::InvalidGroupId(value) => write!(f, "invalid group id: `{value}`"),
            Self::GroupNotFound(id) => write!(f, "group not found: {id}"),
            Self::GroupIdExhausted => write!(f, "no unused group id after {GROUP_ID_ATTEMPTS} attempts"),
            Self::NotSignedIn => write!(f, "no user is signed in"),
            Self::NotInGroup => write!(f, "user is not in a group"),
            Self::AdminCannotLeave(id) => write!(f, "admin cannot leave group {id}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::SignUpRolledBack {
                cause,
                rollback_failures,
            } => {
                write!(f, "sign-up rolled back after: {cause}")?;
                if !rollback_failures.is_empty() {
                    write!(f, "; rollback failures: {}", rollback_failures.join("; "))?;
                }
                Ok(())
            }
        }
    }
}

impl Error for AccountError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Auth(err) => Some(err),
            Self::Repo(err) => Some(err),
            Self::SignUpRolledBack { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }
}

impl From<AuthError> for AccountError {
    fn from(value: AuthError) -> Self {
        match value {
            AuthError::NotSignedIn => Self::NotSignedIn,
            other => Self::Auth(other),
        }
    }
}

impl From<RepoError> for AccountError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

/// Result of a successful sign-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUpOutcome {
    CreatedGroup { user: AuthUser, group_id: GroupId },
    JoinedGroup { user: AuthUser, group_id: GroupId },
}

impl SignUpOutcome {
    pub fn user(&self) -> &AuthUser {
        match self {
            Self::CreatedGroup { user, .. } | Self::JoinedGroup { user, .. } => user,
        }
    }

    pub fn group_id(&self) -> &str {
        match self {
            Self::CreatedGroup { group_id, .. } | Self::JoinedGroup { group_id, .. } => group_id,
        }
    }

    fn mode(&self) -> &'static str {
        match self {
            Self::CreatedGroup { .. } => "create",
            Self::JoinedGroup { .. } => "join",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::CreatedGroup { group_id, .. } => {
                format!("Group created successfully! Your Group ID is {group_id}")
            }
            Self::JoinedGroup { .. } => "Successfully joined the group!".to_string(),
        }
    }
}

/// Group as seen by the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDetails {
    pub group: Group,
    pub is_admin: bool,
}

/// Completed sign-up steps, undone in reverse on failure.
#[derive(Debug)]
enum SignUpStep {
    AccountCreated(String),
    UserRecordWritten(String),
}

/// Account/group use-case service for one client.
pub struct AccountService<I: IdentityProvider> {
    identity: I,
    store: SharedStore,
    users: UserRepository,
    groups: GroupRepository,
    group_id_len: usize,
}

impl<I: IdentityProvider> AccountService<I> {
    pub fn new(identity: I, store: SharedStore) -> Self {
        Self {
            identity,
            users: UserRepository::new(store.clone()),
            groups: GroupRepository::new(store.clone()),
            store,
            group_id_len: DEFAULT_GROUP_ID_LEN,
        }
    }

    /// Overrides the generated group id length (clamped to 4..=32).
    pub fn with_group_id_len(mut self, len: usize) -> Self {
        self.group_id_len = len.clamp(4, 32);
        self
    }

    pub fn identity(&self) -> &I {
        &self.identity
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn current_user(&self) -> Option<AuthUser> {
        self.identity.current_user()
    }

    /// Creates an account and either a new group or a membership.
    ///
    /// A blank `group_id` creates a group with the new user as admin.
    pub fn sign_up(
        &self,
        email: &str,
        password: &str,
        group_id: Option<&str>,
    ) -> Result<SignUpOutcome, AccountError> {
        let join_target = match group_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => {
                path::group(id).map_err(|_| AccountError::InvalidGroupId(id.to_string()))?;
                if self.groups.get_group(id)?.is_none() {
                    warn!(
                        "event=sign_up module=account status=error error_code=group_not_found group_id={id}"
                    );
                    return Err(AccountError::GroupNotFound(id.to_string()));
                }
                Some(id.to_string())
            }
            None => None,
        };

        let user = self.identity.sign_up(email, password)?;
        let mut completed = vec![SignUpStep::AccountCreated(user.uid.clone())];

        match self.link_new_user(&user, join_target, &mut completed) {
            Ok(outcome) => {
                info!(
                    "event=sign_up module=account status=ok uid={} group_id={} mode={}",
                    user.uid,
                    outcome.group_id(),
                    outcome.mode()
                );
                Ok(outcome)
            }
            Err(cause) => {
                error!(
                    "event=sign_up module=account status=error uid={} error_code={} error={}",
                    user.uid,
                    cause.code(),
                    cause
                );
                let rollback_failures = self.roll_back(completed);
                Err(AccountError::SignUpRolledBack {
                    cause: Box::new(cause),
                    rollback_failures,
                })
            }
        }
    }

    fn link_new_user(
        &self,
        user: &AuthUser,
        join_target: Option<GroupId>,
        completed: &mut Vec<SignUpStep>,
    ) -> Result<SignUpOutcome, AccountError> {
        let group_id = match &join_target {
            Some(id) => id.clone(),
            None => self.unused_group_id()?,
        };

        self.users
            .put_user(&UserRecord::new(user, Some(group_id.clone())))?;
        completed.push(SignUpStep::UserRecordWritten(user.uid.clone()));

        if join_target.is_some() {
            self.groups.add_account_member(&group_id, &user.uid)?;
            Ok(SignUpOutcome::JoinedGroup {
                user: user.clone(),
                group_id,
            })
        } else {
            self.groups.create_group(&Group::new(group_id.clone(), user.uid.clone()))?;
            Ok(SignUpOutcome::CreatedGroup {
                user: user.clone(),
                group_id,
            })
        }
    }

    fn unused_group_id(&self) -> Result<GroupId, AccountError> {
        for _ in 0..GROUP_ID_ATTEMPTS {
            let candidate = generate_group_id(self.group_id_len);
            if self.groups.get_group(&candidate)?.is_none() {
                return Ok(candidate);
            }
        }
        Err(AccountError::GroupIdExhausted)
    }

    fn roll_back(&self, completed: Vec<SignUpStep>) -> Vec<String> {
        let mut failures = Vec::new();
        for step in completed.into_iter().rev() {
            let outcome = match &step {
                SignUpStep::UserRecordWritten(uid) => {
                    self.users.remove_user(uid).map_err(|err| err.to_string())
                }
                SignUpStep::AccountCreated(uid) => self
                    .identity
                    .delete_account(uid)
                    .map_err(|err| err.to_string()),
            };
            match outcome {
                Ok(()) => info!("event=sign_up_rollback module=account status=ok step={step:?}"),
                Err(err) => {
                    error!(
                        "event=sign_up_rollback module=account status=error step={step:?} error={err}"
                    );
                    failures.push(format!("{step:?}: {err}"));
                }
            }
        }
        failures
    }

    /// Authenticates only; group linkage is left as stored.
    pub fn log_in(&self, email: &str, password: &str) -> Result<AuthUser, AccountError> {
        let user = self.identity.sign_in(email, password)?;
        info!("event=log_in module=account status=ok uid={}", user.uid);
        Ok(user)
    }

    pub fn log_out(&self) {
        self.identity.sign_out();
    }

    /// Reads the caller's group. `Ok(None)` when the user record or the group
    /// is absent.
    pub fn fetch_group_details(&self) -> Result<Option<GroupDetails>, AccountError> {
        let user = self.require_user()?;
        let Some(record) = self.users.get_user(&user.uid)? else {
            return Ok(None);
        };
        let Some(group) = self.groups.get_group(record.effective_group_id())? else {
            return Ok(None);
        };
        let is_admin = group.is_admin(&user.uid);
        Ok(Some(GroupDetails { group, is_admin }))
    }

    /// Removes the caller's membership and clears the stored group id.
    pub fn leave_group(&self) -> Result<GroupId, AccountError> {
        let user = self.require_user()?;
        let group_id = self
            .users
            .get_user(&user.uid)?
            .and_then(|record| record.group_id)
            .ok_or(AccountError::NotInGroup)?;

        if let Some(group) = self.groups.get_group(&group_id)? {
            if group.is_admin(&user.uid) {
                return Err(AccountError::AdminCannotLeave(group_id));
            }
        }

        self.groups.remove_member(&group_id, &user.uid)?;
        self.users.set_group_id(&user.uid, None)?;
        info!(
            "event=leave_group module=account status=ok uid={} group_id={}",
            user.uid, group_id
        );
        Ok(group_id)
    }

    fn require_user(&self) -> Result<AuthUser, AccountError> {
        self.identity
            .current_user()
            .ok_or(AccountError::NotSignedIn)
    }
}
