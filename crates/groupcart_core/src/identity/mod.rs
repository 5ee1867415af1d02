//! Identity provider contract.
//!
//! # Responsibility
//! - Authenticate email/password credentials and issue stable user ids.
//! - Track the signed-in user of one client.
//!
//! # Invariants
//! - `uid` values are opaque and never reused.
//! - Emails are compared case-insensitively (stored lowercase, trimmed).
//! - Auth errors carry messages meant to be shown to the user verbatim.

use crate::db::DbError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};

mod local;

pub use local::SqliteIdentityProvider;

/// Opaque provider-issued user identifier.
pub type UserId = String;

/// Minimum password length accepted by providers.
pub const MIN_PASSWORD_CHARS: usize = 6;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));

/// Authenticated user as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub uid: UserId,
    pub email: String,
}

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug)]
pub enum AuthError {
    InvalidEmail(String),
    WeakPassword,
    EmailAlreadyInUse,
    /// Unknown email or wrong password; deliberately not distinguished.
    InvalidCredentials,
    NotSignedIn,
    AccountNotFound(UserId),
    /// Password hashing or a stored digest failed.
    Hashing(String),
    Db(DbError),
}

impl AuthError {
    /// Stable error code, in the provider's `auth/...` style.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidEmail(_) => "auth/invalid-email",
            Self::WeakPassword => "auth/weak-password",
            Self::EmailAlreadyInUse => "auth/email-already-in-use",
            Self::InvalidCredentials => "auth/invalid-credential",
            Self::NotSignedIn => "auth/no-current-user",
            Self::AccountNotFound(_) => "auth/user-not-found",
            Self::Hashing(_) | Self::Db(_) => "auth/internal-error",
        }
    }
}

impl Display for AuthError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidEmail(value) => write!(f, "invalid email address: `{value}`"),
            Self::WeakPassword => write!(
                f,
                "password should be at least {MIN_PASSWORD_CHARS} characters"
            ),
            Self::EmailAlreadyInUse => write!(f, "email address is already in use"),
            Self::InvalidCredentials => write!(f, "invalid email or password"),
            Self::NotSignedIn => write!(f, "no user is signed in"),
            Self::AccountNotFound(uid) => write!(f, "account not found: {uid}"),
            Self::Hashing(message) => write!(f, "password hashing failed: {message}"),
            Self::Db(err) => write!(f, "identity storage failure: {err}"),
        }
    }
}

impl Error for AuthError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for AuthError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for AuthError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Email/password identity provider seen from one client.
pub trait IdentityProvider: Send + Sync {
    /// Creates credentials and signs the new user in.
    fn sign_up(&self, email: &str, password: &str) -> AuthResult<AuthUser>;

    /// Verifies credentials and signs the user in.
    fn sign_in(&self, email: &str, password: &str) -> AuthResult<AuthUser>;

    /// Signs the current user out. No-op when nobody is signed in.
    fn sign_out(&self);

    fn current_user(&self) -> Option<AuthUser>;

    /// Deletes an account. Signs it out if it is the current user.
    fn delete_account(&self, uid: &str) -> AuthResult<()>;
}

/// Trims and lowercases an email, rejecting obviously malformed input.
pub fn normalize_email(email: &str) -> AuthResult<String> {
    let normalized = email.trim().to_ascii_lowercase();
    if !EMAIL_RE.is_match(&normalized) {
        return Err(AuthError::InvalidEmail(email.trim().to_string()));
    }
    Ok(normalized)
}

/// Enforces [`MIN_PASSWORD_CHARS`].
pub fn check_password_strength(password: &str) -> AuthResult<()> {
    if password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(AuthError::WeakPassword);
    }
    Ok(())
}
