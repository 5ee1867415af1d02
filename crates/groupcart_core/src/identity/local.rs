//! Local SQLite identity provider for development and tests.
//!
//! Passwords are stored as argon2id PHC strings with a random per-account
//! salt; the salt is also kept in its own column.

use super::{
    check_password_strength, normalize_email, AuthError, AuthResult, AuthUser, IdentityProvider,
};
use crate::db::{self, DbError, SharedConnection};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use log::{info, warn};
use rusqlite::{params, ErrorCode, OptionalExtension};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

pub struct SqliteIdentityProvider {
    conn: SharedConnection,
    current: Mutex<Option<AuthUser>>,
}

impl SqliteIdentityProvider {
    /// Creates a signed-out client over a migrated connection.
    pub fn new(conn: SharedConnection) -> Self {
        Self {
            conn,
            current: Mutex::new(None),
        }
    }

    fn set_current(&self, user: Option<AuthUser>) {
        *self.current_guard() = user;
    }

    fn current_guard(&self) -> MutexGuard<'_, Option<AuthUser>> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl IdentityProvider for SqliteIdentityProvider {
    fn sign_up(&self, email: &str, password: &str) -> AuthResult<AuthUser> {
        let email = normalize_email(email)?;
        check_password_strength(password)?;

        let uid = Uuid::new_v4().simple().to_string();
        let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())
            .map_err(|err| AuthError::Hashing(err.to_string()))?;
        let digest = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|err| AuthError::Hashing(err.to_string()))?
            .to_string();
        let salt = salt.as_str().to_string();

        let conn = db::lock(&self.conn)?;
        let inserted = conn.execute(
            "INSERT INTO accounts (uid, email, salt, password_digest, last_sign_in_at)
             VALUES (?1, ?2, ?3, ?4, strftime('%s', 'now') * 1000);",
            params![uid, email, salt, digest],
        );
        drop(conn);

        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                return Err(AuthError::EmailAlreadyInUse);
            }
            Err(err) => return Err(err.into()),
        }

        let user = AuthUser { uid, email };
        info!(
            "event=auth_sign_up module=identity status=ok uid={}",
            user.uid
        );
        self.set_current(Some(user.clone()));
        Ok(user)
    }

    fn sign_in(&self, email: &str, password: &str) -> AuthResult<AuthUser> {
        let email = normalize_email(email).map_err(|_| AuthError::InvalidCredentials)?;

        let conn = db::lock(&self.conn)?;
        let stored: Option<(String, String)> = conn
            .query_row(
                "SELECT uid, password_digest FROM accounts WHERE email = ?1;",
                [email.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((uid, digest)) = stored else {
            warn!("event=auth_sign_in module=identity status=error error_code=unknown_email");
            return Err(AuthError::InvalidCredentials);
        };
        if !password_matches(&digest, password)? {
            warn!(
                "event=auth_sign_in module=identity status=error uid={} error_code=bad_password",
                uid
            );
            return Err(AuthError::InvalidCredentials);
        }

        conn.execute(
            "UPDATE accounts SET last_sign_in_at = strftime('%s', 'now') * 1000 WHERE uid = ?1;",
            [uid.as_str()],
        )?;
        drop(conn);

        let user = AuthUser { uid, email };
        info!(
            "event=auth_sign_in module=identity status=ok uid={}",
            user.uid
        );
        self.set_current(Some(user.clone()));
        Ok(user)
    }

    fn sign_out(&self) {
        if let Some(user) = self.current_guard().take() {
            info!(
                "event=auth_sign_out module=identity status=ok uid={}",
                user.uid
            );
        }
    }

    fn current_user(&self) -> Option<AuthUser> {
        self.current_guard().clone()
    }

    fn delete_account(&self, uid: &str) -> AuthResult<()> {
        let conn = db::lock(&self.conn)?;
        let deleted = conn
            .execute("DELETE FROM accounts WHERE uid = ?1;", [uid])
            .map_err(DbError::from)?;
        drop(conn);

        if deleted == 0 {
            return Err(AuthError::AccountNotFound(uid.to_string()));
        }

        let mut current = self.current_guard();
        if current.as_ref().is_some_and(|user| user.uid == uid) {
            *current = None;
        }
        info!("event=auth_delete module=identity status=ok uid={uid}");
        Ok(())
    }
}

fn password_matches(digest: &str, password: &str) -> AuthResult<bool> {
    let parsed = PasswordHash::new(digest).map_err(|err| AuthError::Hashing(err.to_string()))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(err) => Err(AuthError::Hashing(err.to_string())),
    }
}
