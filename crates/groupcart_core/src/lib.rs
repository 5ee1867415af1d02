//! Core domain logic for GroupCart, a shared shopping list for small groups.
//! This crate is the single source of truth for membership and list invariants.

pub mod config;
pub mod db;
pub mod identity;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod store;

pub use config::{AppConfig, ConfigError};
pub use identity::{AuthError, AuthUser, IdentityProvider, SqliteIdentityProvider, UserId};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::group::{Group, GroupId, MemberEntry, MemberKind};
pub use model::item::{ItemId, NewItem, ShoppingItem};
pub use model::user::UserRecord;
pub use model::RecordValidationError;
pub use repo::{RepoError, RepoResult};
pub use service::account_service::{AccountError, AccountService, GroupDetails, SignUpOutcome};
pub use service::session::{
    GroupSession, MemberView, SessionError, SessionResult, SessionState, SessionView,
};
pub use store::{
    DocumentStore, SharedStore, Snapshot, SqliteDocumentStore, StoreError, StorePath,
    StoreResult, Subscription,
};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
