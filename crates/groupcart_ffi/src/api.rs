//! FFI use-case API for the UI shell.
//!
//! # Responsibility
//! - Expose account and list-session use-cases to Dart via FRB.
//! - Own the process-wide client: one store, one signed-in user, at most one
//!   open session.
//!
//! # Invariants
//! - Exported functions must not panic across the FFI boundary.
//! - Failures come back as envelopes with a stable `error_code` and a
//!   user-facing `message`.
//! - Logging out or leaving a group closes the open session.

use groupcart_core::db::{open_shared_db, open_shared_db_in_memory};
use groupcart_core::{
    core_version as core_version_inner, init_logging as init_logging_inner, ping as ping_inner,
    AccountError, AccountService, AppConfig, GroupSession, MemberView, SessionError,
    SessionState, SessionView, SharedStore, SqliteDocumentStore, SqliteIdentityProvider,
};
use log::{info, warn};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

const IN_MEMORY_DB_PATH: &str = ":memory:";

static CLIENT: OnceLock<Mutex<Option<Client>>> = OnceLock::new();

struct Client {
    accounts: AccountService<SqliteIdentityProvider>,
    store: SharedStore,
    session: Option<GroupSession>,
}

/// Minimal health-check API for FRB smoke integration.
///
/// # FFI contract
/// - Sync call, non-blocking.
/// - Never throws; always returns a UTF-8 string.
#[flutter_rust_bridge::frb(sync)]
pub fn ping() -> String {
    ping_inner().to_owned()
}

/// Expose core crate version through FFI.
#[flutter_rust_bridge::frb(sync)]
pub fn core_version() -> String {
    core_version_inner().to_owned()
}

/// Initializes Rust core logging once per process.
///
/// Input semantics:
/// - `level`: one of `trace|debug|info|warn|error` (case-insensitive).
/// - `log_dir`: absolute directory path where rolling logs are written.
///
/// # FFI contract
/// - Safe to call repeatedly with the same `level + log_dir`.
/// - Never panics; returns empty string on success and error message on failure.
#[flutter_rust_bridge::frb(sync)]
pub fn init_logging(level: String, log_dir: String) -> String {
    match init_logging_inner(level.as_str(), log_dir.as_str()) {
        Ok(()) => String::new(),
        Err(err) => err.to_string(),
    }
}

/// Result envelope for commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResponse {
    pub ok: bool,
    /// Stable machine-readable code on failure.
    pub error_code: Option<String>,
    /// Message to show to the user.
    pub message: String,
    /// Created or affected id (user, group, item or member key).
    pub id: Option<String>,
}

impl ActionResponse {
    fn success(message: impl Into<String>, id: Option<String>) -> Self {
        Self {
            ok: true,
            error_code: None,
            message: message.into(),
            id,
        }
    }

    fn failure(code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error_code: Some(code.to_string()),
            message: message.into(),
            id: None,
        }
    }
}

/// Sign-up and log-in result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountResponse {
    pub ok: bool,
    pub error_code: Option<String>,
    pub message: String,
    pub uid: Option<String>,
    pub email: Option<String>,
    pub group_id: Option<String>,
}

impl AccountResponse {
    fn failure(code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error_code: Some(code.to_string()),
            message: message.into(),
            uid: None,
            email: None,
            group_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDetailsResponse {
    pub ok: bool,
    pub error_code: Option<String>,
    pub message: String,
    /// `None` when the caller has no group.
    pub group_id: Option<String>,
    pub admin_id: Option<String>,
    pub is_admin: bool,
    pub member_ids: Vec<String>,
}

impl GroupDetailsResponse {
    fn empty(ok: bool, error_code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            ok,
            error_code,
            message: message.into(),
            group_id: None,
            admin_id: None,
            is_admin: false,
            member_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMember {
    pub member_id: String,
    pub email: Option<String>,
    pub invited: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionItem {
    pub item_id: String,
    pub name: String,
    pub category: String,
    pub purchased: bool,
    /// `"{name} ({category})"`.
    pub label: String,
}

/// Render state of the list screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionResponse {
    pub ok: bool,
    pub error_code: Option<String>,
    pub message: String,
    /// `unresolved|resolving|ready|mutating`.
    pub state: String,
    pub group_id: Option<String>,
    pub is_admin: bool,
    pub can_add_members: bool,
    pub loading: bool,
    pub members: Vec<SessionMember>,
    pub items: Vec<SessionItem>,
}

impl SessionResponse {
    fn from_view(view: &SessionView, can_add_members: bool) -> Self {
        Self {
            ok: true,
            error_code: None,
            message: String::new(),
            state: state_label(view.state).to_string(),
            group_id: view.group_id.clone(),
            is_admin: view.is_admin,
            can_add_members,
            loading: view.loading,
            members: view.members.iter().map(to_session_member).collect(),
            items: view
                .items
                .iter()
                .map(|item| SessionItem {
                    item_id: item.id.clone(),
                    name: item.name.clone(),
                    category: item.category.clone(),
                    purchased: item.purchased,
                    label: item.label(),
                })
                .collect(),
        }
    }

    fn failure(code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error_code: Some(code.to_string()),
            message: message.into(),
            state: state_label(SessionState::Unresolved).to_string(),
            group_id: None,
            is_admin: false,
            can_add_members: false,
            loading: true,
            members: Vec::new(),
            items: Vec::new(),
        }
    }
}

/// Opens (or reopens) the store backing every other call.
///
/// `db_path` may be blank (use `GROUPCART_DB_PATH` or its default) or
/// `:memory:`. Reopening signs the previous client out.
#[flutter_rust_bridge::frb(sync)]
pub fn open_store(db_path: String) -> ActionResponse {
    let mut slot = client_slot();
    match open_client(db_path.trim()) {
        Ok(client) => {
            *slot = Some(client);
            ActionResponse::success("Store opened.", None)
        }
        Err(response) => response,
    }
}

/// Creates an account plus a new group (blank `group_id`) or a membership.
#[flutter_rust_bridge::frb(sync)]
pub fn account_sign_up(email: String, password: String, group_id: Option<String>) -> AccountResponse {
    let mut slot = client_slot();
    let client = match ensure_client(&mut slot) {
        Ok(client) => client,
        Err(response) => return AccountResponse::failure("store_unavailable", response.message),
    };
    client.session = None;
    match client
        .accounts
        .sign_up(&email, &password, group_id.as_deref())
    {
        Ok(outcome) => AccountResponse {
            ok: true,
            error_code: None,
            message: outcome.message(),
            uid: Some(outcome.user().uid.clone()),
            email: Some(outcome.user().email.clone()),
            group_id: Some(outcome.group_id().to_string()),
        },
        Err(err) => account_failure(&err),
    }
}

#[flutter_rust_bridge::frb(sync)]
pub fn account_log_in(email: String, password: String) -> AccountResponse {
    let mut slot = client_slot();
    let client = match ensure_client(&mut slot) {
        Ok(client) => client,
        Err(response) => return AccountResponse::failure("store_unavailable", response.message),
    };
    client.session = None;
    match client.accounts.log_in(&email, &password) {
        Ok(user) => AccountResponse {
            ok: true,
            error_code: None,
            message: "Logged in.".to_string(),
            uid: Some(user.uid),
            email: Some(user.email),
            group_id: None,
        },
        Err(err) => account_failure(&err),
    }
}

#[flutter_rust_bridge::frb(sync)]
pub fn account_log_out() -> ActionResponse {
    let mut slot = client_slot();
    if let Some(client) = slot.as_mut() {
        client.session = None;
        client.accounts.log_out();
    }
    ActionResponse::success("Logged out.", None)
}

#[flutter_rust_bridge::frb(sync)]
pub fn account_group_details() -> GroupDetailsResponse {
    let mut slot = client_slot();
    let client = match ensure_client(&mut slot) {
        Ok(client) => client,
        Err(response) => {
            return GroupDetailsResponse::empty(false, response.error_code, response.message)
        }
    };
    match client.accounts.fetch_group_details() {
        Ok(Some(details)) => GroupDetailsResponse {
            ok: true,
            error_code: None,
            message: String::new(),
            member_ids: details
                .group
                .account_member_ids()
                .into_iter()
                .map(str::to_string)
                .collect(),
            group_id: Some(details.group.id),
            admin_id: Some(details.group.admin),
            is_admin: details.is_admin,
        },
        Ok(None) => GroupDetailsResponse::empty(true, None, "You are not in a group."),
        Err(err) => GroupDetailsResponse::empty(
            false,
            Some(err.code().to_string()),
            err.user_message(),
        ),
    }
}

#[flutter_rust_bridge::frb(sync)]
pub fn account_leave_group() -> ActionResponse {
    let mut slot = client_slot();
    let client = match ensure_client(&mut slot) {
        Ok(client) => client,
        Err(response) => return response,
    };
    match client.accounts.leave_group() {
        Ok(group_id) => {
            client.session = None;
            ActionResponse::success("You left the group.", Some(group_id))
        }
        Err(err) => ActionResponse::failure(err.code(), err.user_message()),
    }
}

/// Opens the list session for the signed-in user and applies initial data.
#[flutter_rust_bridge::frb(sync)]
pub fn session_open() -> SessionResponse {
    let mut slot = client_slot();
    let client = match ensure_client(&mut slot) {
        Ok(client) => client,
        Err(response) => return SessionResponse::failure("store_unavailable", response.message),
    };
    let Some(user) = client.accounts.current_user() else {
        return SessionResponse::failure("not_signed_in", "Please log in first.");
    };
    client.session = None;
    let mut session = match GroupSession::open(user, client.store.clone()) {
        Ok(session) => session,
        Err(err) => return session_failure(&err),
    };
    if let Err(err) = session.sync() {
        return session_failure(&err);
    }
    let response = SessionResponse::from_view(session.view(), session.can_add_members());
    client.session = Some(session);
    response
}

/// Applies queued changes and returns the current view. Never waits, so the
/// client lock is held only for the sync itself.
#[flutter_rust_bridge::frb(sync)]
pub fn session_refresh() -> SessionResponse {
    with_session_view(|session| session.sync().map(|_| ()))
}

/// Adds an item; blank name or category is ignored.
#[flutter_rust_bridge::frb(sync)]
pub fn session_add_item(name: String, category: String) -> ActionResponse {
    with_session_action(|session| {
        session.add_item(&name, &category).map(|item| match item {
            Some(item) => ActionResponse::success("Item added.", Some(item.id)),
            None => ActionResponse::success("Nothing to add.", None),
        })
    })
}

#[flutter_rust_bridge::frb(sync)]
pub fn session_toggle_purchased(item_id: String) -> ActionResponse {
    with_session_action(|session| {
        session.toggle_purchased(&item_id).map(|purchased| {
            let message = if purchased {
                "Marked as purchased."
            } else {
                "Marked as not purchased."
            };
            ActionResponse::success(message, Some(item_id.clone()))
        })
    })
}

#[flutter_rust_bridge::frb(sync)]
pub fn session_delete_item(item_id: String) -> ActionResponse {
    with_session_action(|session| {
        session
            .delete_item(&item_id)
            .map(|()| ActionResponse::success("Item deleted.", Some(item_id.clone())))
    })
}

/// Invites an email address to the group. Admin only.
#[flutter_rust_bridge::frb(sync)]
pub fn session_add_member(email: String) -> ActionResponse {
    with_session_action(|session| {
        session.add_member(&email).map(|key| match key {
            Some(key) => ActionResponse::success("Member added.", Some(key)),
            None => ActionResponse::success("Nothing to add.", None),
        })
    })
}

#[flutter_rust_bridge::frb(sync)]
pub fn session_close() -> ActionResponse {
    if let Some(client) = client_slot().as_mut() {
        client.session = None;
    }
    ActionResponse::success("Session closed.", None)
}

fn client_slot() -> MutexGuard<'static, Option<Client>> {
    CLIENT
        .get_or_init(|| Mutex::new(None))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn ensure_client(slot: &mut Option<Client>) -> Result<&mut Client, ActionResponse> {
    if slot.is_none() {
        *slot = Some(open_client("")?);
    }
    slot.as_mut()
        .ok_or_else(|| ActionResponse::failure("store_unavailable", "Store is not open."))
}

fn open_client(db_path: &str) -> Result<Client, ActionResponse> {
    let config = AppConfig::from_env()
        .map_err(|err| ActionResponse::failure("config_invalid", err.to_string()))?;
    let opened = match db_path {
        "" => open_shared_db(&config.db_path),
        IN_MEMORY_DB_PATH => open_shared_db_in_memory(),
        path => open_shared_db(path),
    };
    let conn = opened.map_err(|err| {
        warn!("event=ffi_open_store module=ffi status=error error={err}");
        ActionResponse::failure("store_unavailable", format!("Could not open the store: {err}"))
    })?;

    let store: SharedStore = Arc::new(SqliteDocumentStore::new(conn.clone()));
    let accounts = AccountService::new(SqliteIdentityProvider::new(conn), store.clone())
        .with_group_id_len(config.group_id_len);
    info!("event=ffi_open_store module=ffi status=ok");
    Ok(Client {
        accounts,
        store,
        session: None,
    })
}

fn with_session_view(
    apply: impl FnOnce(&mut GroupSession) -> Result<(), SessionError>,
) -> SessionResponse {
    let mut slot = client_slot();
    let Some(session) = slot.as_mut().and_then(|client| client.session.as_mut()) else {
        return SessionResponse::failure("session_closed", "Open your list first.");
    };
    match apply(session) {
        Ok(()) => SessionResponse::from_view(session.view(), session.can_add_members()),
        Err(err) => session_failure(&err),
    }
}

fn with_session_action(
    apply: impl FnOnce(&mut GroupSession) -> Result<ActionResponse, SessionError>,
) -> ActionResponse {
    let mut slot = client_slot();
    let Some(session) = slot.as_mut().and_then(|client| client.session.as_mut()) else {
        return ActionResponse::failure("session_closed", "Open your list first.");
    };
    apply(session).unwrap_or_else(|err| ActionResponse::failure(err.code(), err.user_message()))
}

fn account_failure(err: &AccountError) -> AccountResponse {
    AccountResponse::failure(err.code(), err.user_message())
}

fn session_failure(err: &SessionError) -> SessionResponse {
    SessionResponse::failure(err.code(), err.user_message())
}

fn to_session_member(member: &MemberView) -> SessionMember {
    SessionMember {
        member_id: member.member_id.clone(),
        email: member.email.clone(),
        invited: member.invited,
    }
}

fn state_label(state: SessionState) -> &'static str {
    match state {
        SessionState::Unresolved => "unresolved",
        SessionState::Resolving => "resolving",
        SessionState::Ready => "ready",
        SessionState::Mutating => "mutating",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }

    #[test]
    fn init_logging_rejects_empty_log_dir() {
        let error = init_logging("info".to_string(), String::new());
        assert!(!error.is_empty());
    }

    #[test]
    fn init_logging_rejects_unsupported_level() {
        let error = init_logging("verbose".to_string(), "/tmp/groupcart-logs".to_string());
        assert!(!error.is_empty());
    }

    // The client is process-global, so the whole flow runs in one test.
    #[test]
    fn account_and_session_flow_over_in_memory_store() {
        assert!(open_store(IN_MEMORY_DB_PATH.to_string()).ok);

        let blocked = session_add_item("Milk".to_string(), "Dairy".to_string());
        assert_eq!(blocked.error_code.as_deref(), Some("session_closed"));

        let admin = account_sign_up("admin@example.com".to_string(), "secret1".to_string(), None);
        assert!(admin.ok, "{}", admin.message);
        let group_id = admin.group_id.clone().unwrap();
        assert!(admin.message.ends_with(&group_id));

        let missing = account_sign_up(
            "lost@example.com".to_string(),
            "secret1".to_string(),
            Some("nosuchgroup".to_string()),
        );
        assert_eq!(missing.error_code.as_deref(), Some("group_not_found"));

        let opened = session_open();
        assert!(opened.ok, "{}", opened.message);
        assert_eq!(opened.group_id.as_deref(), Some(group_id.as_str()));
        assert!(opened.is_admin);
        assert!(opened.can_add_members);
        assert!(!opened.loading);

        let added = session_add_item("Milk".to_string(), "Dairy".to_string());
        assert!(added.ok);
        let item_id = added.id.unwrap();
        let blank = session_add_item(" ".to_string(), "Dairy".to_string());
        assert!(blank.ok && blank.id.is_none());

        let toggled = session_toggle_purchased(item_id.clone());
        assert_eq!(toggled.message, "Marked as purchased.");
        let view = session_refresh();
        assert_eq!(view.items.len(), 1);
        assert_eq!(view.items[0].label, "Milk (Dairy)");
        assert!(view.items[0].purchased);

        let invited = session_add_member("friend@example.com".to_string());
        assert!(invited.ok && invited.id.is_some());

        let details = account_group_details();
        assert!(details.is_admin);
        assert_eq!(details.member_ids, vec![admin.uid.clone().unwrap()]);

        let leave = account_leave_group();
        assert_eq!(leave.error_code.as_deref(), Some("admin_cannot_leave"));

        assert!(session_delete_item(item_id.clone()).ok);
        assert!(session_delete_item(item_id).ok);
        assert!(session_refresh().items.is_empty());

        assert!(account_log_out().ok);
        let closed = session_refresh();
        assert_eq!(closed.error_code.as_deref(), Some("session_closed"));
        let anonymous = session_open();
        assert_eq!(anonymous.error_code.as_deref(), Some("not_signed_in"));

        let back = account_log_in("admin@example.com".to_string(), "secret1".to_string());
        assert_eq!(back.uid, admin.uid);
        let wrong = account_log_in("admin@example.com".to_string(), "wrong-pass".to_string());
        assert!(!wrong.ok);
    }
}
