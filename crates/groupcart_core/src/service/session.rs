//! Live group session: the shared list screen without the UI.
//!
//! # Responsibility
//! - Resolve the caller's group and admin status.
//! - Keep a view of members and items current from store subscriptions.
//! - Run list and membership mutations for the caller.
//!
//! # Invariants
//! - State moves `Unresolved -> Resolving -> Ready <-> Mutating`. `Mutating`
//!   only lasts for the body of a mutation call, so a caller holding the
//!   session between calls always observes `Ready`.
//! - The list is `groups/{id}/shopping` where `id` is the user's stored
//!   `groupId`, else the user's own id (an implicit single-user group).
//! - `loading` starts `true` and turns `false` on the first applied list
//!   snapshot; it never turns back on for the lifetime of the session, even
//!   when the group is re-resolved.
//! - Admin status is `groups/{id}/admin == uid`, the same check used by
//!   [`crate::model::group::Group::is_admin`].
//! - Dropping the session releases every subscription it holds.
//! - A malformed member or item entry is skipped; it never blocks the rest
//!   of the view from updating.

use crate::identity::AuthUser;
use crate::model::group::{GroupId, MemberEntry, MemberKind};
use crate::model::item::{ItemId, NewItem, ShoppingItem};
use crate::repo::group_repo::GroupRepository;
use crate::repo::list_repo::{list_path, parse_items, ListRepository};
use crate::repo::user_repo::{parse_user, UserRepository};
use crate::repo::{RepoError, RepoResult};
use crate::store::{path, SharedStore, Snapshot, StorePath, Subscription};
use log::{debug, error, info, warn};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

/// Longest `wait_for_change` blocks on the list channel before it also
/// checks the user, admin and member subscriptions.
const WAIT_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unresolved,
    Resolving,
    Ready,
    Mutating,
}

/// One row of the member list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberView {
    pub member_id: String,
    /// Account email when it could be looked up, or the invited address.
    pub email: Option<String>,
    pub invited: bool,
}

/// Everything the list screen renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    pub state: SessionState,
    /// Group whose list is bound; `None` until resolved.
    pub group_id: Option<GroupId>,
    pub is_admin: bool,
    pub loading: bool,
    pub members: Vec<MemberView>,
    pub items: Vec<ShoppingItem>,
}

impl SessionView {
    fn unresolved() -> Self {
        Self {
            state: SessionState::Unresolved,
            group_id: None,
            is_admin: false,
            loading: true,
            members: Vec::new(),
            items: Vec::new(),
        }
    }

    pub fn item_labels(&self) -> Vec<String> {
        self.items.iter().map(ShoppingItem::label).collect()
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug)]
pub enum SessionError {
    /// No group is bound yet.
    Unresolved,
    /// Caller is not the admin of the session's group.
    NotAdmin,
    ItemNotFound(ItemId),
    Repo(RepoError),
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unresolved => "session_unresolved",
            Self::NotAdmin => "not_admin",
            Self::ItemNotFound(_) => "item_not_found",
            Self::Repo(err) => err.code(),
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::Unresolved => "Your list is still loading.".to_string(),
            Self::NotAdmin => "Only the group admin can add members.".to_string(),
            Self::ItemNotFound(_) => "That item no longer exists.".to_string(),
            Self::Repo(_) => "Something went wrong. Please try again.".to_string(),
        }
    }
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unresolved => write!(f, "session has no resolved group"),
            Self::NotAdmin => write!(f, "caller is not the group admin"),
            Self::ItemNotFound(id) => write!(f, "item not found: {id}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SessionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for SessionError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<crate::store::StoreError> for SessionError {
    fn from(value: crate::store::StoreError) -> Self {
        Self::Repo(RepoError::Store(value))
    }
}

/// Subscriptions tied to the currently bound group.
struct GroupWatches {
    items: Subscription,
    admin: Subscription,
    members: Subscription,
}

pub struct GroupSession {
    user: AuthUser,
    store: SharedStore,
    users: UserRepository,
    groups: GroupRepository,
    lists: ListRepository,
    view: SessionView,
    user_watch: Subscription,
    group_watches: Option<GroupWatches>,
}

impl GroupSession {
    /// Resolves the caller's group and subscribes to it.
    ///
    /// Snapshots are applied by [`GroupSession::sync`]; until the first call
    /// the view is `loading` with no members or items.
    pub fn open(user: AuthUser, store: SharedStore) -> SessionResult<Self> {
        let user_watch = store.watch(&path::user(&user.uid)?)?;
        let mut session = Self {
            users: UserRepository::new(store.clone()),
            groups: GroupRepository::new(store.clone()),
            lists: ListRepository::new(store.clone()),
            store,
            user,
            view: SessionView::unresolved(),
            user_watch,
            group_watches: None,
        };

        session.view.state = SessionState::Resolving;
        let initial = session.user_watch.drain_latest();
        let group_id = session.group_id_from(initial.and_then(|snapshot| snapshot.value))?;
        session.bind(group_id)?;
        Ok(session)
    }

    pub fn user(&self) -> &AuthUser {
        &self.user
    }

    pub fn view(&self) -> &SessionView {
        &self.view
    }

    pub fn state(&self) -> SessionState {
        self.view.state
    }

    /// Whether the add-member control should be shown.
    pub fn can_add_members(&self) -> bool {
        self.view.is_admin && self.view.group_id.is_some()
    }

    /// Applies every queued snapshot. Returns whether the view changed.
    ///
    /// Each subscription is applied on its own. When re-resolving the group
    /// fails, the other snapshots are still applied and the first error is
    /// returned afterwards.
    pub fn sync(&mut self) -> SessionResult<bool> {
        let mut changed = false;
        let mut failure = None;

        if let Some(snapshot) = self.user_watch.drain_latest() {
            match self.rebind_from(snapshot) {
                Ok(rebound) => changed |= rebound,
                Err(err) => failure = Some(self.log_sync_failure("group_resolve", err)),
            }
        }

        if let Some(snapshot) = self.watches().and_then(|watches| watches.admin.drain_latest()) {
            changed |= self.apply_admin(&snapshot);
        }
        if let Some(snapshot) = self.watches().and_then(|watches| watches.members.drain_latest()) {
            changed |= self.apply_members(&snapshot);
        }
        if let Some(snapshot) = self.watches().and_then(|watches| watches.items.drain_latest()) {
            self.apply_items(snapshot);
            changed = true;
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(changed),
        }
    }

    /// Waits up to `timeout` for the view to change.
    ///
    /// Blocks on the list subscription; user, admin and member snapshots are
    /// picked up at least every `WAIT_SLICE`.
    pub fn wait_for_change(&mut self, timeout: Duration) -> SessionResult<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.sync()? {
                return Ok(true);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            let slice = remaining.min(WAIT_SLICE);
            let received = match self.watches() {
                Some(watches) => watches.items.next_timeout(slice),
                None => {
                    std::thread::sleep(slice);
                    None
                }
            };
            if let Some(snapshot) = received {
                self.apply_items(snapshot);
                self.sync()?;
                return Ok(true);
            }
        }
    }

    /// Appends an unpurchased item. Blank name or category is a no-op.
    pub fn add_item(&mut self, name: &str, category: &str) -> SessionResult<Option<ShoppingItem>> {
        let Some(new_item) = NewItem::parse(name, category) else {
            debug!("event=add_item module=session status=skipped reason=blank_input");
            return Ok(None);
        };
        let group_id = self.require_group()?;
        self.mutate("add_item", |session| session.lists.add_item(&group_id, &new_item))
            .map(Some)
    }

    /// Flips the stored purchased flag and returns the new value.
    pub fn toggle_purchased(&mut self, item_id: &str) -> SessionResult<bool> {
        let group_id = self.require_group()?;
        let item = self
            .lists
            .get_item(&group_id, item_id)?
            .ok_or_else(|| SessionError::ItemNotFound(item_id.to_string()))?;
        let purchased = !item.purchased;
        self.mutate("toggle_purchased", |session| {
            session.lists.set_purchased(&group_id, item_id, purchased)
        })?;
        Ok(purchased)
    }

    /// Removes an item. Deleting an unknown id succeeds.
    pub fn delete_item(&mut self, item_id: &str) -> SessionResult<()> {
        let group_id = self.require_group()?;
        self.mutate("delete_item", |session| session.lists.delete_item(&group_id, item_id))
    }

    /// Adds an email invitation to the group. Admin only; blank is a no-op.
    ///
    /// The entry is keyed by a generated id and is not linked to any account.
    pub fn add_member(&mut self, email: &str) -> SessionResult<Option<String>> {
        let group_id = self.require_group()?;
        let is_admin = self
            .groups
            .get_group(&group_id)?
            .is_some_and(|group| group.is_admin(&self.user.uid));
        if !is_admin {
            warn!(
                "event=add_member module=session status=rejected uid={} group_id={}",
                self.user.uid, group_id
            );
            return Err(SessionError::NotAdmin);
        }

        let email = email.trim();
        if email.is_empty() {
            return Ok(None);
        }
        self.mutate("add_member", |session| {
            session.groups.invite_member(&group_id, email)
        })
        .map(Some)
    }

    /// Stored `groupId`, else the caller's own id.
    fn group_id_from(&self, user_value: Option<Value>) -> SessionResult<GroupId> {
        let group_id = match parse_user(&self.user.uid, user_value)? {
            Some(record) => record.effective_group_id().to_string(),
            None => self.user.uid.clone(),
        };
        Ok(group_id)
    }

    fn rebind_from(&mut self, snapshot: Snapshot) -> SessionResult<bool> {
        let group_id = self.group_id_from(snapshot.value)?;
        if self.view.group_id.as_deref() == Some(group_id.as_str()) {
            return Ok(false);
        }
        self.bind(group_id)?;
        Ok(true)
    }

    /// Subscribes to `group_id`, then swaps the new watches in. On failure the
    /// previous binding stays in place.
    fn bind(&mut self, group_id: GroupId) -> SessionResult<()> {
        let watches = GroupWatches {
            items: self.watch(list_path(&group_id))?,
            admin: self.watch(path::group_admin(&group_id).map_err(RepoError::from))?,
            members: self.watch(path::group_members(&group_id).map_err(RepoError::from))?,
        };

        info!(
            "event=session_resolve module=session status=ok uid={} group_id={}",
            self.user.uid, group_id
        );

        self.group_watches = Some(watches);
        self.view.group_id = Some(group_id);
        self.view.is_admin = false;
        self.view.members.clear();
        self.view.items.clear();
        self.view.state = SessionState::Ready;
        Ok(())
    }

    fn watch(&self, target: RepoResult<StorePath>) -> SessionResult<Subscription> {
        Ok(self.store.watch(&target?)?)
    }

    fn watches(&self) -> Option<&GroupWatches> {
        self.group_watches.as_ref()
    }

    fn apply_admin(&mut self, snapshot: &Snapshot) -> bool {
        let is_admin =
            snapshot.value.as_ref().and_then(Value::as_str) == Some(self.user.uid.as_str());
        let changed = self.view.is_admin != is_admin;
        self.view.is_admin = is_admin;
        changed
    }

    fn apply_members(&mut self, snapshot: &Snapshot) -> bool {
        let entries = match &snapshot.value {
            Some(Value::Object(map)) => map
                .iter()
                .filter_map(|(key, raw)| match MemberEntry::from_json(key, raw) {
                    Ok(entry) => Some(entry),
                    Err(err) => {
                        warn!(
                            "event=member_parse module=session status=skipped member={} error={}",
                            key, err
                        );
                        None
                    }
                })
                .collect(),
            _ => Vec::new(),
        };
        let views = self.member_views(entries);
        let changed = self.view.members != views;
        self.view.members = views;
        changed
    }

    fn apply_items(&mut self, snapshot: Snapshot) {
        self.view.items = parse_items(&snapshot.path, snapshot.value);
        if self.view.loading {
            self.view.loading = false;
            debug!(
                "event=list_loaded module=session status=ok uid={} items={}",
                self.user.uid,
                self.view.items.len()
            );
        }
    }

    fn member_views(&self, entries: Vec<MemberEntry>) -> Vec<MemberView> {
        entries
            .into_iter()
            .map(|entry| match entry.kind {
                MemberKind::Account => {
                    let email = match self.users.get_user(&entry.key) {
                        Ok(record) => record.map(|record| record.email),
                        Err(err) => {
                            warn!(
                                "event=member_lookup module=session status=error member={} error_code={}",
                                entry.key,
                                err.code()
                            );
                            None
                        }
                    };
                    MemberView {
                        member_id: entry.key,
                        email,
                        invited: false,
                    }
                }
                MemberKind::Invited { email } => MemberView {
                    member_id: entry.key,
                    email: Some(email),
                    invited: true,
                },
            })
            .collect()
    }

    fn require_group(&self) -> SessionResult<GroupId> {
        self.view.group_id.clone().ok_or(SessionError::Unresolved)
    }

    fn log_sync_failure(&self, step: &'static str, err: SessionError) -> SessionError {
        error!(
            "event=session_sync module=session status=error uid={} step={} error_code={} error={}",
            self.user.uid,
            step,
            err.code(),
            err
        );
        err
    }

    /// Runs one store mutation. `Mutating` is visible only inside `apply`.
    fn mutate<T>(
        &mut self,
        operation: &'static str,
        apply: impl FnOnce(&Self) -> RepoResult<T>,
    ) -> SessionResult<T> {
        self.view.state = SessionState::Mutating;
        let result = apply(self);
        self.view.state = SessionState::Ready;

        match result {
            Ok(value) => {
                debug!(
                    "event={} module=session status=ok uid={}",
                    operation, self.user.uid
                );
                Ok(value)
            }
            Err(err) => {
                error!(
                    "event={} module=session status=error uid={} error_code={} error={}",
                    operation,
                    self.user.uid,
                    err.code(),
                    err
                );
                Err(err.into())
            }
        }
    }
}

impl Drop for GroupSession {
    fn drop(&mut self) {
        debug!(
            "event=session_close module=session status=ok uid={}",
            self.user.uid
        );
    }
}
