use groupcart_core::db::{open_shared_db_in_memory, SharedConnection};
use groupcart_core::store::path;
use groupcart_core::{
    AccountService, AuthUser, DocumentStore, GroupSession, IdentityProvider, SessionError,
    SessionState, SharedStore, SqliteDocumentStore, SqliteIdentityProvider,
};
use serde_json::{json, Map};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const PASSWORD: &str = "secret1";
const WAIT: Duration = Duration::from_millis(500);

struct Backend {
    conn: SharedConnection,
    sqlite: Arc<SqliteDocumentStore>,
    store: SharedStore,
}

impl Backend {
    fn new() -> Self {
        let conn = open_shared_db_in_memory().unwrap();
        let sqlite = Arc::new(SqliteDocumentStore::new(conn.clone()));
        let store: SharedStore = sqlite.clone();
        Self {
            conn,
            sqlite,
            store,
        }
    }

    fn client(&self) -> AccountService<SqliteIdentityProvider> {
        AccountService::new(SqliteIdentityProvider::new(self.conn.clone()), self.store.clone())
    }

    /// Signs up an admin and a member of the admin's group.
    fn group_of_two(&self) -> (AuthUser, AuthUser, String) {
        let created = self.client().sign_up("a@example.com", PASSWORD, None).unwrap();
        let joined = self
            .client()
            .sign_up("b@example.com", PASSWORD, Some(created.group_id()))
            .unwrap();
        (
            created.user().clone(),
            joined.user().clone(),
            created.group_id().to_string(),
        )
    }

    fn open(&self, user: &AuthUser) -> GroupSession {
        let mut session = GroupSession::open(user.clone(), self.store.clone()).unwrap();
        session.sync().unwrap();
        session
    }
}

#[test]
fn item_added_by_one_member_reaches_the_other_and_toggles_back() {
    let backend = Backend::new();
    let (a, b, group_id) = backend.group_of_two();
    let mut session_a = backend.open(&a);
    let mut session_b = backend.open(&b);
    assert_eq!(session_a.view().group_id.as_deref(), Some(group_id.as_str()));
    assert_eq!(session_b.view().group_id.as_deref(), Some(group_id.as_str()));

    let milk = session_a.add_item("Milk", "Dairy").unwrap().unwrap();
    assert!(!milk.purchased);

    assert!(session_b.wait_for_change(WAIT).unwrap());
    assert_eq!(session_b.view().item_labels(), vec!["Milk (Dairy)"]);

    assert!(session_b.toggle_purchased(&milk.id).unwrap());
    assert!(session_a.wait_for_change(WAIT).unwrap());
    assert!(session_a.view().items[0].purchased);

    session_a.delete_item(&milk.id).unwrap();
    assert_eq!(session_a.state(), SessionState::Ready);
    assert!(session_a.wait_for_change(WAIT).unwrap());
    assert!(session_b.wait_for_change(WAIT).unwrap());
    assert!(session_a.view().items.is_empty());
    assert!(session_b.view().items.is_empty());
}

#[test]
fn toggle_racing_a_delete_leaves_the_rest_of_the_list_readable() {
    let backend = Backend::new();
    let (a, b, group_id) = backend.group_of_two();
    let mut session_a = backend.open(&a);
    let mut session_b = backend.open(&b);
    let milk = session_a.add_item("Milk", "Dairy").unwrap().unwrap();
    session_a.add_item("Eggs", "Dairy").unwrap().unwrap();
    session_b.sync().unwrap();

    // B deletes while A's toggle write is already in flight.
    session_b.delete_item(&milk.id).unwrap();
    let mut purchased = Map::new();
    purchased.insert("purchased".to_string(), json!(true));
    let milk_path = path::group_shopping(&group_id)
        .unwrap()
        .child(&milk.id)
        .unwrap();
    backend.store.update(&milk_path, purchased).unwrap();

    assert!(session_a.sync().unwrap());
    assert!(session_b.sync().unwrap());
    assert_eq!(session_a.view().item_labels(), vec!["Eggs (Dairy)"]);
    assert_eq!(session_b.view().item_labels(), vec!["Eggs (Dairy)"]);

    session_b.add_item("Bread", "Bakery").unwrap().unwrap();
    assert!(session_a.wait_for_change(WAIT).unwrap());
    assert_eq!(
        session_a.view().item_labels(),
        vec!["Eggs (Dairy)", "Bread (Bakery)"]
    );
    assert!(matches!(
        session_a.toggle_purchased(&milk.id),
        Err(SessionError::ItemNotFound(_))
    ));
}

#[test]
fn malformed_entries_from_another_client_are_skipped() {
    let backend = Backend::new();
    let (a, b, group_id) = backend.group_of_two();
    let mut session = backend.open(&a);

    backend
        .store
        .set(&path::group_member(&group_id, "broken").unwrap(), json!(false))
        .unwrap();
    backend
        .store
        .push(&path::group_shopping(&group_id).unwrap(), json!("not an item"))
        .unwrap();
    backend
        .store
        .push(
            &path::group_shopping(&group_id).unwrap(),
            json!({"name": "Milk", "category": "Dairy", "purchased": false}),
        )
        .unwrap();

    assert!(session.sync().unwrap());
    assert_eq!(session.view().item_labels(), vec!["Milk (Dairy)"]);
    let mut member_ids = session
        .view()
        .members
        .iter()
        .map(|view| view.member_id.clone())
        .collect::<Vec<_>>();
    member_ids.sort();
    let mut expected = vec![a.uid.clone(), b.uid.clone()];
    expected.sort();
    assert_eq!(member_ids, expected);

    session.add_item("Bread", "Bakery").unwrap().unwrap();
    session.sync().unwrap();
    assert_eq!(
        session.view().item_labels(),
        vec!["Milk (Dairy)", "Bread (Bakery)"]
    );
}

#[test]
fn wait_for_change_wakes_on_a_write_from_another_thread() {
    let backend = Backend::new();
    let (a, _, group_id) = backend.group_of_two();
    let mut session = backend.open(&a);
    let store = backend.store.clone();

    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        store
            .push(
                &path::group_shopping(&group_id).unwrap(),
                json!({"name": "Coffee", "category": "Drinks", "purchased": false}),
            )
            .unwrap();
    });

    let started = Instant::now();
    assert!(session.wait_for_change(Duration::from_secs(5)).unwrap());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(session.view().item_labels(), vec!["Coffee (Drinks)"]);
    handle.join().unwrap();

    assert!(!session.wait_for_change(Duration::from_millis(60)).unwrap());
}

#[test]
fn toggling_twice_restores_the_original_flag() {
    let backend = Backend::new();
    let (a, _, _) = backend.group_of_two();
    let mut session = backend.open(&a);
    let eggs = session.add_item("Eggs", "Dairy").unwrap().unwrap();

    assert!(session.toggle_purchased(&eggs.id).unwrap());
    assert!(!session.toggle_purchased(&eggs.id).unwrap());
    session.sync().unwrap();
    assert!(!session.view().items[0].purchased);
    assert_eq!(session.state(), SessionState::Ready);
}

#[test]
fn toggling_a_missing_item_is_an_error() {
    let backend = Backend::new();
    let (a, _, _) = backend.group_of_two();
    let mut session = backend.open(&a);

    let err = session.toggle_purchased("nope").unwrap_err();
    assert!(matches!(err, SessionError::ItemNotFound(ref id) if id == "nope"));
    session.sync().unwrap();
    assert!(session.view().items.is_empty());
}

#[test]
fn deleting_removes_the_item_and_missing_ids_succeed() {
    let backend = Backend::new();
    let (a, b, _) = backend.group_of_two();
    let mut session_a = backend.open(&a);
    let mut session_b = backend.open(&b);
    let bread = session_a.add_item("Bread", "Bakery").unwrap().unwrap();
    session_a.add_item("Apples", "Produce").unwrap().unwrap();

    session_b.delete_item(&bread.id).unwrap();
    session_b.delete_item(&bread.id).unwrap();
    session_b.delete_item("never-existed").unwrap();

    session_a.wait_for_change(WAIT).unwrap();
    assert_eq!(session_a.view().item_labels(), vec!["Apples (Produce)"]);
}

#[test]
fn items_keep_insertion_order() {
    let backend = Backend::new();
    let (a, _, _) = backend.group_of_two();
    let mut session = backend.open(&a);
    for name in ["Milk", "Bread", "Apples", "Coffee"] {
        session.add_item(name, "Misc").unwrap();
    }
    session.sync().unwrap();
    let names = session
        .view()
        .items
        .iter()
        .map(|item| item.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["Milk", "Bread", "Apples", "Coffee"]);
}

#[test]
fn blank_item_input_is_ignored() {
    let backend = Backend::new();
    let (a, _, _) = backend.group_of_two();
    let mut session = backend.open(&a);

    assert!(session.add_item("  ", "Dairy").unwrap().is_none());
    assert!(session.add_item("Milk", "").unwrap().is_none());
    assert!(!session.sync().unwrap());
    assert!(session.view().items.is_empty());

    let trimmed = session.add_item("  Milk ", " Dairy ").unwrap().unwrap();
    assert_eq!(trimmed.label(), "Milk (Dairy)");
}

#[test]
fn loading_clears_on_first_list_snapshot_only() {
    let backend = Backend::new();
    let (a, _, _) = backend.group_of_two();

    let mut session = GroupSession::open(a, backend.store.clone()).unwrap();
    assert!(session.view().loading);
    assert_eq!(session.state(), SessionState::Ready);

    session.sync().unwrap();
    assert!(!session.view().loading);
    assert!(session.view().items.is_empty());

    session.add_item("Milk", "Dairy").unwrap();
    session.sync().unwrap();
    assert!(!session.view().loading);
}

#[test]
fn only_the_admin_can_add_members() {
    let backend = Backend::new();
    let (a, b, _) = backend.group_of_two();
    let mut admin = backend.open(&a);
    let mut member = backend.open(&b);

    assert!(admin.view().is_admin);
    assert!(admin.can_add_members());
    assert!(!member.view().is_admin);
    assert!(!member.can_add_members());

    let rejected = member.add_member("friend@example.com").unwrap_err();
    assert!(matches!(rejected, SessionError::NotAdmin));
    assert!(!member.sync().unwrap());

    assert!(admin.add_member("  ").unwrap().is_none());
    let key = admin.add_member("friend@example.com").unwrap().unwrap();
    assert!(member.wait_for_change(WAIT).unwrap());

    let invite = member
        .view()
        .members
        .iter()
        .find(|view| view.member_id == key)
        .unwrap();
    assert!(invite.invited);
    assert_eq!(invite.email.as_deref(), Some("friend@example.com"));
}

#[test]
fn member_views_resolve_account_emails() {
    let backend = Backend::new();
    let (a, b, _) = backend.group_of_two();
    let session = backend.open(&a);

    let mut emails = session
        .view()
        .members
        .iter()
        .filter(|view| !view.invited)
        .filter_map(|view| view.email.clone())
        .collect::<Vec<_>>();
    emails.sort();
    assert_eq!(emails, vec![a.email, b.email]);
}

#[test]
fn user_without_record_uses_the_group_named_by_their_uid() {
    let backend = Backend::new();
    let identity = SqliteIdentityProvider::new(backend.conn.clone());
    let loner = identity.sign_up("solo@example.com", PASSWORD).unwrap();

    let mut session = backend.open(&loner);
    assert_eq!(session.view().group_id.as_deref(), Some(loner.uid.as_str()));
    assert!(!session.view().is_admin);
    assert!(!session.can_add_members());
    assert!(matches!(
        session.add_member("x@example.com"),
        Err(SessionError::NotAdmin)
    ));

    session.add_item("Tea", "Drinks").unwrap().unwrap();
    session.sync().unwrap();
    assert_eq!(session.view().item_labels(), vec!["Tea (Drinks)"]);
    let list = path::group_shopping(&loner.uid).unwrap();
    assert!(backend.store.get(&list).unwrap().is_some());
}

#[test]
fn leaving_the_group_rebinds_the_open_session() {
    let backend = Backend::new();
    let created = backend.client().sign_up("a@example.com", PASSWORD, None).unwrap();
    let member_client = backend.client();
    let joined = member_client
        .sign_up("b@example.com", PASSWORD, Some(created.group_id()))
        .unwrap();

    let mut session = backend.open(joined.user());
    session.add_item("Milk", "Dairy").unwrap();
    session.sync().unwrap();
    assert_eq!(session.view().items.len(), 1);

    member_client.leave_group().unwrap();
    assert!(session.wait_for_change(WAIT).unwrap());
    assert_eq!(
        session.view().group_id.as_deref(),
        Some(joined.user().uid.as_str())
    );

    session.sync().unwrap();
    assert!(session.view().items.is_empty());
    assert!(!session.view().is_admin);
}

#[test]
fn dropping_a_session_releases_its_subscriptions() {
    let backend = Backend::new();
    let (a, b, _) = backend.group_of_two();
    assert_eq!(backend.sqlite.registry().watcher_count(), 0);

    let session_a = backend.open(&a);
    let session_b = backend.open(&b);
    // User record, list, admin and members for each session.
    assert_eq!(backend.sqlite.registry().watcher_count(), 8);

    drop(session_a);
    assert_eq!(backend.sqlite.registry().watcher_count(), 4);
    drop(session_b);
    assert_eq!(backend.sqlite.registry().watcher_count(), 0);
}
