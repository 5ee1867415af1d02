//! SQLite-backed document store.
//!
//! # Responsibility
//! - Persist the document tree as one row per scalar leaf in `documents`.
//! - Rebuild subtrees on read and fan out snapshots after each write.
//!
//! # Invariants
//! - A stored leaf never has stored descendants; writing below a leaf
//!   replaces the leaf.
//! - Writes and subscribe calls are serialized through `write_gate`, so an
//!   initial snapshot can never miss a concurrent write.
//! - Arrays are stored as a single JSON leaf.

use super::path::StorePath;
use super::watch::{Subscription, WatchRegistry};
use super::{DocumentStore, StoreError, StoreResult};
use crate::db::{self, DbError, SharedConnection};
use log::debug;
use rusqlite::{params, Transaction};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

pub struct SqliteDocumentStore {
    conn: SharedConnection,
    registry: Arc<WatchRegistry>,
    write_gate: Mutex<()>,
    revision: AtomicU64,
}

impl SqliteDocumentStore {
    /// Creates a store over an already migrated connection.
    pub fn new(conn: SharedConnection) -> Self {
        Self {
            conn,
            registry: WatchRegistry::new(),
            write_gate: Mutex::new(()),
            revision: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<WatchRegistry> {
        &self.registry
    }

    /// Number of writes applied through this handle.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    fn read(&self, path: &StorePath) -> StoreResult<Option<Value>> {
        let conn = db::lock(&self.conn)?;
        let rows = if path.is_root() {
            let mut stmt = conn.prepare("SELECT path, value FROM documents;")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<(String, String)>>>()?;
            rows
        } else {
            let (lower, upper) = subtree_bounds(path);
            let mut stmt = conn.prepare(
                "SELECT path, value
                 FROM documents
                 WHERE path = ?1 OR (path >= ?2 AND path < ?3);",
            )?;
            let rows = stmt
                .query_map(params![path.as_str(), lower, upper], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .collect::<rusqlite::Result<Vec<(String, String)>>>()?;
            rows
        };
        drop(conn);

        assemble_subtree(path, rows)
    }

    fn write(
        &self,
        event: &'static str,
        written: &[StorePath],
        apply: impl FnOnce(&Transaction<'_>) -> StoreResult<()>,
    ) -> StoreResult<()> {
        let _gate = self.gate()?;
        {
            let mut conn = db::lock(&self.conn)?;
            let tx = conn.transaction()?;
            apply(&tx)?;
            tx.commit()?;
        }

        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        let delivered = self
            .registry
            .notify(written, revision, |path| self.read(path));
        debug!(
            "event={} module=store status=ok paths={} revision={} delivered={}",
            event,
            written.len(),
            revision,
            delivered
        );
        Ok(())
    }

    fn gate(&self) -> StoreResult<MutexGuard<'_, ()>> {
        self.write_gate
            .lock()
            .map_err(|_| StoreError::Db(DbError::LockPoisoned))
    }
}

impl DocumentStore for SqliteDocumentStore {
    fn get(&self, path: &StorePath) -> StoreResult<Option<Value>> {
        self.read(path)
    }

    fn set(&self, path: &StorePath, value: Value) -> StoreResult<()> {
        if path.is_root() && !(value.is_object() || value.is_null()) {
            return Err(StoreError::InvalidValue(
                "the root can only hold an object".to_string(),
            ));
        }
        self.write("store_set", std::slice::from_ref(path), |tx| {
            replace_subtree(tx, path, &value)
        })
    }

    fn update(&self, path: &StorePath, children: Map<String, Value>) -> StoreResult<()> {
        if children.is_empty() {
            return Ok(());
        }
        let targets = children
            .keys()
            .map(|key| path.child(key))
            .collect::<StoreResult<Vec<_>>>()?;

        self.write("store_update", &targets, |tx| {
            for (target, value) in targets.iter().zip(children.values()) {
                replace_subtree(tx, target, value)?;
            }
            Ok(())
        })
    }

    fn remove(&self, path: &StorePath) -> StoreResult<()> {
        self.write("store_remove", std::slice::from_ref(path), |tx| {
            delete_subtree(tx, path)
        })
    }

    fn push(&self, path: &StorePath, value: Value) -> StoreResult<String> {
        let key = Uuid::now_v7().simple().to_string();
        let target = path.child(&key)?;
        self.set(&target, value)?;
        Ok(key)
    }

    fn watch(&self, path: &StorePath) -> StoreResult<Subscription> {
        let _gate = self.gate()?;
        let value = self.read(path)?;
        Ok(self
            .registry
            .subscribe(path.clone(), value, self.revision()))
    }
}

/// Half-open key range `[path/, path0)` covering every strict descendant.
fn subtree_bounds(path: &StorePath) -> (String, String) {
    // '0' is the byte right after '/'.
    (format!("{}/", path.as_str()), format!("{}0", path.as_str()))
}

fn delete_subtree(tx: &Transaction<'_>, path: &StorePath) -> StoreResult<()> {
    if path.is_root() {
        tx.execute("DELETE FROM documents;", [])?;
        return Ok(());
    }
    let (lower, upper) = subtree_bounds(path);
    tx.execute(
        "DELETE FROM documents WHERE path = ?1 OR (path >= ?2 AND path < ?3);",
        params![path.as_str(), lower, upper],
    )?;
    Ok(())
}

fn replace_subtree(tx: &Transaction<'_>, path: &StorePath, value: &Value) -> StoreResult<()> {
    for ancestor in path.ancestors() {
        tx.execute("DELETE FROM documents WHERE path = ?1;", [ancestor.as_str()])?;
    }
    delete_subtree(tx, path)?;
    insert_leaves(tx, path, value)
}

fn insert_leaves(tx: &Transaction<'_>, path: &StorePath, value: &Value) -> StoreResult<()> {
    match value {
        Value::Null => Ok(()),
        Value::Object(map) => {
            for (key, child) in map {
                insert_leaves(tx, &path.child(key)?, child)?;
            }
            Ok(())
        }
        leaf => {
            if path.is_root() {
                return Err(StoreError::InvalidValue(
                    "scalar values need a non-root path".to_string(),
                ));
            }
            tx.execute(
                "INSERT INTO documents (path, value) VALUES (?1, ?2);",
                params![path.as_str(), serde_json::to_string(leaf)?],
            )?;
            Ok(())
        }
    }
}

fn assemble_subtree(path: &StorePath, rows: Vec<(String, String)>) -> StoreResult<Option<Value>> {
    let mut tree = Map::new();
    for (row_path, raw) in rows {
        let leaf: Value = serde_json::from_str(&raw)?;
        if row_path == path.as_str() {
            return Ok(Some(leaf));
        }
        let relative = if path.is_root() {
            row_path.as_str()
        } else {
            &row_path[path.as_str().len() + 1..]
        };
        let segments: Vec<&str> = relative.split('/').collect();
        insert_leaf(&mut tree, &segments, leaf);
    }

    if tree.is_empty() {
        Ok(None)
    } else {
        Ok(Some(Value::Object(tree)))
    }
}

fn insert_leaf(node: &mut Map<String, Value>, segments: &[&str], leaf: Value) {
    match segments {
        [] => {}
        [last] => {
            node.insert((*last).to_string(), leaf);
        }
        [first, rest @ ..] => {
            let child = node
                .entry((*first).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(map) = child {
                insert_leaf(map, rest, leaf);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SqliteDocumentStore;
    use crate::db::open_shared_db_in_memory;
    use crate::store::{DocumentStore, StorePath};
    use serde_json::json;

    fn store() -> SqliteDocumentStore {
        SqliteDocumentStore::new(open_shared_db_in_memory().unwrap())
    }

    fn p(raw: &str) -> StorePath {
        StorePath::parse(raw).unwrap()
    }

    #[test]
    fn set_then_get_rebuilds_nested_objects() {
        let store = store();
        store
            .set(&p("groups/g1"), json!({"admin": "u1", "members": {"u1": true}}))
            .unwrap();

        assert_eq!(
            store.get(&p("groups/g1")).unwrap(),
            Some(json!({"admin": "u1", "members": {"u1": true}}))
        );
        assert_eq!(store.get(&p("groups/g1/admin")).unwrap(), Some(json!("u1")));
        assert_eq!(store.get(&p("groups/g2")).unwrap(), None);
    }

    #[test]
    fn set_replaces_whole_subtree_and_null_removes() {
        let store = store();
        store.set(&p("users/u1"), json!({"email": "a@x.io", "groupId": "g1"})).unwrap();
        store.set(&p("users/u1"), json!({"email": "a@x.io"})).unwrap();
        assert_eq!(store.get(&p("users/u1/groupId")).unwrap(), None);

        store.set(&p("users/u1"), json!(null)).unwrap();
        assert_eq!(store.get(&p("users/u1")).unwrap(), None);
    }

    #[test]
    fn update_touches_only_named_children() {
        let store = store();
        store.set(&p("users/u1"), json!({"email": "a@x.io", "groupId": "g1"})).unwrap();

        let mut children = serde_json::Map::new();
        children.insert("groupId".to_string(), json!(null));
        store.update(&p("users/u1"), children).unwrap();

        assert_eq!(store.get(&p("users/u1")).unwrap(), Some(json!({"email": "a@x.io"})));
    }

    #[test]
    fn writing_below_a_leaf_replaces_the_leaf() {
        let store = store();
        store.set(&p("a/b"), json!(true)).unwrap();
        store.set(&p("a/b/c"), json!(1)).unwrap();
        assert_eq!(store.get(&p("a")).unwrap(), Some(json!({"b": {"c": 1}})));
    }

    #[test]
    fn push_keys_sort_in_insertion_order() {
        let store = store();
        let first = store.push(&p("list"), json!({"n": 1})).unwrap();
        let second = store.push(&p("list"), json!({"n": 2})).unwrap();
        assert!(first < second);

        let list = store.get(&p("list")).unwrap().unwrap();
        let keys: Vec<&String> = list.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec![&first, &second]);
    }

    #[test]
    fn removing_absent_path_is_ok() {
        let store = store();
        store.remove(&p("groups/none/shopping/missing")).unwrap();
    }

    #[test]
    fn watch_sees_initial_then_descendant_writes() {
        let store = store();
        store.set(&p("groups/g1/shopping/i1"), json!({"name": "Milk"})).unwrap();

        let sub = store.watch(&p("groups/g1/shopping")).unwrap();
        let initial = sub.try_next().unwrap();
        assert!(initial.initial);
        assert_eq!(initial.value, Some(json!({"i1": {"name": "Milk"}})));

        store.remove(&p("groups/g1/shopping/i1")).unwrap();
        let after = sub.try_next().unwrap();
        assert!(!after.initial);
        assert_eq!(after.value, None);

        store.set(&p("groups/g2/shopping/i9"), json!({"name": "Eggs"})).unwrap();
        assert!(sub.try_next().is_none());
    }

    #[test]
    fn watch_sees_ancestor_writes() {
        let store = store();
        let sub = store.watch(&p("groups/g1/members")).unwrap();
        sub.try_next();

        store
            .set(&p("groups/g1"), json!({"admin": "u1", "members": {"u1": true}}))
            .unwrap();
        assert_eq!(sub.try_next().unwrap().value, Some(json!({"u1": true})));
    }

    #[test]
    fn scalar_at_root_is_rejected() {
        let store = store();
        assert!(store.set(&StorePath::root(), json!(5)).is_err());
    }
}
