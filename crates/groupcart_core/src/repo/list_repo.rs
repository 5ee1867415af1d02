//! Shopping list access under `groups/{id}/shopping`.
//!
//! # Invariants
//! - Items are returned in key order; push keys are time-ordered, so this is
//!   insertion order.
//! - No duplicate-name check and no ownership restriction.
//! - A malformed entry is skipped on read; it never hides the rest of the
//!   list.

use super::{decode, encode, RepoError, RepoResult};
use crate::model::item::{ItemDocument, NewItem, ShoppingItem};
use crate::store::{path, SharedStore, StorePath};
use log::warn;
use serde_json::{Map, Value};

#[derive(Clone)]
pub struct ListRepository {
    store: SharedStore,
}

impl ListRepository {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub fn add_item(&self, group_id: &str, item: &NewItem) -> RepoResult<ShoppingItem> {
        let document = item.to_document();
        let id = self.store.push(&list_path(group_id)?, encode(&document)?)?;
        Ok(ShoppingItem {
            id,
            name: document.name,
            category: document.category,
            purchased: document.purchased,
        })
    }

    /// Reads one item. A malformed node reads as absent, the same way
    /// [`parse_items`] leaves it out of the list.
    pub fn get_item(&self, group_id: &str, item_id: &str) -> RepoResult<Option<ShoppingItem>> {
        let item_path = list_path(group_id)?.child(item_id)?;
        let Some(value) = self.store.get(&item_path)? else {
            return Ok(None);
        };
        match parse_item(&item_path, item_id, value) {
            Ok(item) => Ok(Some(item)),
            Err(err) => {
                warn!(
                    "event=item_read module=repo status=skipped item_id={} error_code={}",
                    item_id,
                    err.code()
                );
                Ok(None)
            }
        }
    }

    /// Overwrites the purchased flag of an existing item.
    ///
    /// Racing a delete can leave a node holding only `purchased`; readers
    /// skip such nodes.
    pub fn set_purchased(&self, group_id: &str, item_id: &str, purchased: bool) -> RepoResult<()> {
        let mut children = Map::new();
        children.insert("purchased".to_string(), Value::Bool(purchased));
        self.store
            .update(&list_path(group_id)?.child(item_id)?, children)?;
        Ok(())
    }

    /// Removes an item. Removing an unknown id succeeds.
    pub fn delete_item(&self, group_id: &str, item_id: &str) -> RepoResult<()> {
        self.store.remove(&list_path(group_id)?.child(item_id)?)?;
        Ok(())
    }
}

/// `groups/{group_id}/shopping`
pub fn list_path(group_id: &str) -> RepoResult<StorePath> {
    Ok(path::group_shopping(group_id)?)
}

/// Decodes a list snapshot value into items in key order, skipping entries
/// that are not valid items.
pub fn parse_items(list_path: &StorePath, value: Option<Value>) -> Vec<ShoppingItem> {
    let entries = match value {
        Some(Value::Object(entries)) => entries,
        Some(_) => {
            warn!(
                "event=list_parse module=repo status=skipped path={} error_code=record_corrupt reason=not_an_object",
                list_path
            );
            return Vec::new();
        }
        None => return Vec::new(),
    };
    entries
        .into_iter()
        .filter_map(|(item_id, raw)| {
            let parsed = list_path
                .child(&item_id)
                .map_err(RepoError::from)
                .and_then(|item_path| parse_item(&item_path, &item_id, raw));
            match parsed {
                Ok(item) => Some(item),
                Err(err) => {
                    warn!(
                        "event=list_parse module=repo status=skipped item_id={} error_code={}",
                        item_id,
                        err.code()
                    );
                    None
                }
            }
        })
        .collect()
}

fn parse_item(item_path: &StorePath, item_id: &str, value: Value) -> RepoResult<ShoppingItem> {
    let document: ItemDocument = decode(item_path, value)?;
    ShoppingItem::from_document(item_id, document)
        .map_err(|err| RepoError::invalid_data(item_path, err))
}
