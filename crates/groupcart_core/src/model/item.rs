//! Shopping list items.

use super::{require_text, RecordValidationError};
use serde::{Deserialize, Serialize};

/// Store-generated item key.
pub type ItemId = String;

/// Wire shape of one item under a list path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDocument {
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub purchased: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShoppingItem {
    pub id: ItemId,
    pub name: String,
    pub category: String,
    pub purchased: bool,
}

impl ShoppingItem {
    pub fn from_document(
        id: impl Into<ItemId>,
        document: ItemDocument,
    ) -> Result<Self, RecordValidationError> {
        require_text("name", &document.name)?;
        require_text("category", &document.category)?;
        Ok(Self {
            id: id.into(),
            name: document.name,
            category: document.category,
            purchased: document.purchased,
        })
    }

    /// Display form, e.g. `Milk (Dairy)`.
    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.category)
    }
}

/// Validated input for a new item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewItem {
    name: String,
    category: String,
}

impl NewItem {
    /// Trims both fields. Returns `None` when either is blank.
    pub fn parse(name: &str, category: &str) -> Option<Self> {
        let name = name.trim();
        let category = category.trim();
        if name.is_empty() || category.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            category: category.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn to_document(&self) -> ItemDocument {
        ItemDocument {
            name: self.name.clone(),
            category: self.category.clone(),
            purchased: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ItemDocument, NewItem, ShoppingItem};

    #[test]
    fn new_item_trims_and_rejects_blank_fields() {
        let item = NewItem::parse("  Milk ", " Dairy").unwrap();
        assert_eq!(item.name(), "Milk");
        assert_eq!(item.category(), "Dairy");
        assert!(!item.to_document().purchased);

        assert!(NewItem::parse("   ", "Dairy").is_none());
        assert!(NewItem::parse("Milk", "").is_none());
    }

    #[test]
    fn label_shows_name_and_category() {
        let item = ShoppingItem::from_document(
            "i1",
            ItemDocument {
                name: "Milk".to_string(),
                category: "Dairy".to_string(),
                purchased: false,
            },
        )
        .unwrap();
        assert_eq!(item.label(), "Milk (Dairy)");
    }

    #[test]
    fn missing_purchased_defaults_to_false() {
        let document: ItemDocument =
            serde_json::from_value(serde_json::json!({"name": "Eggs", "category": "Dairy"}))
                .unwrap();
        assert!(!document.purchased);
    }
}
