//! Core data models for tags, attachments and item snapshots.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Denormalized copy of item attributes stored on every attachment row.
pub type SyncedAttributes = serde_json::Map<String, JsonValue>;

// =============================================================================
// TAGS
// =============================================================================

/// A named label with a maintained count of attached items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    /// Number of live attachments referencing this tag.
    pub item_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Tag {
    /// Whether the tag has been soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Scalar value a scope may constrain or stamp on a tag column.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScopeValue {
    Int(i64),
    Text(String),
    Bool(bool),
}

impl fmt::Display for ScopeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeValue::Int(v) => write!(f, "{}", v),
            ScopeValue::Text(v) => write!(f, "{}", v),
            ScopeValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for ScopeValue {
    fn from(v: i64) -> Self {
        ScopeValue::Int(v)
    }
}

impl From<&str> for ScopeValue {
    fn from(v: &str) -> Self {
        ScopeValue::Text(v.to_string())
    }
}

impl From<String> for ScopeValue {
    fn from(v: String) -> Self {
        ScopeValue::Text(v)
    }
}

impl From<bool> for ScopeValue {
    fn from(v: bool) -> Self {
        ScopeValue::Bool(v)
    }
}

/// A tag about to be inserted.
///
/// `columns` carries extra column values stamped by a [`crate::TagScope`],
/// such as a tenant partition key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTag {
    pub name: String,
    pub columns: BTreeMap<String, ScopeValue>,
}

impl NewTag {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: BTreeMap::new(),
        }
    }

    /// Set an extra column value on the new tag.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<ScopeValue>) -> &mut Self {
        self.columns.insert(column.into(), value.into());
        self
    }
}

/// Orderings available when listing tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagOrder {
    /// Most recently created first.
    Newest,
    /// Most recently updated (including count changes) first.
    RecentlyUpdated,
    /// By name, ascending.
    Alphabetical,
    /// Highest item count first.
    #[default]
    Popular,
}

// =============================================================================
// ATTACHMENTS
// =============================================================================

/// Join row linking one item to one tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub item_id: i64,
    pub tag_id: i64,
    pub attached_at: DateTime<Utc>,
    #[serde(default)]
    pub synced_attributes: SyncedAttributes,
}

/// A tag as seen from one item, with the time it was attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemTag {
    pub tag: Tag,
    pub attached_at: DateTime<Utc>,
}

/// Changes applied by an attribute sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Number of attachment rows rewritten.
    pub rows: u64,
    /// Tags whose count went up because a row became live.
    pub incremented: Vec<i64>,
    /// Tags whose count went down because a row stopped being live.
    pub decremented: Vec<i64>,
}

// =============================================================================
// ITEMS
// =============================================================================

/// Snapshot of a tagged item handed over at a lifecycle boundary.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ItemSnapshot {
    pub id: i64,
    #[serde(default)]
    pub attributes: SyncedAttributes,
}

impl ItemSnapshot {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            attributes: SyncedAttributes::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Set an attribute in place.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<JsonValue>) {
        self.attributes.insert(name.into(), value.into());
    }
}

/// How an item left the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteKind {
    /// The item row is kept with its soft-delete column set.
    Soft,
    /// The item row is gone.
    Hard,
}

// =============================================================================
// ITEM QUERIES
// =============================================================================

/// Ordering of item ids returned by a tag query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOrder {
    #[default]
    ItemIdAsc,
    ItemIdDesc,
    /// Latest attachment of the anchor tag first.
    RecentFirst,
    /// Earliest attachment of the anchor tag first.
    OldestFirst,
}

/// Ordering and window applied by the attachment store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemQueryOptions {
    pub order: ItemOrder,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// One page of query results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Total number of matching items across all pages.
    pub total: i64,
    pub per_page: i64,
    /// 1-based page number.
    pub page: i64,
}

impl<T> Page<T> {
    /// Number of the last page (at least 1).
    pub fn last_page(&self) -> i64 {
        if self.per_page <= 0 || self.total == 0 {
            return 1;
        }
        (self.total - 1) / self.per_page + 1
    }

    pub fn has_more(&self) -> bool {
        self.page < self.last_page()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_snapshot_builder() {
        let item = ItemSnapshot::new(42)
            .with_attribute("deleted_at", JsonValue::Null)
            .with_attribute("status", "published");

        assert_eq!(item.id, 42);
        assert_eq!(item.attributes.len(), 2);
        assert_eq!(item.attributes["status"], "published");
    }

    #[test]
    fn test_new_tag_columns() {
        let mut tag = NewTag::new("rust");
        tag.set("tenant_id", 7_i64);

        assert_eq!(tag.columns.get("tenant_id"), Some(&ScopeValue::Int(7)));
    }

    #[test]
    fn test_page_last_page() {
        let page = Page::<i64> {
            items: vec![],
            total: 31,
            per_page: 15,
            page: 1,
        };
        assert_eq!(page.last_page(), 3);
        assert!(page.has_more());

        let empty = Page::<i64> {
            items: vec![],
            total: 0,
            per_page: 15,
            page: 1,
        };
        assert_eq!(empty.last_page(), 1);
        assert!(!empty.has_more());
    }

    #[test]
    fn test_scope_value_display() {
        assert_eq!(ScopeValue::Int(3).to_string(), "3");
        assert_eq!(ScopeValue::from("acme").to_string(), "acme");
        assert_eq!(ScopeValue::from(true).to_string(), "true");
    }
}
