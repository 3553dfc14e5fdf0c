//! Core traits for taggable storage.
//!
//! These traits define the narrow interfaces the planner, the query executor
//! and the counter maintainer consume, so PostgreSQL and in-memory backends
//! are interchangeable.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::*;
use crate::plan::TagPlan;
use crate::scope::TagScope;

// =============================================================================
// TAG STORE
// =============================================================================

/// Persistent tag records.
///
/// Every lookup excludes soft-deleted tags and honours the optional scope.
#[async_trait]
pub trait TagStore: Send + Sync {
    /// Fetch every live tag whose id is in `ids` or whose name is in `names`,
    /// in a single store call.
    async fn resolve(
        &self,
        ids: &[i64],
        names: &[String],
        scope: Option<&dyn TagScope>,
    ) -> Result<Vec<Tag>>;

    /// Fetch a live tag by id.
    async fn find(&self, id: i64, scope: Option<&dyn TagScope>) -> Result<Option<Tag>>;

    /// Fetch a live tag by exact (case-sensitive) name.
    async fn find_by_name(&self, name: &str, scope: Option<&dyn TagScope>)
        -> Result<Option<Tag>>;

    /// Insert a new tag with a zero item count.
    ///
    /// Returns [`crate::Error::Conflict`] when the name is already taken.
    async fn insert(&self, tag: NewTag) -> Result<Tag>;

    /// List live tags in the given order.
    async fn list(
        &self,
        order: TagOrder,
        limit: i64,
        offset: i64,
        scope: Option<&dyn TagScope>,
    ) -> Result<Vec<Tag>>;

    /// Soft-delete a tag. Returns false if it was missing or already deleted.
    async fn soft_delete(&self, id: i64) -> Result<bool>;

    /// Restore a soft-deleted tag. Returns false if it was not deleted.
    async fn restore(&self, id: i64) -> Result<bool>;
}

// =============================================================================
// ATTACHMENT STORE
// =============================================================================

/// The item/tag join table.
///
/// Every mutation that touches a tag's `item_count` is atomic with the
/// attachment change that caused it. A count only moves when a row's
/// liveness (see [`crate::TaggableConfig::is_live`]) changes.
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    /// Insert the `(item_id, tag_id)` row and bump the tag's count.
    ///
    /// Returns false, changing nothing, if the row already exists.
    async fn attach(&self, item_id: i64, tag_id: i64, synced: &SyncedAttributes)
        -> Result<bool>;

    /// Delete the `(item_id, tag_id)` row and lower the tag's count.
    ///
    /// Returns false, changing nothing, if the row does not exist.
    async fn detach(&self, item_id: i64, tag_id: i64) -> Result<bool>;

    /// Ids of every tag attached to the item, including deleted tags.
    async fn tag_ids_for_item(&self, item_id: i64) -> Result<Vec<i64>>;

    /// Live tags attached to the item, oldest attachment first.
    async fn tags_for_item(&self, item_id: i64) -> Result<Vec<ItemTag>>;

    /// Rewrite the synced attributes of every row of the item.
    ///
    /// Rows whose liveness flips adjust their tag's count in the same
    /// atomic operation.
    async fn sync_attributes(&self, item_id: i64, synced: &SyncedAttributes)
        -> Result<SyncOutcome>;

    /// Execute a plan and return matching item ids in store order.
    async fn item_ids(&self, plan: &TagPlan, options: &ItemQueryOptions) -> Result<Vec<i64>>;

    /// Execute a plan as a count of distinct matching items.
    async fn count(&self, plan: &TagPlan) -> Result<i64>;
}

// =============================================================================
// ITEM STORE
// =============================================================================

/// The host application's entity persistence.
#[async_trait]
pub trait ItemStore: Send + Sync {
    type Item: Send;

    /// Primary key of an item record.
    fn item_id(item: &Self::Item) -> i64;

    /// Fetch the records for `ids`, in any order. Missing ids are skipped.
    async fn fetch_many(&self, ids: &[i64]) -> Result<Vec<Self::Item>>;
}
