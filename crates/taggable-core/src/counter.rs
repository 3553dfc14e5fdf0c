//! Tag attachment and item-count maintenance.
//!
//! [`TagCounter`] is driven by explicit calls at the item store's lifecycle
//! boundaries. It attaches and detaches tags, creates missing tags on
//! demand, and keeps each tag's `item_count` equal to its number of live
//! attachments.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::config::TaggableConfig;
use crate::defaults;
use crate::error::{Error, Result};
use crate::filter::TagRef;
use crate::models::{DeleteKind, ItemSnapshot, NewTag, SyncOutcome, Tag, TagOrder};
use crate::query::TagQuery;
use crate::scope::TagScope;
use crate::traits::{AttachmentStore, TagStore};

/// Maintains attachments and tag counts for one item type.
#[derive(Clone)]
pub struct TagCounter {
    tags: Arc<dyn TagStore>,
    attachments: Arc<dyn AttachmentStore>,
    config: Arc<TaggableConfig>,
    scope: Option<Arc<dyn TagScope>>,
}

impl TagCounter {
    pub fn new(
        tags: Arc<dyn TagStore>,
        attachments: Arc<dyn AttachmentStore>,
        config: Arc<TaggableConfig>,
    ) -> Self {
        Self {
            tags,
            attachments,
            config,
            scope: None,
        }
    }

    /// Restrict tag lookups and stamp created tags with a scope.
    pub fn with_scope(mut self, scope: Arc<dyn TagScope>) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn config(&self) -> &TaggableConfig {
        &self.config
    }

    /// Start a tag query over the same stores and scope.
    pub fn query(&self) -> TagQuery<'_> {
        let query = TagQuery::new(self.tags.as_ref(), self.attachments.as_ref());
        match &self.scope {
            Some(scope) => query.with_tag_scope(scope.clone()),
            None => query,
        }
    }

    fn scope(&self) -> Option<&dyn TagScope> {
        self.scope.as_deref()
    }

    /// Find a live tag by name, creating it when missing.
    ///
    /// A concurrent creation of the same name surfaces as a conflict from the
    /// store and is resolved by re-reading the winner.
    pub async fn find_or_create(&self, name: &str) -> Result<Tag> {
        if let Some(tag) = self.tags.find_by_name(name, self.scope()).await? {
            return Ok(tag);
        }

        let mut new_tag = NewTag::new(name);
        if let Some(scope) = &self.scope {
            scope.stamp(&mut new_tag);
        }

        match self.tags.insert(new_tag).await {
            Ok(tag) => {
                debug!(
                    subsystem = "tagging",
                    component = "counter",
                    op = "create_tag",
                    tag_id = tag.id,
                    tag_name = %tag.name,
                    "Created tag"
                );
                Ok(tag)
            }
            Err(err) if err.is_conflict() => {
                warn!(
                    subsystem = "tagging",
                    component = "counter",
                    op = "create_tag",
                    tag_name = %name,
                    "Tag name taken concurrently, re-reading"
                );
                self.tags
                    .find_by_name(name, self.scope())
                    .await?
                    .ok_or_else(|| {
                        Error::Conflict(format!("tag name '{}' is held by a deleted tag", name))
                    })
            }
            Err(err) => Err(err),
        }
    }

    /// Resolve a reference for attaching: names are created, ids must exist.
    async fn resolve_for_attach(&self, tag: TagRef) -> Result<Option<Tag>> {
        match tag {
            TagRef::ByName(name) if name.is_empty() => Ok(None),
            TagRef::ByName(name) => self.find_or_create(&name).await.map(Some),
            TagRef::ById(id) => self.tags.find(id, self.scope()).await,
        }
    }

    /// Attach tags to an item. Returns the ids of newly attached tags.
    ///
    /// Tags already attached, and ids that match no live tag, are skipped.
    ///
    /// References are applied one at a time and are not rolled back. If one
    /// fails, for example a name held by a soft-deleted tag
    /// ([`Error::Conflict`]), the error is returned and the references before
    /// it stay attached.
    pub async fn tag<I, T>(&self, item: &ItemSnapshot, tags: I) -> Result<Vec<i64>>
    where
        I: IntoIterator<Item = T>,
        T: Into<TagRef>,
    {
        let synced = self.config.synced_from(item);
        let mut attached = Vec::new();

        for tag in tags {
            let tag = tag.into();
            let resolved = match self.resolve_for_attach(tag.clone()).await? {
                Some(resolved) => resolved,
                None => {
                    debug!(
                        subsystem = "tagging",
                        component = "counter",
                        op = "tag",
                        item_id = item.id,
                        tag = ?tag,
                        "Tag reference not found, skipped"
                    );
                    continue;
                }
            };

            if self.attachments.attach(item.id, resolved.id, &synced).await? {
                attached.push(resolved.id);
            }
        }

        debug!(
            subsystem = "tagging",
            component = "counter",
            op = "tag",
            item_id = item.id,
            result_count = attached.len(),
            "Tagged item"
        );
        Ok(attached)
    }

    /// Detach tags from an item. Returns the ids of detached tags.
    pub async fn untag<I, T>(&self, item: &ItemSnapshot, tags: I) -> Result<Vec<i64>>
    where
        I: IntoIterator<Item = T>,
        T: Into<TagRef>,
    {
        let mut detached = Vec::new();

        for tag in tags {
            let tag_id = match tag.into() {
                TagRef::ById(id) => id,
                TagRef::ByName(name) => match self.tags.find_by_name(&name, self.scope()).await? {
                    Some(found) => found.id,
                    None => continue,
                },
            };

            if self.attachments.detach(item.id, tag_id).await? {
                detached.push(tag_id);
            }
        }

        debug!(
            subsystem = "tagging",
            component = "counter",
            op = "untag",
            item_id = item.id,
            result_count = detached.len(),
            "Untagged item"
        );
        Ok(detached)
    }

    /// Detach every tag from an item, deleted tags included.
    pub async fn untag_all(&self, item: &ItemSnapshot) -> Result<Vec<i64>> {
        let tag_ids = self.attachments.tag_ids_for_item(item.id).await?;
        self.untag(item, tag_ids).await
    }

    /// The item was saved: copy its synced attributes onto its attachments.
    pub async fn on_saved(&self, item: &ItemSnapshot) -> Result<SyncOutcome> {
        if self.config.synced_attributes.is_empty() {
            return Ok(SyncOutcome::default());
        }
        let synced = self.config.synced_from(item);
        self.attachments.sync_attributes(item.id, &synced).await
    }

    /// The item was deleted.
    ///
    /// A soft delete with tracking enabled keeps the attachments, marks them
    /// deleted and lowers each tag's count. Anything else detaches all tags.
    pub async fn on_deleted(&self, item: &ItemSnapshot, kind: DeleteKind) -> Result<()> {
        let column = match (&self.config.soft_delete_column, kind) {
            (Some(column), DeleteKind::Soft) if self.config.tracks_soft_deletes() => column,
            _ => {
                let detached = self.untag_all(item).await?;
                debug!(
                    subsystem = "tagging",
                    component = "counter",
                    op = "on_deleted",
                    item_id = item.id,
                    result_count = detached.len(),
                    "Detached tags of deleted item"
                );
                return Ok(());
            }
        };

        let mut synced = self.config.synced_from(item);
        let marked = matches!(synced.get(column), Some(value) if !value.is_null());
        if !marked {
            let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
            synced.insert(column.clone(), JsonValue::String(now));
        }

        let outcome = self.attachments.sync_attributes(item.id, &synced).await?;
        debug!(
            subsystem = "tagging",
            component = "counter",
            op = "on_deleted",
            item_id = item.id,
            rows = outcome.rows,
            decremented = outcome.decremented.len(),
            "Marked attachments of soft-deleted item"
        );
        Ok(())
    }

    /// The item was restored from a soft delete.
    pub async fn on_restored(&self, item: &ItemSnapshot) -> Result<()> {
        let column = match &self.config.soft_delete_column {
            Some(column) if self.config.tracks_soft_deletes() => column,
            _ => return Ok(()),
        };

        let mut synced = self.config.synced_from(item);
        synced.insert(column.clone(), JsonValue::Null);

        let outcome = self.attachments.sync_attributes(item.id, &synced).await?;
        debug!(
            subsystem = "tagging",
            component = "counter",
            op = "on_restored",
            item_id = item.id,
            rows = outcome.rows,
            incremented = outcome.incremented.len(),
            "Restored attachments of item"
        );
        Ok(())
    }

    /// Fetch a live tag by id.
    pub async fn get_tag(&self, id: i64) -> Result<Tag> {
        self.tags
            .find(id, self.scope())
            .await?
            .ok_or_else(|| Error::NotFound(format!("tag {}", id)))
    }

    /// Live tags of an item, oldest attachment first.
    pub async fn tags_for(&self, item_id: i64) -> Result<Vec<Tag>> {
        let tags = self.attachments.tags_for_item(item_id).await?;
        Ok(tags.into_iter().map(|item_tag| item_tag.tag).collect())
    }

    pub async fn tag_names(&self, item_id: i64) -> Result<Vec<String>> {
        let tags = self.tags_for(item_id).await?;
        Ok(tags.into_iter().map(|tag| tag.name).collect())
    }

    /// Whether a live tag is attached to the item.
    pub async fn has_tag(&self, item_id: i64, tag: impl Into<TagRef>) -> Result<bool> {
        let tag = tag.into();
        let tags = self.attachments.tags_for_item(item_id).await?;
        Ok(tags.iter().any(|item_tag| match &tag {
            TagRef::ById(id) => item_tag.tag.id == *id,
            TagRef::ByName(name) => item_tag.tag.name == *name,
        }))
    }

    /// List live tags within the scope.
    pub async fn list_tags(&self, order: TagOrder, limit: Option<i64>) -> Result<Vec<Tag>> {
        let limit = limit.unwrap_or(defaults::TAG_LIST_LIMIT);
        self.tags
            .list(order, limit, defaults::PAGE_OFFSET, self.scope())
            .await
    }
}
