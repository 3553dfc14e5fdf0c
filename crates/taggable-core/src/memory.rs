//! In-memory tag and attachment store for deterministic testing.
//!
//! [`MemoryStore`] implements both [`TagStore`] and [`AttachmentStore`] over a
//! single mutex, so every attachment change and the count update it causes
//! happen under one guard. Every store call is recorded for assertions, and
//! the store can be switched to fail like an unreachable database.
//!
//! ## Usage
//!
//! ```rust
//! use taggable_core::{MemoryStore, TaggableConfig, TagCounter, ItemSnapshot};
//!
//! # async fn demo() -> taggable_core::Result<()> {
//! let store = MemoryStore::new(TaggableConfig::default());
//! let counter = TagCounter::new(store.tag_store(), store.attachment_store(), store.config());
//!
//! counter.tag(&ItemSnapshot::new(42), ["sports"]).await?;
//! assert_eq!(store.call_count("attach"), 1);
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{trace, warn};

use crate::config::TaggableConfig;
use crate::error::{Error, Result};
use crate::models::*;
use crate::plan::{StepFilter, TagPlan};
use crate::scope::{constraints_for, TagScope};
use crate::traits::{AttachmentStore, ItemStore, TagStore};

/// A store call recorded by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryCall {
    pub operation: String,
    pub input: String,
}

#[derive(Debug, Clone)]
struct StoredTag {
    tag: Tag,
    columns: BTreeMap<String, ScopeValue>,
}

#[derive(Debug)]
struct MemoryState {
    tags: BTreeMap<i64, StoredTag>,
    next_tag_id: i64,
    attachments: BTreeMap<(i64, i64), Attachment>,
    epoch: DateTime<Utc>,
    ticks: i64,
    unavailable: bool,
    calls: Vec<MemoryCall>,
}

impl MemoryState {
    fn new() -> Self {
        Self {
            tags: BTreeMap::new(),
            next_tag_id: 1,
            attachments: BTreeMap::new(),
            epoch: Utc::now(),
            ticks: 0,
            unavailable: false,
            calls: Vec::new(),
        }
    }

    /// Monotonic clock: every write gets a distinct timestamp.
    fn now(&mut self) -> DateTime<Utc> {
        self.ticks += 1;
        self.epoch + Duration::seconds(self.ticks)
    }

    fn increment(&mut self, tag_id: i64) {
        let now = self.now();
        if let Some(stored) = self.tags.get_mut(&tag_id) {
            stored.tag.item_count += 1;
            stored.tag.updated_at = now;
        }
    }

    fn decrement(&mut self, tag_id: i64) {
        let now = self.now();
        if let Some(stored) = self.tags.get_mut(&tag_id) {
            if stored.tag.item_count <= 0 {
                warn!(
                    subsystem = "tagging",
                    component = "memory_store",
                    op = "decrement",
                    tag_id,
                    "Tag item count already zero, decrement skipped"
                );
                return;
            }
            stored.tag.item_count -= 1;
            stored.tag.updated_at = now;
        }
    }

    fn visible<'a>(
        &'a self,
        scope: Option<&dyn TagScope>,
    ) -> impl Iterator<Item = &'a Tag> + 'a {
        let constraints = constraints_for(scope);
        self.tags
            .values()
            .filter(move |stored| {
                stored.tag.deleted_at.is_none() && constraints.matches(&stored.columns)
            })
            .map(|stored| &stored.tag)
    }
}

/// In-memory [`TagStore`] + [`AttachmentStore`].
#[derive(Clone)]
pub struct MemoryStore {
    config: Arc<TaggableConfig>,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new(config: TaggableConfig) -> Self {
        Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(MemoryState::new())),
        }
    }

    pub fn config(&self) -> Arc<TaggableConfig> {
        self.config.clone()
    }

    /// This store as a shared [`TagStore`].
    pub fn tag_store(&self) -> Arc<dyn TagStore> {
        Arc::new(self.clone())
    }

    /// This store as a shared [`AttachmentStore`].
    pub fn attachment_store(&self) -> Arc<dyn AttachmentStore> {
        Arc::new(self.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| Error::Internal("memory store lock poisoned".to_string()))
    }

    fn begin(&self, operation: &str, input: String) -> Result<MutexGuard<'_, MemoryState>> {
        let mut state = self.lock()?;
        state.calls.push(MemoryCall {
            operation: operation.to_string(),
            input,
        });
        if state.unavailable {
            return Err(Error::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(state)
    }

    /// Make every subsequent store call fail as if the database were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.unavailable = unavailable;
        }
    }

    /// Insert a tag with a preset item count, bypassing attachments.
    pub fn seed_tag(&self, name: impl Into<String>, item_count: i64) -> Result<Tag> {
        let mut state = self.lock()?;
        let now = state.now();
        let id = state.next_tag_id;
        state.next_tag_id += 1;
        let tag = Tag {
            id,
            name: name.into(),
            item_count,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        state.tags.insert(
            id,
            StoredTag {
                tag: tag.clone(),
                columns: BTreeMap::new(),
            },
        );
        Ok(tag)
    }

    /// Insert an attachment row directly, without touching counts.
    pub fn seed_attachment(&self, item_id: i64, tag_id: i64) -> Result<()> {
        let mut state = self.lock()?;
        let attached_at = state.now();
        state.attachments.insert(
            (item_id, tag_id),
            Attachment {
                item_id,
                tag_id,
                attached_at,
                synced_attributes: SyncedAttributes::new(),
            },
        );
        Ok(())
    }

    /// Any tag by id, including soft-deleted ones.
    pub fn tag(&self, id: i64) -> Option<Tag> {
        let state = self.state.lock().ok()?;
        state.tags.get(&id).map(|stored| stored.tag.clone())
    }

    pub fn attachment(&self, item_id: i64, tag_id: i64) -> Option<Attachment> {
        let state = self.state.lock().ok()?;
        state.attachments.get(&(item_id, tag_id)).cloned()
    }

    pub fn attachment_count(&self) -> usize {
        self.state
            .lock()
            .map(|state| state.attachments.len())
            .unwrap_or(0)
    }

    /// All recorded calls.
    pub fn calls(&self) -> Vec<MemoryCall> {
        self.state
            .lock()
            .map(|state| state.calls.clone())
            .unwrap_or_default()
    }

    /// Number of recorded calls of one operation.
    pub fn call_count(&self, operation: &str) -> usize {
        self.state
            .lock()
            .map(|state| state.calls.iter().filter(|c| c.operation == operation).count())
            .unwrap_or(0)
    }

    pub fn clear_calls(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.calls.clear();
        }
    }
}

#[async_trait]
impl TagStore for MemoryStore {
    async fn resolve(
        &self,
        ids: &[i64],
        names: &[String],
        scope: Option<&dyn TagScope>,
    ) -> Result<Vec<Tag>> {
        let state = self.begin("resolve", format!("ids={:?} names={:?}", ids, names))?;
        Ok(state
            .visible(scope)
            .filter(|tag| ids.contains(&tag.id) || names.contains(&tag.name))
            .cloned()
            .collect())
    }

    async fn find(&self, id: i64, scope: Option<&dyn TagScope>) -> Result<Option<Tag>> {
        let state = self.begin("find", id.to_string())?;
        let found = state.visible(scope).find(|tag| tag.id == id).cloned();
        Ok(found)
    }

    async fn find_by_name(
        &self,
        name: &str,
        scope: Option<&dyn TagScope>,
    ) -> Result<Option<Tag>> {
        let state = self.begin("find_by_name", name.to_string())?;
        let found = state.visible(scope).find(|tag| tag.name == name).cloned();
        Ok(found)
    }

    async fn insert(&self, new_tag: NewTag) -> Result<Tag> {
        let mut state = self.begin("insert", new_tag.name.clone())?;

        // Unique on name within the stamped columns, deleted tags included.
        let taken = state
            .tags
            .values()
            .any(|stored| stored.tag.name == new_tag.name && stored.columns == new_tag.columns);
        if taken {
            return Err(Error::Conflict(format!(
                "tag name '{}' already exists",
                new_tag.name
            )));
        }

        let now = state.now();
        let id = state.next_tag_id;
        state.next_tag_id += 1;
        let tag = Tag {
            id,
            name: new_tag.name,
            item_count: 0,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        state.tags.insert(
            id,
            StoredTag {
                tag: tag.clone(),
                columns: new_tag.columns,
            },
        );
        Ok(tag)
    }

    async fn list(
        &self,
        order: TagOrder,
        limit: i64,
        offset: i64,
        scope: Option<&dyn TagScope>,
    ) -> Result<Vec<Tag>> {
        let state = self.begin("list", format!("{:?}", order))?;
        let mut tags: Vec<Tag> = state.visible(scope).cloned().collect();
        match order {
            TagOrder::Newest => {
                tags.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)))
            }
            TagOrder::RecentlyUpdated => {
                tags.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)))
            }
            TagOrder::Alphabetical => tags.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id))),
            TagOrder::Popular => tags.sort_by(|a, b| {
                b.item_count
                    .cmp(&a.item_count)
                    .then(a.name.cmp(&b.name))
                    .then(a.id.cmp(&b.id))
            }),
        }
        Ok(window(tags, Some(limit), Some(offset)))
    }

    async fn soft_delete(&self, id: i64) -> Result<bool> {
        let mut state = self.begin("soft_delete", id.to_string())?;
        let now = state.now();
        match state.tags.get_mut(&id) {
            Some(stored) if stored.tag.deleted_at.is_none() => {
                stored.tag.deleted_at = Some(now);
                stored.tag.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn restore(&self, id: i64) -> Result<bool> {
        let mut state = self.begin("restore", id.to_string())?;
        let now = state.now();
        match state.tags.get_mut(&id) {
            Some(stored) if stored.tag.deleted_at.is_some() => {
                stored.tag.deleted_at = None;
                stored.tag.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl AttachmentStore for MemoryStore {
    async fn attach(&self, item_id: i64, tag_id: i64, synced: &SyncedAttributes) -> Result<bool> {
        let mut state = self.begin("attach", format!("item={} tag={}", item_id, tag_id))?;
        if state.attachments.contains_key(&(item_id, tag_id)) {
            return Ok(false);
        }

        let attached_at = state.now();
        state.attachments.insert(
            (item_id, tag_id),
            Attachment {
                item_id,
                tag_id,
                attached_at,
                synced_attributes: synced.clone(),
            },
        );
        if self.config.is_live(synced) {
            state.increment(tag_id);
        }
        Ok(true)
    }

    async fn detach(&self, item_id: i64, tag_id: i64) -> Result<bool> {
        let mut state = self.begin("detach", format!("item={} tag={}", item_id, tag_id))?;
        match state.attachments.remove(&(item_id, tag_id)) {
            Some(removed) => {
                if self.config.is_live(&removed.synced_attributes) {
                    state.decrement(tag_id);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn tag_ids_for_item(&self, item_id: i64) -> Result<Vec<i64>> {
        let state = self.begin("tag_ids_for_item", item_id.to_string())?;
        let mut rows: Vec<&Attachment> = state
            .attachments
            .values()
            .filter(|a| a.item_id == item_id)
            .collect();
        rows.sort_by(|a, b| a.attached_at.cmp(&b.attached_at).then(a.tag_id.cmp(&b.tag_id)));
        Ok(rows.into_iter().map(|a| a.tag_id).collect())
    }

    async fn tags_for_item(&self, item_id: i64) -> Result<Vec<ItemTag>> {
        let state = self.begin("tags_for_item", item_id.to_string())?;
        let mut tags: Vec<ItemTag> = state
            .attachments
            .values()
            .filter(|a| a.item_id == item_id)
            .filter_map(|a| {
                let stored = state.tags.get(&a.tag_id)?;
                if stored.tag.is_deleted() {
                    return None;
                }
                Some(ItemTag {
                    tag: stored.tag.clone(),
                    attached_at: a.attached_at,
                })
            })
            .collect();
        tags.sort_by(|a, b| {
            a.attached_at
                .cmp(&b.attached_at)
                .then(a.tag.id.cmp(&b.tag.id))
        });
        Ok(tags)
    }

    async fn sync_attributes(
        &self,
        item_id: i64,
        synced: &SyncedAttributes,
    ) -> Result<SyncOutcome> {
        let mut state = self.begin("sync_attributes", item_id.to_string())?;
        let now_live = self.config.is_live(synced);
        let mut outcome = SyncOutcome::default();

        let keys: Vec<(i64, i64)> = state
            .attachments
            .keys()
            .filter(|(item, _)| *item == item_id)
            .copied()
            .collect();

        for key in keys {
            let was_live = match state.attachments.get_mut(&key) {
                Some(row) => {
                    let was_live = self.config.is_live(&row.synced_attributes);
                    row.synced_attributes = synced.clone();
                    was_live
                }
                None => continue,
            };
            outcome.rows += 1;

            let tag_id = key.1;
            trace!(item_id, tag_id, was_live, now_live, "Synced attachment row");
            if was_live && !now_live {
                state.decrement(tag_id);
                outcome.decremented.push(tag_id);
            } else if !was_live && now_live {
                state.increment(tag_id);
                outcome.incremented.push(tag_id);
            }
        }

        Ok(outcome)
    }

    async fn item_ids(&self, plan: &TagPlan, options: &ItemQueryOptions) -> Result<Vec<i64>> {
        let state = self.begin("item_ids", format!("{:?}", plan.anchor.filter))?;
        let matches = self.execute(&state, plan);

        let mut rows: Vec<(i64, DateTime<Utc>)> = matches.into_iter().collect();
        match options.order {
            ItemOrder::ItemIdAsc => rows.sort_by_key(|(id, _)| *id),
            ItemOrder::ItemIdDesc => rows.sort_by(|a, b| b.0.cmp(&a.0)),
            ItemOrder::RecentFirst => rows.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0))),
            ItemOrder::OldestFirst => rows.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0))),
        }

        let ids = rows.into_iter().map(|(id, _)| id).collect();
        Ok(window(ids, options.limit, options.offset))
    }

    async fn count(&self, plan: &TagPlan) -> Result<i64> {
        let state = self.begin("count", format!("{:?}", plan.anchor.filter))?;
        Ok(self.execute(&state, plan).len() as i64)
    }
}

impl MemoryStore {
    /// Emulate the anchored self-join: item id -> latest anchor attachment.
    fn execute(&self, state: &MemoryState, plan: &TagPlan) -> HashMap<i64, DateTime<Utc>> {
        let track_live = self.config.tracks_soft_deletes();
        let mut anchored: HashMap<i64, DateTime<Utc>> = HashMap::new();

        for row in state.attachments.values() {
            if !plan.anchor.filter.contains(row.tag_id) {
                continue;
            }
            if track_live && !self.config.is_live(&row.synced_attributes) {
                continue;
            }
            anchored
                .entry(row.item_id)
                .and_modify(|at| {
                    if row.attached_at > *at {
                        *at = row.attached_at;
                    }
                })
                .or_insert(row.attached_at);
        }

        anchored.retain(|item_id, _| {
            plan.joins
                .iter()
                .all(|step| has_attachment(state, *item_id, &step.filter))
        });
        anchored
    }
}

fn has_attachment(state: &MemoryState, item_id: i64, filter: &StepFilter) -> bool {
    state
        .attachments
        .range((item_id, i64::MIN)..=(item_id, i64::MAX))
        .any(|((_, tag_id), _)| filter.contains(*tag_id))
}

fn window<T>(rows: Vec<T>, limit: Option<i64>, offset: Option<i64>) -> Vec<T> {
    let offset = offset.unwrap_or(0).max(0) as usize;
    let rows = rows.into_iter().skip(offset);
    match limit {
        Some(limit) => rows.take(limit.max(0) as usize).collect(),
        None => rows.collect(),
    }
}

// =============================================================================
// ITEMS
// =============================================================================

/// In-memory [`ItemStore`] holding [`ItemSnapshot`] records.
#[derive(Clone, Default)]
pub struct MemoryItemStore {
    items: Arc<Mutex<BTreeMap<i64, ItemSnapshot>>>,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, item: ItemSnapshot) {
        if let Ok(mut items) = self.items.lock() {
            items.insert(item.id, item);
        }
    }

    pub fn remove(&self, id: i64) -> Option<ItemSnapshot> {
        self.items.lock().ok()?.remove(&id)
    }
}

#[async_trait]
impl ItemStore for MemoryItemStore {
    type Item = ItemSnapshot;

    fn item_id(item: &ItemSnapshot) -> i64 {
        item.id
    }

    async fn fetch_many(&self, ids: &[i64]) -> Result<Vec<ItemSnapshot>> {
        let items = self
            .items
            .lock()
            .map_err(|_| Error::Internal("memory item store lock poisoned".to_string()))?;
        // Highest id first, so callers cannot rely on fetch order.
        Ok(items
            .values()
            .rev()
            .filter(|item| ids.contains(&item.id))
            .cloned()
            .collect())
    }
}
