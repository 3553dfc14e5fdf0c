//! Tag query execution.
//!
//! [`TagQuery`] accumulates filters, resolves them against the tag store once,
//! and executes the resulting plan against the attachment store. Full item
//! records come from the host's [`ItemStore`] and are re-sorted into the
//! order the attachment store returned.
//!
//! ```rust,ignore
//! let mut query = TagQuery::new(&store, &store)
//!     .with_tag("sports")
//!     .with_any_tag(["jazz", "blues"])
//!     .order_by(ItemOrder::RecentFirst);
//!
//! let total = query.count().await?;
//! let items = query.get(&items_store).await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace};

use crate::defaults;
use crate::error::{Error, Result};
use crate::filter::{FilterClause, TagFilter, TagRef};
use crate::models::{ItemOrder, ItemQueryOptions, Page};
use crate::plan::{self, PlanState};
use crate::scope::TagScope;
use crate::traits::{AttachmentStore, ItemStore, TagStore};

/// A tag-filtered item query.
///
/// The plan is resolved on first execution and cached in the query; every
/// later execution reuses it. Adding a filter clears the cached plan.
pub struct TagQuery<'a> {
    tags: &'a dyn TagStore,
    attachments: &'a dyn AttachmentStore,
    filter: TagFilter,
    scope: Option<Arc<dyn TagScope>>,
    options: ItemQueryOptions,
    plan: Option<PlanState>,
}

impl<'a> TagQuery<'a> {
    pub fn new(tags: &'a dyn TagStore, attachments: &'a dyn AttachmentStore) -> Self {
        Self {
            tags,
            attachments,
            filter: TagFilter::new(),
            scope: None,
            options: ItemQueryOptions::default(),
            plan: None,
        }
    }

    /// Restrict tag resolution to a scope.
    pub fn with_tag_scope(mut self, scope: Arc<dyn TagScope>) -> Self {
        self.scope = Some(scope);
        self.plan = None;
        self
    }

    /// Replace the accumulated filter.
    pub fn with_filter(mut self, filter: TagFilter) -> Self {
        self.filter = filter;
        self.plan = None;
        self
    }

    fn accumulate(mut self, f: impl FnOnce(TagFilter) -> TagFilter) -> Self {
        self.filter = f(std::mem::take(&mut self.filter));
        self.plan = None;
        self
    }

    pub fn with_tag(self, tag: impl Into<TagRef>) -> Self {
        self.accumulate(|f| f.with_tag(tag))
    }

    pub fn with_tags<I, T>(self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TagRef>,
    {
        self.accumulate(|f| f.with_tags(tags))
    }

    pub fn with_tag_id(self, id: i64) -> Self {
        self.accumulate(|f| f.with_tag_id(id))
    }

    pub fn with_tag_ids(self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.accumulate(|f| f.with_tag_ids(ids))
    }

    pub fn with_any_tag<I, T>(self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TagRef>,
    {
        self.accumulate(|f| f.with_any_tag(tags))
    }

    pub fn with_any_tag_id(self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.accumulate(|f| f.with_any_tag_id(ids))
    }

    pub fn with_clause(self, clause: FilterClause) -> Self {
        self.accumulate(|f| f.with_clause(clause))
    }

    /// Order the returned item ids.
    pub fn order_by(mut self, order: ItemOrder) -> Self {
        self.options.order = order;
        self
    }

    /// Return at most `limit` items.
    pub fn limit(mut self, limit: i64) -> Self {
        self.options.limit = Some(limit);
        self
    }

    /// Skip the first `offset` items.
    pub fn offset(mut self, offset: i64) -> Self {
        self.options.offset = Some(offset);
        self
    }

    pub fn filter(&self) -> &TagFilter {
        &self.filter
    }

    pub fn options(&self) -> &ItemQueryOptions {
        &self.options
    }

    /// Resolve the filter, or return the cached plan.
    pub async fn plan(&mut self) -> Result<&PlanState> {
        if self.plan.is_none() {
            let state = self.resolve_plan().await?;
            self.plan = Some(state);
        }
        self.plan
            .as_ref()
            .ok_or_else(|| Error::Internal("tag plan missing after resolution".to_string()))
    }

    async fn resolve_plan(&self) -> Result<PlanState> {
        if self.filter.is_empty() {
            debug!(
                subsystem = "tagging",
                component = "query",
                op = "resolve",
                "No tag filters, query is unsatisfiable"
            );
            return Ok(PlanState::Unsatisfiable);
        }

        let start = Instant::now();
        let (ids, names) = self.filter.requested();
        let resolved = self
            .tags
            .resolve(&ids, &names, self.scope.as_deref())
            .await?;

        debug!(
            subsystem = "tagging",
            component = "query",
            op = "resolve",
            clause_count = self.filter.len(),
            requested_ids = ids.len(),
            requested_names = names.len(),
            resolved = resolved.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Resolved tag filters"
        );

        Ok(plan::compile(&self.filter, &resolved))
    }

    /// Matching item ids, in store order.
    pub async fn item_ids(&mut self) -> Result<Vec<i64>> {
        let options = self.options.clone();
        self.item_ids_with(&options).await
    }

    async fn item_ids_with(&mut self, options: &ItemQueryOptions) -> Result<Vec<i64>> {
        let attachments = self.attachments;
        let plan = match self.plan().await? {
            PlanState::Unsatisfiable => return Ok(Vec::new()),
            PlanState::Ready(plan) => plan,
        };

        let start = Instant::now();
        let ids = attachments.item_ids(plan, options).await?;
        debug!(
            subsystem = "tagging",
            component = "query",
            op = "item_ids",
            result_count = ids.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Executed tag query"
        );
        Ok(ids)
    }

    /// Number of distinct matching items. Ignores limit and offset.
    pub async fn count(&mut self) -> Result<i64> {
        let attachments = self.attachments;
        match self.plan().await? {
            PlanState::Unsatisfiable => Ok(0),
            PlanState::Ready(plan) => attachments.count(plan).await,
        }
    }

    /// Fetch matching items from `items`, in item-id order of the query.
    pub async fn get<I: ItemStore>(&mut self, items: &I) -> Result<Vec<I::Item>> {
        let options = self.options.clone();
        self.get_with(items, &options).await
    }

    async fn get_with<I: ItemStore>(
        &mut self,
        items: &I,
        options: &ItemQueryOptions,
    ) -> Result<Vec<I::Item>> {
        let ids = self.item_ids_with(options).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let records = items.fetch_many(&ids).await?;
        Ok(order_by_ids(records, &ids, I::item_id))
    }

    /// First matching item, if any.
    pub async fn first<I: ItemStore>(&mut self, items: &I) -> Result<Option<I::Item>> {
        let options = ItemQueryOptions {
            limit: Some(1),
            ..self.options.clone()
        };
        Ok(self.get_with(items, &options).await?.into_iter().next())
    }

    /// One page of matching items plus the total match count.
    ///
    /// `page` is 1-based; values below 1 are treated as 1. A non-positive
    /// `per_page` falls back to the default page size. Pages beyond the last
    /// one are empty.
    pub async fn paginate<I: ItemStore>(
        &mut self,
        items: &I,
        per_page: i64,
        page: i64,
    ) -> Result<Page<I::Item>> {
        let per_page = if per_page > 0 {
            per_page
        } else {
            defaults::PAGE_LIMIT
        };
        let page = page.max(1);

        let total = self.count().await?;
        // A page past the representable offset range is necessarily empty.
        let offset = (page - 1).checked_mul(per_page);
        let records = match offset {
            Some(offset) if total > 0 && offset < total => {
                let options = ItemQueryOptions {
                    order: self.options.order,
                    limit: Some(per_page),
                    offset: Some(offset),
                };
                self.get_with(items, &options).await?
            }
            _ => Vec::new(),
        };

        Ok(Page {
            items: records,
            total,
            per_page,
            page,
        })
    }
}

/// Sort `records` into the order of `ids`, dropping records not in `ids`.
pub fn order_by_ids<T>(records: Vec<T>, ids: &[i64], key: impl Fn(&T) -> i64) -> Vec<T> {
    let position: HashMap<i64, usize> = ids
        .iter()
        .enumerate()
        .map(|(idx, id)| (*id, idx))
        .collect();

    let mut ranked: Vec<(usize, T)> = records
        .into_iter()
        .filter_map(|record| {
            let id = key(&record);
            match position.get(&id) {
                Some(idx) => Some((*idx, record)),
                None => {
                    trace!(item_id = id, "Dropping record not returned by tag query");
                    None
                }
            }
        })
        .collect();
    ranked.sort_by_key(|(idx, _)| *idx);
    ranked.into_iter().map(|(_, record)| record).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_by_ids_restores_query_order() {
        let records = vec![(3, "c"), (1, "a"), (2, "b")];
        let ordered = order_by_ids(records, &[2, 3, 1], |r| r.0);
        assert_eq!(ordered, vec![(2, "b"), (3, "c"), (1, "a")]);
    }

    #[test]
    fn test_order_by_ids_drops_unknown_records() {
        let records = vec![(9, "x"), (1, "a")];
        let ordered = order_by_ids(records, &[1], |r| r.0);
        assert_eq!(ordered, vec![(1, "a")]);
    }

    #[test]
    fn test_order_by_ids_skips_missing_records() {
        let records = vec![(1, "a")];
        let ordered = order_by_ids(records, &[5, 1], |r| r.0);
        assert_eq!(ordered, vec![(1, "a")]);
    }
}
