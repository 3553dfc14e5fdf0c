//! Tag query planning and execution against the in-memory store.
//!
//! Covers anchor selection, any-of semantics, unsatisfiable filters and plan
//! caching, plus the item fetch and pagination helpers.

use std::sync::Arc;

use taggable_core::{
    ItemOrder, ItemSnapshot, MemoryItemStore, MemoryStore, PartitionScope, PlanState, StepFilter,
    TagCounter, TagFilter, TagQuery, TaggableConfig,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("taggable_core=debug")
        .with_test_writer()
        .try_init();
}

struct Fixture {
    store: MemoryStore,
    counter: TagCounter,
    items: MemoryItemStore,
}

impl Fixture {
    fn new() -> Self {
        init_tracing();
        let store = MemoryStore::new(TaggableConfig::default());
        let counter = TagCounter::new(store.tag_store(), store.attachment_store(), store.config());
        Self {
            store,
            counter,
            items: MemoryItemStore::new(),
        }
    }

    async fn item(&self, id: i64, tags: &[&str]) {
        let item = ItemSnapshot::new(id).with_attribute("title", format!("item {}", id));
        self.items.insert(item.clone());
        self.counter
            .tag(&item, tags.iter().copied())
            .await
            .expect("Failed to tag item");
    }

    fn query(&self) -> TagQuery<'_> {
        TagQuery::new(&self.store, &self.store)
    }
}

fn ids(items: &[ItemSnapshot]) -> Vec<i64> {
    items.iter().map(|item| item.id).collect()
}

#[tokio::test]
async fn test_sports_and_music_example() {
    let fx = Fixture::new();
    // sports ends with 3 items, music with 10.
    fx.item(42, &["sports", "music"]).await;
    for id in 1..=2 {
        fx.item(id, &["sports"]).await;
    }
    for id in 100..109 {
        fx.item(id, &["music"]).await;
    }

    let sports = fx.counter.find_or_create("sports").await.unwrap();
    let music = fx.counter.find_or_create("music").await.unwrap();
    assert_eq!(sports.item_count, 3);
    assert_eq!(music.item_count, 10);

    let mut query = fx.query().with_tag("sports").with_tag("music");
    let plan = query.plan().await.unwrap().plan().cloned().unwrap();
    assert_eq!(plan.anchor.filter, StepFilter::One(sports.id));
    assert_eq!(plan.joins.len(), 1);
    assert_eq!(plan.joins[0].filter, StepFilter::One(music.id));
    assert!(!plan.distinct);

    assert_eq!(query.item_ids().await.unwrap(), vec![42]);
    assert_eq!(query.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_nonexistent_tag_skips_attachment_query() {
    let fx = Fixture::new();
    fx.item(1, &["sports"]).await;
    fx.store.clear_calls();

    let mut query = fx.query().with_tag("sports").with_tag("nonexistent");
    assert!(query.get(&fx.items).await.unwrap().is_empty());
    assert_eq!(query.count().await.unwrap(), 0);

    assert_eq!(fx.store.call_count("resolve"), 1);
    assert_eq!(fx.store.call_count("item_ids"), 0);
    assert_eq!(fx.store.call_count("count"), 0);
}

#[tokio::test]
async fn test_empty_filter_never_touches_store() {
    let fx = Fixture::new();
    fx.item(1, &["sports"]).await;
    fx.store.clear_calls();

    let mut query = fx.query();
    assert_eq!(query.plan().await.unwrap(), &PlanState::Unsatisfiable);
    assert!(query.item_ids().await.unwrap().is_empty());
    assert!(fx.store.calls().is_empty());
}

#[tokio::test]
async fn test_empty_any_tag_id_is_unsatisfiable() {
    let fx = Fixture::new();
    fx.item(1, &["sports"]).await;

    let mut query = fx.query().with_tag("sports").with_any_tag_id(Vec::<i64>::new());
    assert_eq!(query.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_any_of_with_required_tag() {
    let fx = Fixture::new();
    fx.item(1, &["x", "z"]).await;
    fx.item(2, &["y", "z"]).await;
    fx.item(3, &["x", "y", "z"]).await;
    fx.item(4, &["x", "y"]).await;
    fx.item(5, &["z"]).await;

    let mut query = fx.query().with_any_tag(["x", "y"]).with_tag("z");
    let plan = query.plan().await.unwrap().plan().cloned().unwrap();
    assert!(plan.distinct);
    assert!(plan.joins[0].filter.is_any_of());

    let found = query.get(&fx.items).await.unwrap();
    assert_eq!(ids(&found), vec![1, 2, 3]);
    assert_eq!(query.count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_any_of_alone_deduplicates_items() {
    let fx = Fixture::new();
    fx.item(1, &["x", "y"]).await;
    fx.item(2, &["y"]).await;

    let mut query = fx.query().with_any_tag(["x", "y", "missing"]);
    assert_eq!(query.item_ids().await.unwrap(), vec![1, 2]);
    assert_eq!(query.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_plan_is_cached_until_filter_changes() {
    let fx = Fixture::new();
    fx.item(1, &["a", "b"]).await;
    fx.store.clear_calls();

    let mut query = fx.query().with_tag("a");
    query.count().await.unwrap();
    query.item_ids().await.unwrap();
    query.get(&fx.items).await.unwrap();
    assert_eq!(fx.store.call_count("resolve"), 1);

    let mut query = query.with_tag("b");
    assert_eq!(query.item_ids().await.unwrap(), vec![1]);
    assert_eq!(fx.store.call_count("resolve"), 2);
}

#[tokio::test]
async fn test_get_preserves_query_order() {
    let fx = Fixture::new();
    fx.item(3, &["news"]).await;
    fx.item(1, &["news"]).await;
    fx.item(2, &["news"]).await;

    let mut oldest = fx.query().with_tag("news").order_by(ItemOrder::OldestFirst);
    assert_eq!(ids(&oldest.get(&fx.items).await.unwrap()), vec![3, 1, 2]);

    let mut recent = fx.query().with_tag("news").order_by(ItemOrder::RecentFirst);
    assert_eq!(ids(&recent.get(&fx.items).await.unwrap()), vec![2, 1, 3]);

    let mut by_id = fx.query().with_tag("news");
    assert_eq!(ids(&by_id.get(&fx.items).await.unwrap()), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_get_skips_items_missing_from_item_store() {
    let fx = Fixture::new();
    fx.item(1, &["news"]).await;
    fx.item(2, &["news"]).await;
    fx.items.remove(1);

    let mut query = fx.query().with_tag("news");
    assert_eq!(ids(&query.get(&fx.items).await.unwrap()), vec![2]);
    assert_eq!(query.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_first_and_paginate() {
    let fx = Fixture::new();
    for id in 1..=5 {
        fx.item(id, &["news"]).await;
    }

    let mut query = fx.query().with_tag("news").order_by(ItemOrder::ItemIdDesc);
    let first = query.first(&fx.items).await.unwrap();
    assert_eq!(first.map(|item| item.id), Some(5));

    let page = query.paginate(&fx.items, 2, 2).await.unwrap();
    assert_eq!(ids(&page.items), vec![3, 2]);
    assert_eq!(page.total, 5);
    assert_eq!(page.last_page(), 3);
    assert!(page.has_more());

    let last = query.paginate(&fx.items, 2, 3).await.unwrap();
    assert_eq!(ids(&last.items), vec![1]);
    assert!(!last.has_more());
}

#[tokio::test]
async fn test_paginate_far_past_the_end_is_empty() {
    let fx = Fixture::new();
    for id in 1..=3 {
        fx.item(id, &["news"]).await;
    }

    let mut query = fx.query().with_tag("news");
    let page = query.paginate(&fx.items, 15, i64::MAX).await.unwrap();
    assert!(page.items.is_empty());
    assert_eq!(page.total, 3);
    assert_eq!(page.page, i64::MAX);
    assert!(!page.has_more());

    let wide = query.paginate(&fx.items, i64::MAX, 2).await.unwrap();
    assert!(wide.items.is_empty());
    assert_eq!(wide.last_page(), 1);

    // Skipped pages never reach the item store.
    assert_eq!(fx.store.call_count("item_ids"), 0);
}

#[tokio::test]
async fn test_limit_and_offset() {
    let fx = Fixture::new();
    for id in 1..=4 {
        fx.item(id, &["news"]).await;
    }

    let mut query = fx.query().with_tag("news").offset(1).limit(2);
    assert_eq!(query.item_ids().await.unwrap(), vec![2, 3]);
    // Count ignores the window.
    assert_eq!(query.count().await.unwrap(), 4);
}

#[tokio::test]
async fn test_deleted_tag_makes_query_unsatisfiable() {
    let fx = Fixture::new();
    fx.item(1, &["retired"]).await;
    let tag = fx.counter.find_or_create("retired").await.unwrap();
    fx.store.tag_store().soft_delete(tag.id).await.unwrap();

    let mut query = fx.query().with_tag_id(tag.id);
    assert_eq!(query.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_scoped_query_resolves_within_partition() {
    let fx = Fixture::new();
    let acme = fx
        .counter
        .clone()
        .with_scope(Arc::new(PartitionScope::new("tenant_id", 1_i64)));
    let globex = fx
        .counter
        .clone()
        .with_scope(Arc::new(PartitionScope::new("tenant_id", 2_i64)));

    acme.tag(&ItemSnapshot::new(1), ["rust"]).await.unwrap();
    globex.tag(&ItemSnapshot::new(2), ["rust"]).await.unwrap();

    let mut query = acme.query().with_tag("rust");
    assert_eq!(query.item_ids().await.unwrap(), vec![1]);

    let mut unscoped = fx.query().with_filter(TagFilter::new().with_tag("rust"));
    // Both tags resolve by name; the plan anchors on one of them.
    assert_eq!(unscoped.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_store_failure_propagates() {
    let fx = Fixture::new();
    fx.item(1, &["news"]).await;
    fx.store.set_unavailable(true);

    let mut query = fx.query().with_tag("news");
    let err = query.item_ids().await.unwrap_err();
    assert!(matches!(err, taggable_core::Error::Database(_)));
}
