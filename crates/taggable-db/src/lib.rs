//! # taggable-db
//!
//! PostgreSQL stores for taggable.
//!
//! This crate provides:
//! - Connection pool management
//! - [`PgTagRepository`] and [`PgAttachmentRepository`], implementing the
//!   core store traits
//! - SQL generation for tag plans (anchored self-joins over the attachment
//!   table)
//! - [`PgItemRepository`], a generic JSON item store
//!
//! ## Expected tables
//!
//! ```sql
//! CREATE TABLE tags (
//!     id BIGSERIAL PRIMARY KEY,
//!     name TEXT NOT NULL UNIQUE,
//!     item_count BIGINT NOT NULL DEFAULT 0,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     deleted_at TIMESTAMPTZ
//! );
//!
//! CREATE TABLE taggables (
//!     id BIGSERIAL PRIMARY KEY,
//!     item_id BIGINT NOT NULL,
//!     tag_id BIGINT NOT NULL REFERENCES tags (id),
//!     attached_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     synced JSONB NOT NULL DEFAULT '{}'::jsonb,
//!     UNIQUE (item_id, tag_id)
//! );
//! ```
//!
//! Scoped deployments add their partition columns to `tags` and widen the
//! name uniqueness to include them.
//!
//! ## Example
//!
//! ```rust,ignore
//! use taggable_db::{Database, TaggableConfig, ItemSnapshot};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TaggableConfig::from_env().soft_deletes("deleted_at");
//!     let db = Database::connect("postgres://localhost/app", config).await?;
//!
//!     let counter = db.counter();
//!     counter.tag(&ItemSnapshot::new(42), ["sports", "music"]).await?;
//!
//!     let mut query = db.query().with_tag("sports").with_tag("music");
//!     let posts = query.get(&db.items).await?;
//!     println!("{} posts", posts.len());
//!     Ok(())
//! }
//! ```

pub mod attachments;
pub mod items;
pub mod plan_sql;
pub mod pool;
pub mod tags;

// Test fixtures for integration tests
// Note: Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

use std::sync::Arc;

use tracing::info;

// Re-export core types
pub use taggable_core::*;

pub use attachments::PgAttachmentRepository;
pub use items::{ItemRecord, PgItemRepository};
pub use plan_sql::{bind_params, PlanSqlBuilder, QueryParam};
pub use pool::{create_pool, create_pool_with_config, PoolConfig, PoolStatus};
pub use tags::PgTagRepository;

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Tag records.
    pub tags: PgTagRepository,
    /// Item/tag join rows.
    pub attachments: PgAttachmentRepository,
    /// Rows of the configured item table.
    pub items: PgItemRepository,
    config: Arc<TaggableConfig>,
}

impl Database {
    /// Create a Database over an existing pool.
    ///
    /// Fails if any configured table or column name is not a safe identifier.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>, config: TaggableConfig) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        info!(
            subsystem = "database",
            component = "taggable",
            op = "init",
            tag_table = %config.tag_table,
            attachment_table = %config.attachment_table,
            soft_deletes = config.tracks_soft_deletes(),
            "Tag stores ready"
        );

        PoolStatus::of(&pool).log("init");

        Ok(Self {
            tags: PgTagRepository::new(pool.clone(), &config),
            attachments: PgAttachmentRepository::new(pool.clone(), config.clone()),
            items: PgItemRepository::new(pool.clone(), &config),
            pool,
            config,
        })
    }

    /// Connect with default pool settings.
    pub async fn connect(url: &str, config: TaggableConfig) -> Result<Self> {
        let pool = create_pool(url).await?;
        Self::new(pool, config)
    }

    /// Connect with custom pool settings.
    pub async fn connect_with_config(
        url: &str,
        config: TaggableConfig,
        pool_config: PoolConfig,
    ) -> Result<Self> {
        let pool = create_pool_with_config(url, pool_config).await?;
        Self::new(pool, config)
    }

    pub fn config(&self) -> &TaggableConfig {
        &self.config
    }

    /// Current pool occupancy, logged at DEBUG (WARN when saturated).
    pub fn pool_status(&self) -> PoolStatus {
        let status = PoolStatus::of(&self.pool);
        status.log("status");
        status
    }

    /// Counter maintainer over these stores.
    pub fn counter(&self) -> TagCounter {
        TagCounter::new(
            Arc::new(self.tags.clone()),
            Arc::new(self.attachments.clone()),
            self.config.clone(),
        )
    }

    /// Start a tag query over these stores.
    pub fn query(&self) -> TagQuery<'_> {
        TagQuery::new(&self.tags, &self.attachments)
    }
}
