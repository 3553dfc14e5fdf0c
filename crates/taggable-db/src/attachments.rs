//! Attachment repository implementation.
//!
//! Every statement that changes an attachment row runs in the same
//! transaction as the `item_count` update it causes. Counts are only touched
//! when a row's liveness changes.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgConnection, Pool, Postgres, Row};
use tracing::{debug, trace, warn};

use taggable_core::{
    AttachmentStore, ItemQueryOptions, ItemTag, Result, SyncOutcome, SyncedAttributes, TagPlan,
    TaggableConfig,
};

use crate::plan_sql::{bind_params, PlanSqlBuilder};
use crate::tags::tag_from_row;

/// Rewrite the synced values of an item's locked rows.
///
/// `$1` is the item id, `$2` the new values and `$3` the tag ids selected
/// `FOR UPDATE` in the same transaction.
pub fn sync_update_sql(attachment_table: &str) -> String {
    format!(
        "UPDATE {} SET synced = $2 WHERE item_id = $1 AND tag_id = ANY($3)",
        attachment_table
    )
}

/// PostgreSQL implementation of [`AttachmentStore`].
#[derive(Clone)]
pub struct PgAttachmentRepository {
    pool: Pool<Postgres>,
    config: Arc<TaggableConfig>,
}

impl PgAttachmentRepository {
    pub fn new(pool: Pool<Postgres>, config: Arc<TaggableConfig>) -> Self {
        Self { pool, config }
    }

    async fn increment(&self, conn: &mut PgConnection, tag_id: i64) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET item_count = item_count + 1, updated_at = NOW() WHERE id = $1",
            self.config.tag_table
        );
        sqlx::query(&sql).bind(tag_id).execute(conn).await?;
        Ok(())
    }

    /// Decrement, never below zero.
    async fn decrement(&self, conn: &mut PgConnection, tag_id: i64) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET item_count = item_count - 1, updated_at = NOW() \
             WHERE id = $1 AND item_count > 0",
            self.config.tag_table
        );
        let result = sqlx::query(&sql).bind(tag_id).execute(conn).await?;
        if result.rows_affected() == 0 {
            warn!(
                subsystem = "database",
                component = "attachments",
                op = "decrement",
                tag_id,
                "Tag item count already zero or tag missing, decrement skipped"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl AttachmentStore for PgAttachmentRepository {
    async fn attach(&self, item_id: i64, tag_id: i64, synced: &SyncedAttributes) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "INSERT INTO {} (item_id, tag_id, attached_at, synced) VALUES ($1, $2, NOW(), $3) \
             ON CONFLICT (item_id, tag_id) DO NOTHING",
            self.config.attachment_table
        );
        let inserted = sqlx::query(&sql)
            .bind(item_id)
            .bind(tag_id)
            .bind(Json(synced))
            .execute(&mut *tx)
            .await?
            .rows_affected()
            > 0;

        if !inserted {
            // Nothing changed; dropping the transaction rolls it back.
            return Ok(false);
        }

        if self.config.is_live(synced) {
            self.increment(&mut tx, tag_id).await?;
        }
        tx.commit().await?;

        debug!(
            subsystem = "database",
            component = "attachments",
            op = "attach",
            item_id,
            tag_id,
            "Attached tag"
        );
        Ok(true)
    }

    async fn detach(&self, item_id: i64, tag_id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "DELETE FROM {} WHERE item_id = $1 AND tag_id = $2 RETURNING synced",
            self.config.attachment_table
        );
        let row = sqlx::query(&sql)
            .bind(item_id)
            .bind(tag_id)
            .fetch_optional(&mut *tx)
            .await?;

        let synced = match row {
            Some(row) => row.try_get::<Json<SyncedAttributes>, _>("synced")?.0,
            None => return Ok(false),
        };

        if self.config.is_live(&synced) {
            self.decrement(&mut tx, tag_id).await?;
        }
        tx.commit().await?;

        debug!(
            subsystem = "database",
            component = "attachments",
            op = "detach",
            item_id,
            tag_id,
            "Detached tag"
        );
        Ok(true)
    }

    async fn tag_ids_for_item(&self, item_id: i64) -> Result<Vec<i64>> {
        let sql = format!(
            "SELECT tag_id FROM {} WHERE item_id = $1 ORDER BY attached_at, tag_id",
            self.config.attachment_table
        );
        let ids = sqlx::query_scalar::<_, i64>(&sql)
            .bind(item_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn tags_for_item(&self, item_id: i64) -> Result<Vec<ItemTag>> {
        let sql = format!(
            "SELECT g.id, g.name, g.item_count, g.created_at, g.updated_at, g.deleted_at, \
                    a.attached_at \
             FROM {attachments} a \
             JOIN {tags} g ON g.id = a.tag_id \
             WHERE a.item_id = $1 AND g.deleted_at IS NULL \
             ORDER BY a.attached_at, g.id",
            attachments = self.config.attachment_table,
            tags = self.config.tag_table
        );
        let rows = sqlx::query(&sql)
            .bind(item_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<ItemTag> {
                Ok(ItemTag {
                    tag: tag_from_row(row)?,
                    attached_at: row.try_get("attached_at")?,
                })
            })
            .collect()
    }

    async fn sync_attributes(
        &self,
        item_id: i64,
        synced: &SyncedAttributes,
    ) -> Result<SyncOutcome> {
        let start = Instant::now();
        let mut tx = self.pool.begin().await?;

        let select = format!(
            "SELECT tag_id, synced FROM {} WHERE item_id = $1 ORDER BY tag_id FOR UPDATE",
            self.config.attachment_table
        );
        let rows = sqlx::query(&select)
            .bind(item_id)
            .fetch_all(&mut *tx)
            .await?;

        let locked = rows
            .iter()
            .map(|row| -> Result<(i64, SyncedAttributes)> {
                let previous: Json<SyncedAttributes> = row.try_get("synced")?;
                Ok((row.try_get("tag_id")?, previous.0))
            })
            .collect::<Result<Vec<_>>>()?;
        if locked.is_empty() {
            return Ok(SyncOutcome::default());
        }
        let tag_ids: Vec<i64> = locked.iter().map(|(tag_id, _)| *tag_id).collect();

        // Rows attached after the lock was taken keep their own synced values.
        let rewritten = sqlx::query(&sync_update_sql(&self.config.attachment_table))
            .bind(item_id)
            .bind(Json(synced))
            .bind(&tag_ids)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let now_live = self.config.is_live(synced);
        let mut outcome = SyncOutcome {
            rows: rewritten,
            ..Default::default()
        };

        for (tag_id, previous) in &locked {
            let (tag_id, was_live) = (*tag_id, self.config.is_live(previous));
            trace!(item_id, tag_id, was_live, now_live, "Synced attachment row");

            if was_live && !now_live {
                self.decrement(&mut tx, tag_id).await?;
                outcome.decremented.push(tag_id);
            } else if !was_live && now_live {
                self.increment(&mut tx, tag_id).await?;
                outcome.incremented.push(tag_id);
            }
        }

        tx.commit().await?;

        debug!(
            subsystem = "database",
            component = "attachments",
            op = "sync_attributes",
            item_id,
            rows = outcome.rows,
            incremented = outcome.incremented.len(),
            decremented = outcome.decremented.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Synced attachment attributes"
        );
        Ok(outcome)
    }

    async fn item_ids(&self, plan: &TagPlan, options: &ItemQueryOptions) -> Result<Vec<i64>> {
        let (sql, params) = PlanSqlBuilder::new(&self.config).item_ids(plan, options);
        let rows = bind_params(sqlx::query(&sql), &params)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<i64, _>("item_id").map_err(Into::into))
            .collect()
    }

    async fn count(&self, plan: &TagPlan) -> Result<i64> {
        let (sql, params) = PlanSqlBuilder::new(&self.config).count(plan);
        let row = bind_params(sqlx::query(&sql), &params)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("total")?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_update_only_touches_locked_rows() {
        let sql = sync_update_sql("app.taggables");
        assert_eq!(
            sql,
            "UPDATE app.taggables SET synced = $2 WHERE item_id = $1 AND tag_id = ANY($3)"
        );
    }
}
