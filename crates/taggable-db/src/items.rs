//! Generic item repository.
//!
//! Fetches whole rows of the configured item table as JSON, for hosts that do
//! not bring their own [`ItemStore`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};

use taggable_core::{ItemSnapshot, ItemStore, Result, TaggableConfig};

/// One row of the item table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: i64,
    /// Every column of the row, keyed by column name.
    pub data: JsonValue,
}

impl ItemRecord {
    /// Deserialize the row into a host type.
    pub fn parse<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }

    /// Snapshot for lifecycle calls; every column becomes an attribute.
    pub fn snapshot(&self) -> ItemSnapshot {
        let attributes = match &self.data {
            JsonValue::Object(map) => map.clone(),
            _ => Default::default(),
        };
        ItemSnapshot {
            id: self.id,
            attributes,
        }
    }
}

/// PostgreSQL implementation of [`ItemStore`] over `config.item_table`.
#[derive(Clone)]
pub struct PgItemRepository {
    pool: Pool<Postgres>,
    table: String,
    key: String,
}

impl PgItemRepository {
    pub fn new(pool: Pool<Postgres>, config: &TaggableConfig) -> Self {
        Self {
            pool,
            table: config.item_table.clone(),
            key: config.item_key.clone(),
        }
    }

    fn fetch_sql(&self) -> String {
        format!(
            "SELECT i.{key}::bigint AS item_id, to_jsonb(i) AS data FROM {table} i \
             WHERE i.{key} = ANY($1)",
            key = self.key,
            table = self.table
        )
    }

    /// Fetch one item by id.
    pub async fn find(&self, id: i64) -> Result<Option<ItemRecord>> {
        Ok(self.fetch_many(&[id]).await?.into_iter().next())
    }
}

#[async_trait]
impl ItemStore for PgItemRepository {
    type Item = ItemRecord;

    fn item_id(item: &ItemRecord) -> i64 {
        item.id
    }

    async fn fetch_many(&self, ids: &[i64]) -> Result<Vec<ItemRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = self.fetch_sql();
        let rows = sqlx::query(&sql).bind(ids).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| -> Result<ItemRecord> {
                Ok(ItemRecord {
                    id: row.try_get("item_id")?,
                    data: row.try_get("data")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_snapshot_and_parse() {
        #[derive(Deserialize)]
        struct Post {
            id: i64,
            title: String,
        }

        let record = ItemRecord {
            id: 3,
            data: json!({"id": 3, "title": "Hello", "deleted_at": null}),
        };

        let snapshot = record.snapshot();
        assert_eq!(snapshot.id, 3);
        assert_eq!(snapshot.attributes["title"], json!("Hello"));
        assert!(snapshot.attributes["deleted_at"].is_null());

        let post: Post = record.parse().unwrap();
        assert_eq!(post.id, 3);
        assert_eq!(post.title, "Hello");
    }

    #[test]
    fn test_parse_mismatch_is_serialization_error() {
        let record = ItemRecord {
            id: 1,
            data: json!("not an object"),
        };
        let result: Result<std::collections::HashMap<String, i64>> = record.parse();
        assert!(matches!(result, Err(taggable_core::Error::Serialization(_))));
    }
}
