//! Tag repository implementation.

use std::time::Instant;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;

use taggable_core::{
    constraints_for, validate_identifier, Error, NewTag, Result, ScopeConstraints, Tag, TagOrder,
    TagScope, TagStore, TaggableConfig,
};

use crate::plan_sql::{bind_params, push_param, QueryParam};

/// Columns selected for every tag read.
pub(crate) const TAG_COLUMNS: &str = "id, name, item_count, created_at, updated_at, deleted_at";

pub(crate) fn tag_from_row(row: &PgRow) -> Result<Tag> {
    Ok(Tag {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        item_count: row.try_get("item_count")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

/// Append ` AND column = $n` for every scope predicate.
fn scope_sql(constraints: &ScopeConstraints, params: &mut Vec<QueryParam>) -> Result<String> {
    let mut sql = String::new();
    for (column, value) in constraints.predicates() {
        validate_identifier(column)?;
        let placeholder = push_param(params, QueryParam::from(value));
        sql.push_str(&format!(" AND {} = {}", column, placeholder));
    }
    Ok(sql)
}

fn order_sql(order: TagOrder) -> &'static str {
    match order {
        TagOrder::Newest => "created_at DESC, id DESC",
        TagOrder::RecentlyUpdated => "updated_at DESC, id DESC",
        TagOrder::Alphabetical => "name ASC, id ASC",
        TagOrder::Popular => "item_count DESC, name ASC, id ASC",
    }
}

/// Resolution query: live tags matching any id or any name.
pub fn resolve_sql(
    table: &str,
    ids: &[i64],
    names: &[String],
    constraints: &ScopeConstraints,
) -> Result<(String, Vec<QueryParam>)> {
    let mut params = Vec::new();
    let ids_param = push_param(&mut params, QueryParam::IntArray(ids.to_vec()));
    let names_param = push_param(&mut params, QueryParam::TextArray(names.to_vec()));
    let scope = scope_sql(constraints, &mut params)?;

    let sql = format!(
        "SELECT {} FROM {} WHERE deleted_at IS NULL AND (id = ANY({}) OR name = ANY({})){}",
        TAG_COLUMNS, table, ids_param, names_param, scope
    );
    Ok((sql, params))
}

/// Insert statement for a new tag, including any stamped columns.
pub fn insert_sql(table: &str, tag: &NewTag) -> Result<(String, Vec<QueryParam>)> {
    let mut params = Vec::new();
    let mut columns = vec!["name".to_string()];
    let mut values = vec![push_param(&mut params, QueryParam::Text(tag.name.clone()))];

    for (column, value) in &tag.columns {
        validate_identifier(column)?;
        columns.push(column.clone());
        values.push(push_param(&mut params, QueryParam::from(value)));
    }

    let sql = format!(
        "INSERT INTO {} ({}, item_count, created_at, updated_at) \
         VALUES ({}, 0, NOW(), NOW()) RETURNING {}",
        table,
        columns.join(", "),
        values.join(", "),
        TAG_COLUMNS
    );
    Ok((sql, params))
}

/// PostgreSQL implementation of [`TagStore`].
#[derive(Clone)]
pub struct PgTagRepository {
    pool: Pool<Postgres>,
    table: String,
}

impl PgTagRepository {
    pub fn new(pool: Pool<Postgres>, config: &TaggableConfig) -> Self {
        Self {
            pool,
            table: config.tag_table.clone(),
        }
    }

    async fn find_one(
        &self,
        predicate: &str,
        param: QueryParam,
        scope: Option<&dyn TagScope>,
    ) -> Result<Option<Tag>> {
        let mut params = vec![param];
        let scope = scope_sql(&constraints_for(scope), &mut params)?;
        let sql = format!(
            "SELECT {} FROM {} WHERE deleted_at IS NULL AND {} = $1{}",
            TAG_COLUMNS, self.table, predicate, scope
        );

        let row = bind_params(sqlx::query(&sql), &params)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(tag_from_row).transpose()
    }
}

#[async_trait]
impl TagStore for PgTagRepository {
    async fn resolve(
        &self,
        ids: &[i64],
        names: &[String],
        scope: Option<&dyn TagScope>,
    ) -> Result<Vec<Tag>> {
        if ids.is_empty() && names.is_empty() {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let (sql, params) = resolve_sql(&self.table, ids, names, &constraints_for(scope))?;
        let rows = bind_params(sqlx::query(&sql), &params)
            .fetch_all(&self.pool)
            .await?;
        let tags = rows.iter().map(tag_from_row).collect::<Result<Vec<_>>>()?;

        debug!(
            subsystem = "database",
            component = "tags",
            op = "resolve",
            result_count = tags.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Resolved tags"
        );
        Ok(tags)
    }

    async fn find(&self, id: i64, scope: Option<&dyn TagScope>) -> Result<Option<Tag>> {
        self.find_one("id", QueryParam::Int(id), scope).await
    }

    async fn find_by_name(
        &self,
        name: &str,
        scope: Option<&dyn TagScope>,
    ) -> Result<Option<Tag>> {
        self.find_one("name", QueryParam::Text(name.to_string()), scope)
            .await
    }

    async fn insert(&self, tag: NewTag) -> Result<Tag> {
        let (sql, params) = insert_sql(&self.table, &tag)?;
        let row = bind_params(sqlx::query(&sql), &params)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| {
                let unique = matches!(
                    &err,
                    sqlx::Error::Database(db_err) if db_err.is_unique_violation()
                );
                if unique {
                    Error::Conflict(format!("tag name '{}' already exists", tag.name))
                } else {
                    Error::Database(err)
                }
            })?;
        tag_from_row(&row)
    }

    async fn list(
        &self,
        order: TagOrder,
        limit: i64,
        offset: i64,
        scope: Option<&dyn TagScope>,
    ) -> Result<Vec<Tag>> {
        let mut params = Vec::new();
        let scope = scope_sql(&constraints_for(scope), &mut params)?;
        let limit = push_param(&mut params, QueryParam::Int(limit.max(0)));
        let offset = push_param(&mut params, QueryParam::Int(offset.max(0)));
        let sql = format!(
            "SELECT {} FROM {} WHERE deleted_at IS NULL{} ORDER BY {} LIMIT {} OFFSET {}",
            TAG_COLUMNS,
            self.table,
            scope,
            order_sql(order),
            limit,
            offset
        );

        let rows = bind_params(sqlx::query(&sql), &params)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(tag_from_row).collect()
    }

    async fn soft_delete(&self, id: i64) -> Result<bool> {
        let sql = format!(
            "UPDATE {} SET deleted_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
            self.table
        );
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn restore(&self, id: i64) -> Result<bool> {
        let sql = format!(
            "UPDATE {} SET deleted_at = NULL, updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NOT NULL",
            self.table
        );
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taggable_core::PartitionScope;

    #[test]
    fn test_resolve_sql_without_scope() {
        let (sql, params) = resolve_sql(
            "tags",
            &[1, 2],
            &["rust".to_string()],
            &ScopeConstraints::new(),
        )
        .unwrap();

        assert_eq!(
            sql,
            "SELECT id, name, item_count, created_at, updated_at, deleted_at FROM tags \
             WHERE deleted_at IS NULL AND (id = ANY($1) OR name = ANY($2))"
        );
        assert_eq!(
            params,
            vec![
                QueryParam::IntArray(vec![1, 2]),
                QueryParam::TextArray(vec!["rust".to_string()]),
            ]
        );
    }

    #[test]
    fn test_resolve_sql_with_partition_scope() {
        let scope = PartitionScope::new("tenant_id", 7_i64);
        let constraints = constraints_for(Some(&scope as &dyn TagScope));
        let (sql, params) = resolve_sql("tags", &[], &["rust".to_string()], &constraints).unwrap();

        assert!(sql.ends_with(" AND tenant_id = $3"));
        assert_eq!(params[2], QueryParam::Int(7));
    }

    #[test]
    fn test_scope_column_is_validated() {
        let mut constraints = ScopeConstraints::new();
        constraints.require("tenant_id; --", 1_i64);
        let result = resolve_sql("tags", &[1], &[], &constraints);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_insert_sql_with_stamped_columns() {
        let mut tag = NewTag::new("rust");
        tag.set("tenant_id", 7_i64);
        let (sql, params) = insert_sql("tags", &tag).unwrap();

        assert_eq!(
            sql,
            "INSERT INTO tags (name, tenant_id, item_count, created_at, updated_at) \
             VALUES ($1, $2, 0, NOW(), NOW()) \
             RETURNING id, name, item_count, created_at, updated_at, deleted_at"
        );
        assert_eq!(
            params,
            vec![QueryParam::Text("rust".to_string()), QueryParam::Int(7)]
        );
    }

    #[test]
    fn test_order_sql() {
        assert_eq!(order_sql(TagOrder::Popular), "item_count DESC, name ASC, id ASC");
        assert_eq!(order_sql(TagOrder::Newest), "created_at DESC, id DESC");
    }
}
