//! SQL generation for tag plans.
//!
//! A [`TagPlan`] becomes a single query over the attachment table: the anchor
//! step filters the base alias `t`, every other step self-joins the table as
//! `t1`, `t2`, ... on the item id. Parameters are numbered in the order they
//! appear in the SQL text.
//!
//! ```text
//! SELECT t.item_id
//! FROM taggables t
//! JOIN taggables t1 ON t1.item_id = t.item_id AND t1.tag_id = $1
//! JOIN taggables t2 ON t2.item_id = t.item_id AND t2.tag_id = ANY($2)
//! WHERE t.tag_id = $3
//! GROUP BY t.item_id
//! ORDER BY t.item_id ASC
//! ```

use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::Postgres;

use taggable_core::{ItemOrder, ItemQueryOptions, ScopeValue, StepFilter, TagPlan, TaggableConfig};

/// A bound parameter of a generated query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryParam {
    Int(i64),
    /// Array of ids (for `= ANY(..)`).
    IntArray(Vec<i64>),
    Text(String),
    TextArray(Vec<String>),
    Bool(bool),
}

impl From<&ScopeValue> for QueryParam {
    fn from(value: &ScopeValue) -> Self {
        match value {
            ScopeValue::Int(v) => QueryParam::Int(*v),
            ScopeValue::Text(v) => QueryParam::Text(v.clone()),
            ScopeValue::Bool(v) => QueryParam::Bool(*v),
        }
    }
}

/// Bind every parameter, in order.
pub fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &'q [QueryParam],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            QueryParam::Int(v) => query.bind(*v),
            QueryParam::IntArray(v) => query.bind(v.as_slice()),
            QueryParam::Text(v) => query.bind(v.as_str()),
            QueryParam::TextArray(v) => query.bind(v.as_slice()),
            QueryParam::Bool(v) => query.bind(*v),
        };
    }
    query
}

/// Placeholder for the next parameter.
pub(crate) fn push_param(params: &mut Vec<QueryParam>, param: QueryParam) -> String {
    params.push(param);
    format!("${}", params.len())
}

/// Builds item-id and count queries from a plan.
#[derive(Debug, Clone)]
pub struct PlanSqlBuilder<'a> {
    attachment_table: &'a str,
    soft_delete_column: Option<&'a str>,
}

impl<'a> PlanSqlBuilder<'a> {
    /// Builder for the configured attachment table.
    ///
    /// Live-row filtering is applied only when soft-delete tracking is active.
    pub fn new(config: &'a TaggableConfig) -> Self {
        let soft_delete_column = if config.tracks_soft_deletes() {
            config.soft_delete_column.as_deref()
        } else {
            None
        };
        Self {
            attachment_table: &config.attachment_table,
            soft_delete_column,
        }
    }

    fn step_predicate(
        alias: &str,
        filter: &StepFilter,
        params: &mut Vec<QueryParam>,
    ) -> String {
        match filter {
            StepFilter::One(id) => {
                format!("{}.tag_id = {}", alias, push_param(params, QueryParam::Int(*id)))
            }
            StepFilter::AnyOf(ids) => format!(
                "{}.tag_id = ANY({})",
                alias,
                push_param(params, QueryParam::IntArray(ids.clone()))
            ),
        }
    }

    /// `FROM ... JOIN ... WHERE ...` shared by both query shapes.
    fn from_clause(&self, plan: &TagPlan, params: &mut Vec<QueryParam>) -> String {
        let mut sql = format!("FROM {} t", self.attachment_table);

        for (i, step) in plan.joins.iter().enumerate() {
            let alias = format!("t{}", i + 1);
            let predicate = Self::step_predicate(&alias, &step.filter, params);
            sql.push_str(&format!(
                "\nJOIN {table} {alias} ON {alias}.item_id = t.item_id AND {predicate}",
                table = self.attachment_table,
                alias = alias,
                predicate = predicate
            ));
        }

        sql.push_str("\nWHERE ");
        sql.push_str(&Self::step_predicate("t", &plan.anchor.filter, params));

        if let Some(column) = self.soft_delete_column {
            let placeholder = push_param(params, QueryParam::Text(column.to_string()));
            sql.push_str(&format!("\n  AND (t.synced ->> {}) IS NULL", placeholder));
        }

        sql
    }

    /// Matching item ids with ordering and window applied.
    pub fn item_ids(&self, plan: &TagPlan, options: &ItemQueryOptions) -> (String, Vec<QueryParam>) {
        let mut params = Vec::new();
        let from = self.from_clause(plan, &mut params);

        let mut sql = format!("SELECT t.item_id\n{}", from);
        if plan.distinct {
            sql.push_str("\nGROUP BY t.item_id");
        }

        let attached_at = if plan.distinct {
            "MAX(t.attached_at)"
        } else {
            "t.attached_at"
        };
        let order = match options.order {
            ItemOrder::ItemIdAsc => "t.item_id ASC".to_string(),
            ItemOrder::ItemIdDesc => "t.item_id DESC".to_string(),
            ItemOrder::RecentFirst => format!("{} DESC, t.item_id ASC", attached_at),
            ItemOrder::OldestFirst => format!("{} ASC, t.item_id ASC", attached_at),
        };
        sql.push_str(&format!("\nORDER BY {}", order));

        if let Some(limit) = options.limit {
            let placeholder = push_param(&mut params, QueryParam::Int(limit.max(0)));
            sql.push_str(&format!("\nLIMIT {}", placeholder));
        }
        if let Some(offset) = options.offset {
            let placeholder = push_param(&mut params, QueryParam::Int(offset.max(0)));
            sql.push_str(&format!("\nOFFSET {}", placeholder));
        }

        (sql, params)
    }

    /// Number of distinct matching items.
    pub fn count(&self, plan: &TagPlan) -> (String, Vec<QueryParam>) {
        let mut params = Vec::new();
        let from = self.from_clause(plan, &mut params);
        let select = if plan.distinct {
            "COUNT(DISTINCT t.item_id)"
        } else {
            "COUNT(*)"
        };
        (format!("SELECT {} AS total\n{}", select, from), params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taggable_core::PlanStep;

    fn step(filter: StepFilter, weight: i64) -> PlanStep {
        PlanStep { filter, weight }
    }

    fn single_plan() -> TagPlan {
        TagPlan {
            anchor: step(StepFilter::One(1), 3),
            joins: vec![step(StepFilter::One(2), 10)],
            distinct: false,
        }
    }

    fn any_of_plan() -> TagPlan {
        TagPlan {
            anchor: step(StepFilter::One(9), 4),
            joins: vec![step(StepFilter::AnyOf(vec![3, 5]), 100_000_007)],
            distinct: true,
        }
    }

    #[test]
    fn test_item_ids_single_join() {
        let config = TaggableConfig::default();
        let (sql, params) =
            PlanSqlBuilder::new(&config).item_ids(&single_plan(), &ItemQueryOptions::default());

        assert_eq!(
            sql,
            "SELECT t.item_id\n\
             FROM taggables t\n\
             JOIN taggables t1 ON t1.item_id = t.item_id AND t1.tag_id = $1\n\
             WHERE t.tag_id = $2\n\
             ORDER BY t.item_id ASC"
        );
        assert_eq!(params, vec![QueryParam::Int(2), QueryParam::Int(1)]);
    }

    #[test]
    fn test_item_ids_any_of_groups_and_orders_by_latest() {
        let config = TaggableConfig::default();
        let options = ItemQueryOptions {
            order: ItemOrder::RecentFirst,
            limit: Some(15),
            offset: Some(30),
        };
        let (sql, params) = PlanSqlBuilder::new(&config).item_ids(&any_of_plan(), &options);

        assert!(sql.contains("JOIN taggables t1 ON t1.item_id = t.item_id AND t1.tag_id = ANY($1)"));
        assert!(sql.contains("WHERE t.tag_id = $2"));
        assert!(sql.contains("GROUP BY t.item_id"));
        assert!(sql.contains("ORDER BY MAX(t.attached_at) DESC, t.item_id ASC"));
        assert!(sql.ends_with("LIMIT $3\nOFFSET $4"));
        assert_eq!(
            params,
            vec![
                QueryParam::IntArray(vec![3, 5]),
                QueryParam::Int(9),
                QueryParam::Int(15),
                QueryParam::Int(30),
            ]
        );
    }

    #[test]
    fn test_count_distinct_only_when_needed() {
        let config = TaggableConfig::default();
        let builder = PlanSqlBuilder::new(&config);

        let (sql, _) = builder.count(&single_plan());
        assert!(sql.starts_with("SELECT COUNT(*) AS total\nFROM taggables t"));

        let (sql, params) = builder.count(&any_of_plan());
        assert!(sql.starts_with("SELECT COUNT(DISTINCT t.item_id) AS total"));
        assert!(!sql.contains("ORDER BY"));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_live_rows_only_with_soft_delete_tracking() {
        let config = TaggableConfig::new()
            .attachment_table("app.post_tags")
            .soft_deletes("deleted_at");
        let (sql, params) = PlanSqlBuilder::new(&config).count(&single_plan());

        assert!(sql.contains("FROM app.post_tags t"));
        assert!(sql.ends_with("WHERE t.tag_id = $2\n  AND (t.synced ->> $3) IS NULL"));
        assert_eq!(params[2], QueryParam::Text("deleted_at".to_string()));
    }

    #[test]
    fn test_anchor_only_plan_has_no_joins() {
        let config = TaggableConfig::default();
        let plan = TagPlan {
            anchor: step(StepFilter::AnyOf(vec![1, 2]), 100_000_000),
            joins: vec![],
            distinct: true,
        };
        let (sql, params) = PlanSqlBuilder::new(&config).item_ids(&plan, &ItemQueryOptions::default());

        assert!(!sql.contains("JOIN"));
        assert!(sql.contains("WHERE t.tag_id = ANY($1)"));
        assert_eq!(params, vec![QueryParam::IntArray(vec![1, 2])]);
    }

    #[test]
    fn test_negative_window_is_clamped() {
        let config = TaggableConfig::default();
        let options = ItemQueryOptions {
            limit: Some(-5),
            ..Default::default()
        };
        let (_, params) = PlanSqlBuilder::new(&config).item_ids(&single_plan(), &options);
        assert_eq!(params.last(), Some(&QueryParam::Int(0)));
    }
}
