//! Tag query planning.
//!
//! Planning turns an accumulated [`TagFilter`] plus the tags it resolved to
//! into a [`TagPlan`]: one anchor step filtering the base attachment scan and
//! a chain of self-joins, ordered so the most selective tag drives the scan.
//!
//! The steps are:
//!
//! 1. **Lookup** - build `name -> id`, `id -> id` and `id -> item_count` from
//!    the resolved tags.
//! 2. **Validation** - a single-value clause whose tag is missing makes the
//!    whole query unsatisfiable. An any-of clause keeps only the values that
//!    resolved; if none did the query is unsatisfiable.
//! 3. **Ordering** - clauses are sorted ascending by weight. A single clause
//!    weighs its tag's `item_count`; an any-of clause weighs
//!    [`ANY_OF_WEIGHT_BIAS`] plus the largest count among its tags, so any-of
//!    clauses always come after every single clause.
//! 4. **Construction** - the first clause becomes the anchor, the rest become
//!    joins. Any step with an id set makes the plan distinct.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::defaults::ANY_OF_WEIGHT_BIAS;
use crate::filter::{FilterClause, TagFilter};
use crate::models::Tag;

/// Tag restriction applied by one plan step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepFilter {
    /// `tag_id = id`
    One(i64),
    /// `tag_id IN ids`
    AnyOf(Vec<i64>),
}

impl StepFilter {
    pub fn contains(&self, tag_id: i64) -> bool {
        match self {
            StepFilter::One(id) => *id == tag_id,
            StepFilter::AnyOf(ids) => ids.contains(&tag_id),
        }
    }

    pub fn is_any_of(&self) -> bool {
        matches!(self, StepFilter::AnyOf(_))
    }
}

/// One resolved clause with its selectivity weight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanStep {
    pub filter: StepFilter,
    pub weight: i64,
}

/// A satisfiable, ordered join plan over the attachment table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagPlan {
    /// Most selective step, applied to the base attachment scan.
    pub anchor: PlanStep,
    /// Remaining steps, each a self-join on item id, in join order.
    pub joins: Vec<PlanStep>,
    /// Whether results must be de-duplicated by item id.
    pub distinct: bool,
}

impl TagPlan {
    /// All steps in execution order, anchor first.
    pub fn steps(&self) -> impl Iterator<Item = &PlanStep> {
        std::iter::once(&self.anchor).chain(self.joins.iter())
    }
}

/// Outcome of planning a filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "plan")]
pub enum PlanState {
    /// Some required tag does not exist; the query matches nothing.
    Unsatisfiable,
    Ready(TagPlan),
}

impl PlanState {
    pub fn is_satisfiable(&self) -> bool {
        matches!(self, PlanState::Ready(_))
    }

    pub fn plan(&self) -> Option<&TagPlan> {
        match self {
            PlanState::Ready(plan) => Some(plan),
            PlanState::Unsatisfiable => None,
        }
    }
}

/// Lookup tables built from the tags a filter resolved to.
#[derive(Debug, Clone, Default)]
pub struct TagLookup {
    by_name: HashMap<String, i64>,
    by_id: HashMap<i64, i64>,
    counts: HashMap<i64, i64>,
}

impl TagLookup {
    pub fn from_tags(tags: &[Tag]) -> Self {
        let mut lookup = Self::default();
        for tag in tags {
            lookup.by_name.insert(tag.name.clone(), tag.id);
            lookup.by_id.insert(tag.id, tag.id);
            lookup.counts.insert(tag.id, tag.item_count);
        }
        lookup
    }

    pub fn id_for_name(&self, name: &str) -> Option<i64> {
        self.by_name.get(name).copied()
    }

    pub fn id_for_id(&self, id: i64) -> Option<i64> {
        self.by_id.get(&id).copied()
    }

    pub fn item_count(&self, id: i64) -> i64 {
        self.counts.get(&id).copied().unwrap_or(0)
    }

    /// Resolve a clause to a weighted step, or `None` if it cannot match.
    fn resolve(&self, clause: &FilterClause) -> Option<PlanStep> {
        match clause {
            FilterClause::TagId(id) => self.single(self.id_for_id(*id)),
            FilterClause::TagName(name) => self.single(self.id_for_name(name)),
            FilterClause::AnyTagId(ids) => {
                self.any_of(ids.iter().filter_map(|id| self.id_for_id(*id)))
            }
            FilterClause::AnyTagName(names) => {
                self.any_of(names.iter().filter_map(|n| self.id_for_name(n)))
            }
        }
    }

    fn single(&self, id: Option<i64>) -> Option<PlanStep> {
        let id = id?;
        Some(PlanStep {
            filter: StepFilter::One(id),
            weight: self.item_count(id),
        })
    }

    fn any_of(&self, resolved: impl Iterator<Item = i64>) -> Option<PlanStep> {
        let mut ids: Vec<i64> = Vec::new();
        for id in resolved {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }

        let max_count = ids.iter().map(|id| self.item_count(*id)).max()?;
        Some(PlanStep {
            filter: StepFilter::AnyOf(ids),
            weight: ANY_OF_WEIGHT_BIAS + max_count,
        })
    }
}

/// Plan `filter` against the tags its references resolved to.
///
/// `resolved` must contain the live tags matching any requested id or name
/// (extra tags are harmless). An empty filter is unsatisfiable.
pub fn compile(filter: &TagFilter, resolved: &[Tag]) -> PlanState {
    if filter.is_empty() {
        return PlanState::Unsatisfiable;
    }

    let lookup = TagLookup::from_tags(resolved);
    let mut steps = Vec::with_capacity(filter.len());
    for clause in filter.clauses() {
        match lookup.resolve(clause) {
            Some(step) => steps.push(step),
            None => {
                debug!(
                    subsystem = "tagging",
                    component = "planner",
                    op = "compile",
                    clause = ?clause,
                    "Clause references no existing tag, query is unsatisfiable"
                );
                return PlanState::Unsatisfiable;
            }
        }
    }

    // Stable: equal weights keep insertion order.
    steps.sort_by_key(|step| step.weight);

    let distinct = steps.iter().any(|step| step.filter.is_any_of());
    let mut steps = steps.into_iter();
    let anchor = match steps.next() {
        Some(anchor) => anchor,
        None => return PlanState::Unsatisfiable,
    };
    let joins: Vec<PlanStep> = steps.collect();

    debug!(
        subsystem = "tagging",
        component = "planner",
        op = "compile",
        anchor = ?anchor.filter,
        anchor_weight = anchor.weight,
        join_count = joins.len(),
        distinct,
        "Compiled tag plan"
    );

    PlanState::Ready(TagPlan {
        anchor,
        joins,
        distinct,
    })
}
