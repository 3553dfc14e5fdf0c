//! Tag filter accumulation.
//!
//! A [`TagFilter`] collects clauses in insertion order. Clauses are AND'd;
//! the values inside an any-of clause are OR'd. Nothing is resolved or
//! validated here: unknown ids and names are accepted and only fail later,
//! during planning, as an unsatisfiable query.
//!
//! ```
//! use taggable_core::{FilterClause, TagFilter};
//!
//! let filter = TagFilter::new()
//!     .with_tag("sports")
//!     .with_any_tag_id([3, 4]);
//!
//! assert_eq!(filter.len(), 2);
//! assert_eq!(filter.clauses()[1], FilterClause::AnyTagId(vec![3, 4]));
//! ```

use serde::{Deserialize, Serialize};

use crate::models::Tag;

/// Reference to a tag, either by name or by numeric id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagRef {
    ByName(String),
    ById(i64),
}

impl From<&str> for TagRef {
    fn from(name: &str) -> Self {
        TagRef::ByName(name.to_string())
    }
}

impl From<String> for TagRef {
    fn from(name: String) -> Self {
        TagRef::ByName(name)
    }
}

impl From<&String> for TagRef {
    fn from(name: &String) -> Self {
        TagRef::ByName(name.clone())
    }
}

impl From<i64> for TagRef {
    fn from(id: i64) -> Self {
        TagRef::ById(id)
    }
}

impl From<&Tag> for TagRef {
    fn from(tag: &Tag) -> Self {
        TagRef::ById(tag.id)
    }
}

impl From<Tag> for TagRef {
    fn from(tag: Tag) -> Self {
        TagRef::ById(tag.id)
    }
}

/// One filter condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterClause {
    /// Item must carry this tag id.
    TagId(i64),
    /// Item must carry at least one of these tag ids.
    AnyTagId(Vec<i64>),
    /// Item must carry the tag with this name.
    TagName(String),
    /// Item must carry at least one of the tags with these names.
    AnyTagName(Vec<String>),
}

impl FilterClause {
    /// Whether the clause carries a set of alternatives.
    pub fn is_any_of(&self) -> bool {
        matches!(self, FilterClause::AnyTagId(_) | FilterClause::AnyTagName(_))
    }
}

impl From<TagRef> for FilterClause {
    fn from(r: TagRef) -> Self {
        match r {
            TagRef::ById(id) => FilterClause::TagId(id),
            TagRef::ByName(name) => FilterClause::TagName(name),
        }
    }
}

/// Ordered list of AND'd tag clauses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagFilter {
    clauses: Vec<FilterClause>,
}

impl TagFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require a single tag.
    pub fn with_tag(mut self, tag: impl Into<TagRef>) -> Self {
        self.clauses.push(tag.into().into());
        self
    }

    /// Require every tag in `tags`, one clause each.
    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TagRef>,
    {
        self.clauses
            .extend(tags.into_iter().map(|t| FilterClause::from(t.into())));
        self
    }

    /// Require a single tag id.
    pub fn with_tag_id(mut self, id: i64) -> Self {
        self.clauses.push(FilterClause::TagId(id));
        self
    }

    /// Require every tag id in `ids`, one clause each.
    pub fn with_tag_ids(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.clauses.extend(ids.into_iter().map(FilterClause::TagId));
        self
    }

    /// Require at least one of `tags`.
    ///
    /// Id references and name references become two separate any-of clauses,
    /// so mixing them means "one of the ids AND one of the names". Empty
    /// groups add no clause.
    pub fn with_any_tag<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TagRef>,
    {
        let mut ids = Vec::new();
        let mut names = Vec::new();
        for tag in tags {
            match tag.into() {
                TagRef::ById(id) => ids.push(id),
                TagRef::ByName(name) => names.push(name),
            }
        }

        if !ids.is_empty() {
            self.clauses.push(FilterClause::AnyTagId(ids));
        }
        if !names.is_empty() {
            self.clauses.push(FilterClause::AnyTagName(names));
        }
        self
    }

    /// Require at least one of `ids`.
    ///
    /// Always adds exactly one clause; an empty set can never match.
    pub fn with_any_tag_id(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.clauses
            .push(FilterClause::AnyTagId(ids.into_iter().collect()));
        self
    }

    /// Append an already-built clause.
    pub fn with_clause(mut self, clause: FilterClause) -> Self {
        self.clauses.push(clause);
        self
    }

    pub fn clauses(&self) -> &[FilterClause] {
        &self.clauses
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Distinct ids and names referenced by any clause, in first-seen order.
    pub fn requested(&self) -> (Vec<i64>, Vec<String>) {
        let mut ids: Vec<i64> = Vec::new();
        let mut names: Vec<String> = Vec::new();

        let push_id = |id: i64, ids: &mut Vec<i64>| {
            if !ids.contains(&id) {
                ids.push(id);
            }
        };
        let push_name = |name: &String, names: &mut Vec<String>| {
            if !names.contains(name) {
                names.push(name.clone());
            }
        };

        for clause in &self.clauses {
            match clause {
                FilterClause::TagId(id) => push_id(*id, &mut ids),
                FilterClause::AnyTagId(set) => set.iter().for_each(|id| push_id(*id, &mut ids)),
                FilterClause::TagName(name) => push_name(name, &mut names),
                FilterClause::AnyTagName(set) => set.iter().for_each(|n| push_name(n, &mut names)),
            }
        }

        (ids, names)
    }
}
