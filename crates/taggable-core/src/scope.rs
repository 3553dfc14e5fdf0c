//! Caller-supplied restriction of which tags are visible and creatable.
//!
//! A [`TagScope`] is consulted before every tag lookup and before every tag
//! insert. It can only add equality constraints on tag columns and stamp
//! column values on new tags; the table being queried stays the same.

use std::collections::BTreeMap;
use std::fmt;

use crate::models::{NewTag, ScopeValue};

/// Equality predicates added to a tag lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeConstraints {
    predicates: Vec<(String, ScopeValue)>,
}

impl ScopeConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `column = value`.
    pub fn require(&mut self, column: impl Into<String>, value: impl Into<ScopeValue>) -> &mut Self {
        self.predicates.push((column.into(), value.into()));
        self
    }

    pub fn predicates(&self) -> &[(String, ScopeValue)] {
        &self.predicates
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Whether a tag with these column values satisfies every predicate.
    pub fn matches(&self, columns: &BTreeMap<String, ScopeValue>) -> bool {
        self.predicates
            .iter()
            .all(|(column, value)| columns.get(column) == Some(value))
    }
}

/// Hook restricting tag visibility and stamping new tags.
pub trait TagScope: Send + Sync + fmt::Debug {
    /// Add constraints to a tag lookup.
    fn constrain(&self, constraints: &mut ScopeConstraints);

    /// Stamp a tag about to be created.
    fn stamp(&self, tag: &mut NewTag);
}

/// Collect the constraints of an optional scope.
pub fn constraints_for(scope: Option<&dyn TagScope>) -> ScopeConstraints {
    let mut constraints = ScopeConstraints::new();
    if let Some(scope) = scope {
        scope.constrain(&mut constraints);
    }
    constraints
}

/// Partitions tags by a single column, e.g. a tenant id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionScope {
    column: String,
    value: ScopeValue,
}

impl PartitionScope {
    pub fn new(column: impl Into<String>, value: impl Into<ScopeValue>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn value(&self) -> &ScopeValue {
        &self.value
    }
}

impl TagScope for PartitionScope {
    fn constrain(&self, constraints: &mut ScopeConstraints) {
        constraints.require(self.column.clone(), self.value.clone());
    }

    fn stamp(&self, tag: &mut NewTag) {
        tag.set(self.column.clone(), self.value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_scope_constrains_and_stamps() {
        let scope = PartitionScope::new("tenant_id", 7_i64);

        let constraints = constraints_for(Some(&scope as &dyn TagScope));
        assert_eq!(
            constraints.predicates(),
            &[("tenant_id".to_string(), ScopeValue::Int(7))]
        );

        let mut tag = NewTag::new("rust");
        scope.stamp(&mut tag);
        assert_eq!(tag.columns.get("tenant_id"), Some(&ScopeValue::Int(7)));
    }

    #[test]
    fn test_no_scope_has_no_constraints() {
        let constraints = constraints_for(None);
        assert!(constraints.is_empty());
        assert!(constraints.matches(&BTreeMap::new()));
    }

    #[test]
    fn test_constraints_match() {
        let mut constraints = ScopeConstraints::new();
        constraints.require("tenant_id", "acme");

        let mut columns = BTreeMap::new();
        assert!(!constraints.matches(&columns));

        columns.insert("tenant_id".to_string(), ScopeValue::from("acme"));
        assert!(constraints.matches(&columns));

        columns.insert("tenant_id".to_string(), ScopeValue::from("globex"));
        assert!(!constraints.matches(&columns));
    }
}
