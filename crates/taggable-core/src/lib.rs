//! # taggable-core
//!
//! Core types, traits, query planning and counter maintenance for taggable.
//!
//! This crate holds everything that does not talk to a database: the filter
//! accumulator, the query planner and executor, the counter maintainer, and
//! an in-memory store. `taggable-db` provides the PostgreSQL stores.

pub mod config;
pub mod counter;
pub mod defaults;
pub mod error;
pub mod filter;
pub mod logging;
pub mod memory;
pub mod models;
pub mod plan;
pub mod query;
pub mod scope;
pub mod traits;

// Re-export commonly used types at crate root
pub use config::{validate_identifier, TaggableConfig};
pub use counter::TagCounter;
pub use error::{Error, Result};
pub use filter::{FilterClause, TagFilter, TagRef};
pub use memory::{MemoryCall, MemoryItemStore, MemoryStore};
pub use models::*;
pub use plan::{compile, PlanState, PlanStep, StepFilter, TagLookup, TagPlan};
pub use query::TagQuery;
pub use scope::{constraints_for, PartitionScope, ScopeConstraints, TagScope};
pub use traits::*;
