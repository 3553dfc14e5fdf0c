//! Centralized default constants for taggable.
//!
//! Every crate references these instead of repeating literals.

// =============================================================================
// TABLES
// =============================================================================

/// Default tag table name.
pub const TAG_TABLE: &str = "tags";

/// Default attachment (join) table name.
pub const ATTACHMENT_TABLE: &str = "taggables";

/// Default item table name used by the stock item repository.
pub const ITEM_TABLE: &str = "items";

/// Default primary key column of the item table.
pub const ITEM_KEY: &str = "id";

/// Conventional soft-delete column name of tagged items.
pub const SOFT_DELETE_COLUMN: &str = "deleted_at";

// =============================================================================
// PLANNING
// =============================================================================

/// Weight added to every any-of clause so it sorts after all single clauses.
///
/// Any-of clauses can only widen the matched set relative to a single tag, so
/// they are pushed to the end of the join chain.
pub const ANY_OF_WEIGHT_BIAS: i64 = 100_000_000;

// =============================================================================
// PAGINATION
// =============================================================================

/// Default page size for paginated item queries.
pub const PAGE_LIMIT: i64 = 15;

/// Default page size for tag listings.
pub const TAG_LIST_LIMIT: i64 = 50;

/// Default page offset.
pub const PAGE_OFFSET: i64 = 0;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// PostgreSQL identifier length limit.
pub const MAX_IDENTIFIER_LEN: usize = 63;
