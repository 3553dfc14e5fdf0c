//! Structured logging schema and field name constants for taggable.
//!
//! Both crates log with these field names so that aggregated logs can be
//! queried the same way regardless of which store produced them.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Store failure surfaced to the caller |
//! | WARN  | Recovered conflict, clamped counter, consistency violation |
//! | INFO  | Pool lifecycle |
//! | DEBUG | Planning decisions (anchor, distinct, unsatisfiable), counter mutations |
//! | TRACE | Per-row iteration |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "tagging", "database"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "query", "planner", "counter", "pool", "memory_store"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "resolve", "item_ids", "count", "attach", "detach", "sync"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Tag id being operated on.
pub const TAG_ID: &str = "tag_id";

/// Tag name being resolved or created.
pub const TAG_NAME: &str = "tag_name";

/// Item id being tagged, untagged or synced.
pub const ITEM_ID: &str = "item_id";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Number of accumulated filter clauses.
pub const CLAUSE_COUNT: &str = "clause_count";

/// Number of self-joins in a compiled plan.
pub const JOIN_COUNT: &str = "join_count";

/// Number of results returned by a query.
pub const RESULT_COUNT: &str = "result_count";

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

/// Database table affected.
pub const DB_TABLE: &str = "db_table";
