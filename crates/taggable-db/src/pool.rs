//! PostgreSQL connection pool for the tag stores.
//!
//! Every store call checks a connection out of one shared pool, so the pool's
//! acquire timeout is the upper bound on how long a tag operation waits before
//! failing with [`taggable_core::Error::Database`].

use std::env;
use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, warn};

use taggable_core::{Error, Result};

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_MAX_LIFETIME_SECS: u64 = 1800;

/// Pool sizing and timeouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long a store call waits for a connection before failing.
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    /// `None` keeps connections open indefinitely.
    pub max_lifetime: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: DEFAULT_MIN_CONNECTIONS,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            max_lifetime: Some(Duration::from_secs(DEFAULT_MAX_LIFETIME_SECS)),
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_connections(mut self, n: u32) -> Self {
        self.max_connections = n;
        self
    }

    pub fn min_connections(mut self, n: u32) -> Self {
        self.min_connections = n;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn max_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    /// Load pool settings from the environment.
    ///
    /// Environment variables:
    /// - `TAGGABLE_DB_MAX_CONNECTIONS` (default: 10)
    /// - `TAGGABLE_DB_MIN_CONNECTIONS` (default: 1)
    /// - `TAGGABLE_DB_ACQUIRE_TIMEOUT_SECS` (default: 30)
    /// - `TAGGABLE_DB_IDLE_TIMEOUT_SECS` (default: 600)
    /// - `TAGGABLE_DB_MAX_LIFETIME_SECS` (default: 1800, `0` disables)
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let max_lifetime = match parse_env::<u64>("TAGGABLE_DB_MAX_LIFETIME_SECS") {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.max_lifetime,
        };
        Self {
            max_connections: parse_env("TAGGABLE_DB_MAX_CONNECTIONS")
                .unwrap_or(defaults.max_connections),
            min_connections: parse_env("TAGGABLE_DB_MIN_CONNECTIONS")
                .unwrap_or(defaults.min_connections),
            acquire_timeout: parse_env("TAGGABLE_DB_ACQUIRE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.acquire_timeout),
            idle_timeout: parse_env("TAGGABLE_DB_IDLE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_timeout),
            max_lifetime,
        }
    }

    /// Reject sizes sqlx would refuse or silently clamp.
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(Error::Config(
                "pool max_connections must be at least 1".to_string(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(Error::Config(format!(
                "pool min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        if self.acquire_timeout.is_zero() {
            return Err(Error::Config(
                "pool acquire_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(
                subsystem = "database",
                component = "pool",
                key,
                value = %raw,
                "Ignoring unparseable pool setting"
            );
            None
        }
    }
}

/// Connect with the default pool settings.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    create_pool_with_config(database_url, PoolConfig::default()).await
}

/// Connect with explicit pool settings.
pub async fn create_pool_with_config(database_url: &str, config: PoolConfig) -> Result<PgPool> {
    config.validate()?;
    let start = Instant::now();

    let mut options = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout);
    if let Some(max_lifetime) = config.max_lifetime {
        options = options.max_lifetime(max_lifetime);
    }

    let pool = options.connect(database_url).await?;

    info!(
        subsystem = "database",
        component = "pool",
        op = "connect",
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        acquire_timeout_secs = config.acquire_timeout.as_secs(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Tag store connection pool established"
    );
    Ok(pool)
}

/// Point-in-time connection counts of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub size: u32,
    pub idle: usize,
}

impl PoolStatus {
    pub fn of(pool: &PgPool) -> Self {
        Self {
            size: pool.size(),
            idle: pool.num_idle(),
        }
    }

    /// Every open connection is checked out, so the next store call waits.
    pub fn is_saturated(&self) -> bool {
        self.size > 0 && self.idle == 0
    }

    /// Log at DEBUG, or WARN when saturated.
    pub fn log(&self, op: &str) {
        if self.is_saturated() {
            warn!(
                subsystem = "database",
                component = "pool",
                op,
                pool_size = self.size,
                "Tag store pool has no idle connections"
            );
        } else {
            debug!(
                subsystem = "database",
                component = "pool",
                op,
                pool_size = self.size,
                pool_idle = self.idle,
                "Tag store pool status"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ENV_KEYS: [&str; 5] = [
        "TAGGABLE_DB_MAX_CONNECTIONS",
        "TAGGABLE_DB_MIN_CONNECTIONS",
        "TAGGABLE_DB_ACQUIRE_TIMEOUT_SECS",
        "TAGGABLE_DB_IDLE_TIMEOUT_SECS",
        "TAGGABLE_DB_MAX_LIFETIME_SECS",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            env::remove_var(key);
        }
    }

    #[test]
    fn test_pool_config_builder() {
        let config = PoolConfig::new()
            .max_connections(20)
            .min_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .max_lifetime(None);

        assert_eq!(config.max_connections, 20);
        assert_eq!(config.min_connections, 5);
        assert_eq!(config.acquire_timeout, Duration::from_secs(5));
        assert_eq!(config.max_lifetime, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pool_config_from_env() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("TAGGABLE_DB_MAX_CONNECTIONS", "4");
        env::set_var("TAGGABLE_DB_MIN_CONNECTIONS", "not-a-number");
        env::set_var("TAGGABLE_DB_IDLE_TIMEOUT_SECS", "60");

        let config = PoolConfig::from_env();
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.min_connections, DEFAULT_MIN_CONNECTIONS);
        assert_eq!(
            config.acquire_timeout,
            Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS)
        );
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
        assert_eq!(
            config.max_lifetime,
            Some(Duration::from_secs(DEFAULT_MAX_LIFETIME_SECS))
        );

        clear_env();
    }

    #[test]
    fn test_zero_max_lifetime_disables_recycling() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("TAGGABLE_DB_MAX_LIFETIME_SECS", "0");

        assert_eq!(PoolConfig::from_env().max_lifetime, None);

        clear_env();
    }

    #[test]
    fn test_validate_rejects_bad_sizes() {
        let err = PoolConfig::new().max_connections(0).validate().unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = PoolConfig::new()
            .max_connections(2)
            .min_connections(3)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("exceeds max_connections"));

        let err = PoolConfig::new()
            .acquire_timeout(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_pool_status_saturation() {
        assert!(PoolStatus { size: 3, idle: 0 }.is_saturated());
        assert!(!PoolStatus { size: 3, idle: 1 }.is_saturated());
        // A pool that has not opened any connection yet is not saturated.
        assert!(!PoolStatus { size: 0, idle: 0 }.is_saturated());
    }
}
