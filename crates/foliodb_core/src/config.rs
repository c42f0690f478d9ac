//! Database configuration.

use std::time::Duration;

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the database if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to fsync each WAL append before acknowledging it
    /// (safer but slower).
    pub sync_on_write: bool,

    /// Maximum size of a WAL segment before a new one is opened.
    pub max_segment_size: u64,

    /// Maximum number of documents cached per collection.
    pub cache_capacity: usize,

    /// How long a cached document stays fresh.
    pub cache_ttl: Duration,

    /// Number of rename attempts before an atomic write gives up.
    pub rename_retry_budget: u32,

    /// Fixed delay between rename attempts.
    pub rename_retry_backoff: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_write: true,
            max_segment_size: 16 * 1024 * 1024, // 16 MB
            cache_capacity: 1000,
            cache_ttl: Duration::from_secs(60),
            rename_retry_budget: 5,
            rename_retry_backoff: Duration::from_millis(10),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to fsync each WAL append.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Sets the maximum WAL segment size.
    #[must_use]
    pub const fn max_segment_size(mut self, size: u64) -> Self {
        self.max_segment_size = size;
        self
    }

    /// Sets the per-collection cache capacity.
    #[must_use]
    pub const fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Sets the cache TTL.
    #[must_use]
    pub const fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Sets the rename retry budget.
    #[must_use]
    pub const fn rename_retry_budget(mut self, budget: u32) -> Self {
        self.rename_retry_budget = budget;
        self
    }
}
