//! Storage configuration types.

use serde::Deserialize;

/// SQLite storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path. Parent directories are created on open.
    pub path: String,
    /// Use a private in-memory database instead of `path`.
    pub in_memory: bool,
    /// Maximum pooled connections (forced to 1 for in-memory stores).
    pub max_connections: u32,
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout_secs: u64,
}

impl StorageConfig {
    /// In-memory store, used by tests.
    pub fn in_memory() -> Self {
        Self {
            in_memory: true,
            max_connections: 1,
            ..Self::default()
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "data/clinic.db".to_string(),
            in_memory: false,
            max_connections: 4,
            busy_timeout_secs: 100,
        }
    }
}
