// ============================================================================
// Task Store Configuration
// ============================================================================

use crate::constants::{
    DEFAULT_STORE_ACQUIRE_TIMEOUT_SECS, DEFAULT_STORE_IDLE_TIMEOUT_SECS,
    DEFAULT_STORE_MAX_CONNECTIONS,
};

/// Transactional task store (Postgres) configuration
#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    /// Entity kind prepended to task ids when deriving store keys
    pub entity_kind: String,
}

impl StoreConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            max_connections: std::env::var("STORE_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_STORE_MAX_CONNECTIONS),
            acquire_timeout_secs: std::env::var("STORE_ACQUIRE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_STORE_ACQUIRE_TIMEOUT_SECS),
            idle_timeout_secs: std::env::var("STORE_IDLE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_STORE_IDLE_TIMEOUT_SECS),
            entity_kind: std::env::var("STORE_ENTITY_KIND")
                .unwrap_or_else(|_| "task".to_string()),
        }
    }
}
