// ============================================================================
// Carrier Config - Centralized configuration management
// ============================================================================
//
// This crate provides centralized configuration for the carrier worker and
// library. Supports loading from environment variables with sensible
// defaults.
//
// ============================================================================

mod broker;
mod constants;
mod idempotency;
mod logging;
mod store;
mod subscription;

// Re-export all public types
pub use broker::BrokerConfig;
pub use constants::{
    dead_letter_name, original_subscription, schema_name, DEAD_LETTER_SUFFIX,
    DEFAULT_SUBSCRIPTION_STREAMS, MAX_CLIENT_STREAMS, SCHEMA_NAME_SUFFIX, SECONDS_PER_DAY,
    SECONDS_PER_HOUR, SECONDS_PER_MINUTE,
};
pub use idempotency::IdempotencyConfig;
pub use logging::LoggingConfig;
pub use store::StoreConfig;
pub use subscription::SubscriptionConfig;

use anyhow::Result;

/// Main configuration structure for the carrier worker
#[derive(Clone, Debug)]
pub struct Config {
    /// Idempotency cache connection URL (redis:// or rediss://)
    pub redis_url: String,

    /// Task store connection URL. Optional: deployments using only the
    /// cache-based idempotency gate run without a task store.
    pub database_url: Option<String>,

    pub rust_log: String,

    // Sub-configurations
    pub broker: BrokerConfig,
    pub subscription: SubscriptionConfig,
    pub idempotency: IdempotencyConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            redis_url: std::env::var("REDIS_URL")?,
            database_url: std::env::var("DATABASE_URL").ok(),
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            broker: BrokerConfig::from_env(),
            subscription: SubscriptionConfig::from_env(),
            idempotency: IdempotencyConfig::from_env(),
            store: StoreConfig::from_env(),
            logging: LoggingConfig::from_env(),
        })
    }

    /// The required project identifier, or a configuration error naming
    /// the missing variable. Raised at first schema-cache or publisher use.
    pub fn require_project_id(&self) -> Result<&str> {
        self.broker
            .project_id
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("PROJECT_ID is required but not set"))
    }
}
