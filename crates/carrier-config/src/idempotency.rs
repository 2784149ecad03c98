// ============================================================================
// Idempotency Cache Configuration
// ============================================================================

use crate::constants::{
    DEFAULT_DEDUP_SAFETY_MARGIN_HOURS, DEFAULT_IDEMPOTENCY_TTL_DAYS, SECONDS_PER_DAY,
    SECONDS_PER_HOUR,
};

/// Configuration for the TTL-based idempotency cache gate
#[derive(Clone, Debug)]
pub struct IdempotencyConfig {
    /// Base entry lifetime in days
    pub ttl_days: i64,
    /// Safety margin in hours added on top of the base TTL.
    ///
    /// Covers the window where a message sits at the end of the broker's
    /// redelivery horizon while the worker restarts: the dedup entry must
    /// outlive the last possible redelivery.
    pub safety_margin_hours: i64,
    /// Cache key prefix: "{prefix}{idempotency_key}"
    pub key_prefix: String,
}

impl IdempotencyConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            ttl_days: std::env::var("IDEMPOTENCY_TTL_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_IDEMPOTENCY_TTL_DAYS),
            safety_margin_hours: std::env::var("IDEMPOTENCY_SAFETY_MARGIN_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_DEDUP_SAFETY_MARGIN_HOURS),
            key_prefix: std::env::var("IDEMPOTENCY_KEY_PREFIX")
                .unwrap_or_else(|_| "processed_event:".to_string()),
        }
    }

    /// Full entry TTL in seconds
    pub fn ttl_seconds(&self) -> u64 {
        ((self.ttl_days * SECONDS_PER_DAY) + (self.safety_margin_hours * SECONDS_PER_HOUR)) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_includes_safety_margin() {
        let config = IdempotencyConfig {
            ttl_days: 7,
            safety_margin_hours: 2,
            key_prefix: "processed_event:".to_string(),
        };
        assert_eq!(config.ttl_seconds(), (7 * 86400 + 2 * 3600) as u64);
    }
}
