// ============================================================================
// Broker Configuration
// ============================================================================

/// Broker connection configuration
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// Broker wiring mode ("memory" = in-process broker; anything else is
    /// expected to be wired by the embedding application)
    pub mode: String,
    /// Project identifier the broker and schema registry live under.
    /// Required for schema resolution and publishing; validated at first use.
    pub project_id: Option<String>,
    /// Primary topic name
    pub topic: String,
    /// Primary subscription name
    pub subscription: String,
}

impl BrokerConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            mode: std::env::var("BROKER_MODE").unwrap_or_else(|_| "memory".to_string()),
            project_id: std::env::var("PROJECT_ID").ok(),
            topic: std::env::var("BROKER_TOPIC").unwrap_or_else(|_| "carrier-events".to_string()),
            subscription: std::env::var("BROKER_SUBSCRIPTION")
                .unwrap_or_else(|_| "carrier-events-sub".to_string()),
        }
    }
}
