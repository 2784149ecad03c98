// ============================================================================
// Subscription Configuration
// ============================================================================

use crate::constants::{DEFAULT_ACK_DEADLINE_SECS, DEFAULT_FLOW_MAX_MESSAGES};

/// Subscription tuning applied when the primary subscription is created.
///
/// Ack deadline, flow control, and streaming options are client-side: they
/// are only applied at creation time and never reconciled afterwards.
/// Retry policy and dead-letter policy are server-side metadata and are
/// pushed on every startup.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Ack deadline in seconds before the broker redelivers
    pub ack_deadline_secs: u32,
    /// Whether the broker may deliver beyond `flow_max_messages`
    pub flow_allow_excess_messages: bool,
    /// Maximum outstanding (unacked) messages delivered at once
    pub flow_max_messages: usize,
    /// Streaming pull connections opened for this subscription
    pub max_streams: u32,
    /// Minimum redelivery backoff in seconds (retry policy)
    pub retry_min_backoff_secs: Option<u64>,
    /// Maximum redelivery backoff in seconds (retry policy)
    pub retry_max_backoff_secs: Option<u64>,
    /// Delivery attempts before a message is routed to the dead-letter
    /// topic. Presence implies the dead-letter topic and subscription are
    /// provisioned and IAM-bound during initialization.
    pub max_delivery_attempts: Option<u32>,
}

impl SubscriptionConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            ack_deadline_secs: std::env::var("SUBSCRIPTION_ACK_DEADLINE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_ACK_DEADLINE_SECS),
            flow_allow_excess_messages: std::env::var("SUBSCRIPTION_ALLOW_EXCESS_MESSAGES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            flow_max_messages: std::env::var("SUBSCRIPTION_MAX_MESSAGES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_FLOW_MAX_MESSAGES),
            max_streams: std::env::var("SUBSCRIPTION_MAX_STREAMS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(crate::constants::DEFAULT_SUBSCRIPTION_STREAMS),
            retry_min_backoff_secs: std::env::var("SUBSCRIPTION_RETRY_MIN_BACKOFF_SECS")
                .ok()
                .and_then(|v| v.parse().ok()),
            retry_max_backoff_secs: std::env::var("SUBSCRIPTION_RETRY_MAX_BACKOFF_SECS")
                .ok()
                .and_then(|v| v.parse().ok()),
            max_delivery_attempts: std::env::var("SUBSCRIPTION_MAX_DELIVERY_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok()),
        }
    }
}
