// ============================================================================
// Configuration Constants
// ============================================================================

// Time conversion constants
pub const SECONDS_PER_MINUTE: i64 = 60;
pub const SECONDS_PER_HOUR: i64 = 3600;
pub const SECONDS_PER_DAY: i64 = 86400;

/// Hard per-client budget of broker streaming connections.
///
/// The connection allocator never commits more streams than this against a
/// single client; it rolls over to a fresh client instead.
pub const MAX_CLIENT_STREAMS: u32 = 80;

/// Streams requested per subscription when the caller does not specify one.
pub const DEFAULT_SUBSCRIPTION_STREAMS: u32 = 5;

/// Suffix appended to a subscription name to derive its dead-letter topic
/// and dead-letter subscription names.
///
/// Schema lookup for dead-letter-replayed messages depends on this exact
/// format; changing it breaks revision resolution silently.
pub const DEAD_LETTER_SUFFIX: &str = "-unack";

/// Suffix appended to a topic name to derive its schema-registry name.
pub const SCHEMA_NAME_SUFFIX: &str = "-generated-avro";

// Default subscription tuning
pub(crate) const DEFAULT_ACK_DEADLINE_SECS: u32 = 60;
pub(crate) const DEFAULT_FLOW_MAX_MESSAGES: usize = 100;
pub(crate) const DEFAULT_IDEMPOTENCY_TTL_DAYS: i64 = 7;
pub(crate) const DEFAULT_DEDUP_SAFETY_MARGIN_HOURS: i64 = 2;
pub(crate) const DEFAULT_STORE_MAX_CONNECTIONS: u32 = 10;
pub(crate) const DEFAULT_STORE_ACQUIRE_TIMEOUT_SECS: u64 = 30;
pub(crate) const DEFAULT_STORE_IDLE_TIMEOUT_SECS: u64 = 600;

/// Dead-letter topic (and subscription) name for a primary subscription.
pub fn dead_letter_name(subscription: &str) -> String {
    format!("{}{}", subscription, DEAD_LETTER_SUFFIX)
}

/// Registry schema name for a topic.
pub fn schema_name(topic: &str) -> String {
    format!("{}{}", topic, SCHEMA_NAME_SUFFIX)
}

/// The primary subscription behind a dead-letter subscription name,
/// or `None` if the name does not carry the dead-letter suffix.
pub fn original_subscription(subscription: &str) -> Option<&str> {
    subscription.strip_suffix(DEAD_LETTER_SUFFIX)
}
