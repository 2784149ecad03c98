// ============================================================================
// Logging Configuration
// ============================================================================

/// Logging privacy configuration
#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// When true, decoded payload metadata may appear in debug logs
    pub enable_message_metadata: bool,
    /// Salt for hashing identifiers before they reach log output
    pub hash_salt: String,
}

impl LoggingConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            enable_message_metadata: std::env::var("LOG_ENABLE_MESSAGE_METADATA")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            hash_salt: std::env::var("LOG_HASH_SALT").unwrap_or_else(|_| {
                tracing::warn!(
                    "LOG_HASH_SALT not set; identifier hashes in logs use the built-in \
                    default salt and are linkable across deployments"
                );
                "carrier-log-salt".to_string()
            }),
        }
    }
}
