use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Application error type with comprehensive error handling
///
/// This enum covers all error types that can occur in the pipeline,
/// providing structured error information for logging and for routing
/// errors to the right containment boundary (fatal vs per-message).
#[derive(Error, Debug)]
pub enum AppError {
    // ===== Configuration Errors =====
    #[error("Configuration error: {0}")]
    Config(String),

    // ===== Resource Provisioning Errors =====
    #[error("Provisioning error: {0}")]
    Provisioning(String),

    // ===== Broker Errors =====
    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Transport error: {0}")]
    Transport(String),

    // ===== Schema Errors =====
    #[error("Schema not found: {0}")]
    SchemaNotFound(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[cfg(feature = "avro")]
    #[error("Avro error: {0}")]
    Avro(#[from] apache_avro::Error),

    // ===== Message Processing Errors =====
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Task error: {0}")]
    Task(String),

    // ===== Database & Storage Errors =====
    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ===== Serialization Errors =====
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    // ===== Unknown/Generic Errors =====
    #[error("Unknown error: {0}")]
    Unknown(#[from] anyhow::Error),
}

impl From<std::convert::Infallible> for AppError {
    fn from(x: std::convert::Infallible) -> Self {
        match x {}
    }
}

impl AppError {
    /// Whether this error must terminate the process.
    ///
    /// Only configuration and resource provisioning errors cross the fatal
    /// boundary; everything else is contained to a single message's
    /// ack/nack outcome or to a stream close/reopen cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::Config(_) | AppError::Provisioning(_))
    }

    /// Whether this error means a remote resource does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::SchemaNotFound(_))
    }

    /// Get error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Provisioning(_) => "PROVISIONING_ERROR",
            AppError::Broker(_) => "BROKER_ERROR",
            AppError::Transport(_) => "TRANSPORT_ERROR",
            AppError::SchemaNotFound(_) => "SCHEMA_NOT_FOUND",
            AppError::Schema(_) => "SCHEMA_ERROR",
            #[cfg(feature = "avro")]
            AppError::Avro(_) => "AVRO_ERROR",
            AppError::Decode(_) => "DECODE_ERROR",
            AppError::Task(_) => "TASK_ERROR",
            #[cfg(feature = "database")]
            AppError::Database(_) => "DATABASE_ERROR",
            #[cfg(feature = "redis")]
            AppError::Redis(_) => "REDIS_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Json(_) => "JSON_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Unknown(_) => "UNKNOWN_ERROR",
        }
    }

    /// Log this error with appropriate level and context
    pub fn log(&self) {
        let code = self.error_code();

        if self.is_fatal() {
            tracing::error!(
                error = %self,
                error_code = %code,
                "Fatal error occurred"
            );
        } else if matches!(self, AppError::Transport(_)) {
            tracing::warn!(
                error = %self,
                error_code = %code,
                "Transport error occurred"
            );
        } else {
            tracing::error!(
                error = %self,
                error_code = %code,
                "Error occurred"
            );
        }
    }
}

// ============================================================================
// Helper functions for creating common errors
// ============================================================================

impl AppError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        AppError::Config(msg.into())
    }

    /// Create a provisioning error
    pub fn provisioning(msg: impl Into<String>) -> Self {
        AppError::Provisioning(msg.into())
    }

    /// Create a broker error
    pub fn broker(msg: impl Into<String>) -> Self {
        AppError::Broker(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        AppError::Transport(msg.into())
    }

    /// Create a schema-not-found error
    pub fn schema_not_found(msg: impl Into<String>) -> Self {
        AppError::SchemaNotFound(msg.into())
    }

    /// Create a schema error
    pub fn schema(msg: impl Into<String>) -> Self {
        AppError::Schema(msg.into())
    }

    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        AppError::Decode(msg.into())
    }

    /// Create a task error
    pub fn task(msg: impl Into<String>) -> Self {
        AppError::Task(msg.into())
    }
}
