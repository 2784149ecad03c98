//! # Carrier Redis
//!
//! Low-level Redis client for the carrier consumer pipeline.
//!
//! ## Design Principles
//!
//! - **No business logic** - Pure infrastructure layer
//! - **No dependencies** on other carrier-* crates
//! - **Generic operations** - the idempotency gate and any future caching
//!   concern share the same client
//!
//! ## Example
//!
//! ```rust,no_run
//! use carrier_redis::RedisClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = RedisClient::connect("redis://localhost:6379").await?;
//!
//!     // Set with expiry
//!     client.set_ex("key", "value", 3600).await?;
//!
//!     // Get
//!     let value: Option<String> = client.get("key").await?;
//!
//!     Ok(())
//! }
//! ```

mod client;

pub use client::RedisClient;

// Re-export commonly used types
pub use redis::RedisError;

/// Result type for Redis operations
pub type Result<T> = std::result::Result<T, RedisError>;
