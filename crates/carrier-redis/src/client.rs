//! Redis client implementation with connection management

use crate::Result;
use redis::{aio::ConnectionManager, AsyncCommands};

/// Redis client with automatic reconnection
#[derive(Clone)]
pub struct RedisClient {
    conn: ConnectionManager,
}

impl RedisClient {
    /// Connect to Redis server
    ///
    /// Supports both redis:// and rediss:// (TLS) URLs
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// GET - Get value by key
    pub async fn get<T: redis::FromRedisValue>(&mut self, key: &str) -> Result<Option<T>> {
        self.conn.get(key).await
    }

    /// SETEX - Set key with expiry in seconds
    pub async fn set_ex<V>(&mut self, key: &str, value: V, seconds: u64) -> Result<()>
    where
        V: redis::ToRedisArgs + Send + Sync,
    {
        self.conn.set_ex(key, value, seconds).await
    }

    /// EXISTS - Check if key exists
    pub async fn exists(&mut self, key: &str) -> Result<bool> {
        self.conn.exists(key).await
    }

    /// DEL - Delete one or more keys
    pub async fn del<K>(&mut self, keys: K) -> Result<i64>
    where
        K: redis::ToRedisArgs + Send + Sync,
    {
        self.conn.del(keys).await
    }

    /// TTL - Get time to live in seconds
    pub async fn ttl(&mut self, key: &str) -> Result<i64> {
        self.conn.ttl(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Note: These tests require a running Redis instance
    // Run with: docker run -d -p 6379:6379 redis:7

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_set_ex_and_get() -> Result<()> {
        let mut client = RedisClient::connect("redis://localhost:6379").await?;

        client.set_ex("carrier_test_key", "value", 10).await?;
        let value: Option<String> = client.get("carrier_test_key").await?;
        assert_eq!(value, Some("value".to_string()));

        let ttl = client.ttl("carrier_test_key").await?;
        assert!(ttl > 0 && ttl <= 10);

        client.del("carrier_test_key").await?;
        let value: Option<String> = client.get("carrier_test_key").await?;
        assert_eq!(value, None);

        Ok(())
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_exists() -> Result<()> {
        let mut client = RedisClient::connect("redis://localhost:6379").await?;

        client.del("carrier_exists_key").await?;
        assert!(!client.exists("carrier_exists_key").await?);

        client.set_ex("carrier_exists_key", "1", 10).await?;
        assert!(client.exists("carrier_exists_key").await?);

        client.del("carrier_exists_key").await?;
        Ok(())
    }
}
