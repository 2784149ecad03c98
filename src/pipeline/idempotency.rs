// ============================================================================
// Idempotency Cache Gate
// ============================================================================
//
// Best-effort deduplication through an external TTL key-value store. The
// gate fails open: a store that cannot be reached is treated as "not yet
// processed" so delivery never blocks on the cache. The narrow race where
// two concurrent deliveries both miss the cache is an accepted trade-off;
// deployments that need a guarantee use the task-ledger variant instead.
//
// ============================================================================

use super::handler::{Handling, MessageHandler};
use crate::utils::log_safe_id;
use async_trait::async_trait;
use carrier_error::AppResult;
use carrier_redis::RedisClient;
use carrier_types::{DecodedEvent, MessageInfo, ATTR_IDEMPOTENCY_KEY};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Derives the idempotency key for one delivery, or `None` when the
/// delivery carries nothing to deduplicate on
pub type KeyExtractor = Arc<dyn Fn(&DecodedEvent, &MessageInfo) -> Option<String> + Send + Sync>;

/// Default extractor: the wire attribute publishers stamp the key into
pub fn attribute_key_extractor() -> KeyExtractor {
    Arc::new(|_event, info| info.attributes.get(ATTR_IDEMPOTENCY_KEY).cloned())
}

/// External TTL key-value store consulted before handling.
///
/// Only existence is consulted; the stored value is never read back for
/// business logic.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn get(&self, key: &str) -> AppResult<Option<Vec<u8>>>;

    async fn set_with_ttl(&self, key: &str, ttl_seconds: u64, value: &[u8]) -> AppResult<()>;
}

/// Entry value written after successful handling
#[derive(Debug, Serialize, Deserialize)]
struct IdempotencyEntry {
    key: String,
    inserted_at: i64,
}

/// Idempotency store backed by Redis (`GET` / `SETEX`)
pub struct RedisIdempotencyStore {
    client: RedisClient,
    key_prefix: String,
}

impl RedisIdempotencyStore {
    pub fn new(client: RedisClient, key_prefix: &str) -> Self {
        Self {
            client,
            key_prefix: key_prefix.to_string(),
        }
    }

    fn cache_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn get(&self, key: &str) -> AppResult<Option<Vec<u8>>> {
        let mut client = self.client.clone();
        Ok(client.get(&self.cache_key(key)).await?)
    }

    async fn set_with_ttl(&self, key: &str, ttl_seconds: u64, value: &[u8]) -> AppResult<()> {
        let mut client = self.client.clone();
        client
            .set_ex(&self.cache_key(key), value, ttl_seconds)
            .await?;
        Ok(())
    }
}

/// In-memory idempotency store for tests and local runs (TTL is recorded,
/// not enforced)
#[derive(Default)]
pub struct MemoryIdempotencyStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.entries.lock().await.contains_key(key)
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn get(&self, key: &str) -> AppResult<Option<Vec<u8>>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set_with_ttl(&self, key: &str, _ttl_seconds: u64, value: &[u8]) -> AppResult<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

/// Handler variant deduplicating through the TTL cache.
///
/// Hit: skip and acknowledge. Miss or lookup error: run the wrapped handler,
/// then record the key best-effort (a write failure is logged, never
/// surfaced to the ack path — the business effect already happened). No
/// derivable key: the handler runs on every delivery and a single warning
/// per handler instance surfaces the misconfiguration without flooding logs.
pub struct CachedIdempotentHandler {
    inner: Arc<dyn MessageHandler>,
    store: Arc<dyn IdempotencyStore>,
    extractor: KeyExtractor,
    ttl_seconds: u64,
    hash_salt: String,
    missing_key_warned: AtomicBool,
}

impl CachedIdempotentHandler {
    pub fn new(
        inner: Arc<dyn MessageHandler>,
        store: Arc<dyn IdempotencyStore>,
        extractor: KeyExtractor,
        ttl_seconds: u64,
        hash_salt: &str,
    ) -> Self {
        Self {
            inner,
            store,
            extractor,
            ttl_seconds,
            hash_salt: hash_salt.to_string(),
            missing_key_warned: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl MessageHandler for CachedIdempotentHandler {
    async fn handle(&self, event: DecodedEvent, info: &MessageInfo) -> anyhow::Result<Handling> {
        let Some(key) = (self.extractor)(&event, info) else {
            if !self.missing_key_warned.swap(true, Ordering::Relaxed) {
                warn!(
                    message_id = %info.id,
                    "No idempotency key derivable; handler will run on every delivery"
                );
            }
            return self.inner.handle(event, info).await;
        };
        let key_hash = log_safe_id(&key, &self.hash_salt);

        let already_processed = match self.store.get(&key).await {
            Ok(entry) => entry.is_some(),
            Err(e) => {
                // fail open: at-least-once beats dropping the delivery
                warn!(
                    error = %e,
                    key_hash = %key_hash,
                    "Idempotency lookup failed, treating as not processed"
                );
                false
            }
        };
        if already_processed {
            info!(
                message_id = %info.id,
                key_hash = %key_hash,
                "Duplicate delivery skipped (idempotency cache)"
            );
            return Ok(Handling::Skipped);
        }

        let handling = self.inner.handle(event, info).await?;

        let entry = IdempotencyEntry {
            key: key.clone(),
            inserted_at: Utc::now().timestamp(),
        };
        match rmp_serde::to_vec(&entry) {
            Ok(value) => {
                if let Err(e) = self.store.set_with_ttl(&key, self.ttl_seconds, &value).await {
                    error!(
                        error = %e,
                        key_hash = %key_hash,
                        "Failed to record idempotency key after handling"
                    );
                } else {
                    debug!(
                        key_hash = %key_hash,
                        ttl_seconds = self.ttl_seconds,
                        "Idempotency key recorded"
                    );
                }
            }
            Err(e) => {
                error!(error = %e, key_hash = %key_hash, "Failed to serialize idempotency entry");
            }
        }

        Ok(handling)
    }
}
