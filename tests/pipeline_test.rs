// ============================================================================
// Message Pipeline End-to-End Tests
// ============================================================================
//
// Full publish → decode → gate → handle → settle scenarios against the
// in-memory broker, registry, and idempotency store.
//
// ============================================================================

use carrier::broker::{BrokerClient, MemoryBroker};
use carrier::lifecycle::{subscription_options, SubscriptionManager};
use carrier::pipeline::{
    attribute_key_extractor, CachedIdempotentHandler, EventDecoder, Handling, IdempotencyStore,
    MemoryIdempotencyStore, MessageHandler, MessageProcessor,
};
use carrier::publisher::Publisher;
use carrier::schema::{MemoryRegistry, RevisionCache};
use carrier_config::SubscriptionConfig;
use carrier_error::{AppError, AppResult};
use carrier_types::{DecodedEvent, MessageInfo, ATTR_IDEMPOTENCY_KEY};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const SCHEMA: &str = r#"{
    "type": "record",
    "name": "Order",
    "fields": [{"name": "id", "type": "long"}]
}"#;

struct RecordingHandler {
    invocations: AtomicU32,
    last_payload: Mutex<Option<serde_json::Value>>,
}

impl RecordingHandler {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            invocations: AtomicU32::new(0),
            last_payload: Mutex::new(None),
        })
    }
}

#[async_trait::async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(&self, event: DecodedEvent, _info: &MessageInfo) -> anyhow::Result<Handling> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        *self.last_payload.lock().await = Some(event.payload);
        Ok(Handling::Handled)
    }
}

/// Store whose lookups always fail, for the fail-open path
struct BrokenStore;

#[async_trait::async_trait]
impl IdempotencyStore for BrokenStore {
    async fn get(&self, _key: &str) -> AppResult<Option<Vec<u8>>> {
        Err(AppError::broker("cache unreachable"))
    }

    async fn set_with_ttl(&self, _key: &str, _ttl: u64, _value: &[u8]) -> AppResult<()> {
        Err(AppError::broker("cache unreachable"))
    }
}

struct Fixture {
    broker: MemoryBroker,
    handler: Arc<RecordingHandler>,
    store: Arc<MemoryIdempotencyStore>,
    publisher: Publisher,
}

async fn fixture(max_delivery_attempts: Option<u32>, store: Option<Arc<dyn IdempotencyStore>>) -> Fixture {
    let broker = MemoryBroker::new();
    let registry = Arc::new(MemoryRegistry::new());
    registry
        .register_revision("orders-generated-avro", "rev-1", SCHEMA)
        .await;
    let cache = Arc::new(RevisionCache::new(
        registry,
        Some("test-project".to_string()),
        "orders",
        "orders-sub",
    ));

    let config = SubscriptionConfig {
        ack_deadline_secs: 30,
        flow_allow_excess_messages: false,
        flow_max_messages: 50,
        max_streams: 5,
        retry_min_backoff_secs: None,
        retry_max_backoff_secs: None,
        max_delivery_attempts,
    };
    let manager = SubscriptionManager::new(
        Arc::new(broker.clone()),
        "orders",
        "orders-sub",
        subscription_options("orders-sub", &config),
    );
    manager.initialize().await.unwrap();

    let handler = RecordingHandler::new();
    let memory_store = Arc::new(MemoryIdempotencyStore::new());
    let gate_store: Arc<dyn IdempotencyStore> = store.unwrap_or_else(|| memory_store.clone());
    let gated = Arc::new(CachedIdempotentHandler::new(
        handler.clone(),
        gate_store,
        attribute_key_extractor(),
        3600,
        "test-salt",
    ));
    let processor = Arc::new(MessageProcessor::new(
        EventDecoder::new(cache.clone()),
        gated,
    ));
    manager.start(processor).await.unwrap();

    let publisher = Publisher::new(broker.topic("orders"), cache);
    Fixture {
        broker,
        handler,
        store: memory_store,
        publisher,
    }
}

async fn wait_until<F: Fn() -> bool>(condition: F, what: &str) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

fn keyed(key: &str) -> HashMap<String, String> {
    HashMap::from([(ATTR_IDEMPOTENCY_KEY.to_string(), key.to_string())])
}

#[tokio::test]
async fn test_end_to_end_first_delivery_then_duplicate() {
    let fx = fixture(None, None).await;

    // first delivery: handler runs, key is recorded, message is acked
    fx.publisher
        .publish(&serde_json::json!({"id": 1}), keyed("order-1"))
        .await
        .unwrap();
    wait_until(
        || fx.handler.invocations.load(Ordering::SeqCst) == 1,
        "first delivery handled",
    )
    .await;

    assert_eq!(
        *fx.handler.last_payload.lock().await,
        Some(serde_json::json!({"id": 1}))
    );
    assert!(fx.store.contains("order-1").await);

    // identical delivery: same derived key, acked without the handler
    fx.publisher
        .publish(&serde_json::json!({"id": 1}), keyed("order-1"))
        .await
        .unwrap();
    // let the duplicate settle before asserting nothing ran
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fx.handler.invocations.load(Ordering::SeqCst), 1);
    assert_eq!(fx.broker.backlog_len("orders-sub").await, 0);
}

#[tokio::test]
async fn test_missing_key_runs_handler_every_delivery() {
    let fx = fixture(None, None).await;

    fx.publisher
        .publish(&serde_json::json!({"id": 1}), HashMap::new())
        .await
        .unwrap();
    fx.publisher
        .publish(&serde_json::json!({"id": 1}), HashMap::new())
        .await
        .unwrap();

    wait_until(
        || fx.handler.invocations.load(Ordering::SeqCst) == 2,
        "both keyless deliveries handled",
    )
    .await;
}

#[tokio::test]
async fn test_cache_errors_fail_open() {
    let fx = fixture(None, Some(Arc::new(BrokenStore))).await;

    fx.publisher
        .publish(&serde_json::json!({"id": 7}), keyed("order-7"))
        .await
        .unwrap();

    // lookup and write both fail; the delivery is still handled and acked
    wait_until(
        || fx.handler.invocations.load(Ordering::SeqCst) == 1,
        "delivery handled despite broken cache",
    )
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fx.broker.backlog_len("orders-sub").await, 0);
}

#[tokio::test]
async fn test_undecodable_payload_is_dead_lettered() {
    let fx = fixture(Some(2), None).await;

    // raw bytes that are not a valid encoding of the schema; published
    // directly, bypassing the validating publisher
    fx.broker
        .topic("orders")
        .publish_message(vec![0xff, 0xff, 0xff, 0xff], HashMap::new())
        .await
        .unwrap();

    // nacked on each attempt; after max_delivery_attempts the broker
    // replays it on the dead-letter topic (its subscription is closed, so
    // the replay parks in the backlog)
    wait_until_async(|| async {
        fx.broker.backlog_len("orders-sub-unack").await == 1
    })
    .await;
    assert_eq!(fx.handler.invocations.load(Ordering::SeqCst), 0);
}

async fn wait_until_async<F, Fut>(condition: F)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..500 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for condition");
}
