// ============================================================================
// Subscription Lifecycle Integration Tests
// ============================================================================
//
// Reconciliation against the in-memory broker: creation of absent
// resources, metadata-only updates for present ones, creation-time-only
// IAM grants, and stream close/reopen recovery.
//
// ============================================================================

use carrier::broker::memory::AdminOp;
use carrier::broker::{BrokerClient, IamRole, MemoryBroker};
use carrier::lifecycle::{subscription_options, SubscriptionManager};
use carrier::pipeline::{EventDecoder, Handling, MessageHandler, MessageProcessor};
use carrier::publisher::Publisher;
use carrier::schema::{MemoryRegistry, RevisionCache};
use carrier_config::SubscriptionConfig;
use carrier_types::{DecodedEvent, MessageInfo};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

const SCHEMA: &str = r#"{
    "type": "record",
    "name": "Order",
    "fields": [{"name": "id", "type": "long"}]
}"#;

fn subscription_config(max_delivery_attempts: Option<u32>) -> SubscriptionConfig {
    SubscriptionConfig {
        ack_deadline_secs: 30,
        flow_allow_excess_messages: false,
        flow_max_messages: 50,
        max_streams: 5,
        retry_min_backoff_secs: Some(10),
        retry_max_backoff_secs: Some(300),
        max_delivery_attempts,
    }
}

fn manager(broker: &MemoryBroker, max_delivery_attempts: Option<u32>) -> SubscriptionManager {
    let options = subscription_options("orders-sub", &subscription_config(max_delivery_attempts));
    SubscriptionManager::new(
        Arc::new(broker.clone()),
        "orders",
        "orders-sub",
        options,
    )
}

struct CountingHandler {
    invocations: AtomicU32,
}

#[async_trait::async_trait]
impl MessageHandler for CountingHandler {
    async fn handle(&self, _event: DecodedEvent, _info: &MessageInfo) -> anyhow::Result<Handling> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(Handling::Handled)
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

#[tokio::test]
async fn test_initialize_creates_absent_topic_and_subscription() {
    let broker = MemoryBroker::new();
    manager(&broker, None).initialize().await.unwrap();

    let ops = broker.admin_ops().await;
    assert_eq!(
        ops,
        vec![
            AdminOp::CreateTopic("orders".to_string()),
            AdminOp::CreateSubscription("orders-sub".to_string()),
        ]
    );

    // full configuration applied at creation
    let options = broker.subscription_options("orders-sub").await.unwrap();
    assert_eq!(options.ack_deadline_secs, 30);
    assert_eq!(options.flow_control.max_messages, 50);
    assert_eq!(options.streaming.max_streams, 5);
    assert_eq!(options.retry_policy.unwrap().min_backoff_secs, 10);
}

#[tokio::test]
async fn test_initialize_provisions_dead_letter_resources_with_grants() {
    let broker = MemoryBroker::new();
    manager(&broker, Some(5)).initialize().await.unwrap();

    let identity = broker.service_identity();
    let ops = broker.admin_ops().await;
    assert_eq!(
        ops,
        vec![
            AdminOp::CreateTopic("orders".to_string()),
            // dead-letter topic is provisioned and bound before the primary
            // subscription's policy references it
            AdminOp::CreateTopic("orders-sub-unack".to_string()),
            AdminOp::Grant {
                resource: "orders-sub-unack".to_string(),
                role: IamRole::Publisher,
                member: identity.clone(),
            },
            AdminOp::CreateSubscription("orders-sub".to_string()),
            AdminOp::CreateSubscription("orders-sub-unack".to_string()),
            AdminOp::Grant {
                resource: "orders-sub-unack".to_string(),
                role: IamRole::Subscriber,
                member: identity,
            },
        ]
    );

    let options = broker.subscription_options("orders-sub").await.unwrap();
    let policy = options.dead_letter_policy.unwrap();
    assert_eq!(policy.max_delivery_attempts, 5);
    assert_eq!(policy.dead_letter_topic, "orders-sub-unack");

    // the dead-letter subscription itself carries no dead-letter policy
    let dl_options = broker
        .subscription_options("orders-sub-unack")
        .await
        .unwrap();
    assert!(dl_options.dead_letter_policy.is_none());
}

#[tokio::test]
async fn test_repeated_initialize_only_pushes_metadata() {
    let broker = MemoryBroker::new();
    manager(&broker, Some(5)).initialize().await.unwrap();
    let ops_after_first = broker.admin_ops().await.len();

    // second startup against fully provisioned resources
    manager(&broker, Some(5)).initialize().await.unwrap();

    let ops = broker.admin_ops().await;
    let delta: Vec<AdminOp> = ops[ops_after_first..].to_vec();
    assert_eq!(
        delta,
        vec![AdminOp::UpdateSubscription("orders-sub".to_string())],
        "steady-state reconciliation must not create resources or touch IAM"
    );
}

#[tokio::test]
async fn test_metadata_update_pushes_current_policies() {
    let broker = MemoryBroker::new();
    manager(&broker, None).initialize().await.unwrap();
    assert!(broker
        .subscription_options("orders-sub")
        .await
        .unwrap()
        .dead_letter_policy
        .is_none());

    // dead-lettering enabled on a later startup
    manager(&broker, Some(7)).initialize().await.unwrap();
    let options = broker.subscription_options("orders-sub").await.unwrap();
    assert_eq!(
        options.dead_letter_policy.unwrap().max_delivery_attempts,
        7
    );
}

async fn pipeline(broker: &MemoryBroker) -> (SubscriptionManager, Arc<CountingHandler>, Publisher) {
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

    let manager = manager(broker, None);
    manager.initialize().await.unwrap();

    let handler = Arc::new(CountingHandler {
        invocations: AtomicU32::new(0),
    });
    let processor = Arc::new(MessageProcessor::new(
        EventDecoder::new(cache.clone()),
        handler.clone(),
    ));
    manager.start(processor).await.unwrap();

    let publisher = Publisher::new(broker.topic("orders"), cache);
    (manager, handler, publisher)
}

#[tokio::test]
async fn test_start_is_not_reentrant() {
    let broker = MemoryBroker::new();
    let (manager, handler, _publisher) = pipeline(&broker).await;

    let registry = Arc::new(MemoryRegistry::new());
    let cache = Arc::new(RevisionCache::new(
        registry,
        Some("test-project".to_string()),
        "orders",
        "orders-sub",
    ));
    let processor = Arc::new(MessageProcessor::new(EventDecoder::new(cache), handler));
    assert!(manager.start(processor).await.is_err());
}

#[tokio::test]
async fn test_transport_error_closes_and_reopens_stream() {
    let broker = MemoryBroker::new();
    let (_manager, handler, publisher) = pipeline(&broker).await;

    publisher
        .publish(&serde_json::json!({"id": 1}), HashMap::new())
        .await
        .unwrap();
    wait_until(
        || handler.invocations.load(Ordering::SeqCst) == 1,
        "first delivery",
    )
    .await;

    broker.emit_stream_error("orders-sub", "stream reset").await;
    // give the event loop a moment to close and reopen
    tokio::time::sleep(Duration::from_millis(50)).await;

    publisher
        .publish(&serde_json::json!({"id": 2}), HashMap::new())
        .await
        .unwrap();
    wait_until(
        || handler.invocations.load(Ordering::SeqCst) == 2,
        "delivery after stream recovery",
    )
    .await;
}
