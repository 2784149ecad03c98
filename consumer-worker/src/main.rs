// Consumer Worker
// ============================================================================
//
// Worker process for one logical subscription:
//
// 1. Reconcile topic / subscription / dead-letter resources (fatal on error)
// 2. Open the delivery stream and run the processing pipeline
// 3. Gate every delivery through the idempotency cache, and through the
//    transactional task ledger when a task store is configured
// 4. Ack/nack per message; transport errors close and reopen the stream
//
// The broker transport is wired in-process here (BROKER_MODE=memory);
// embedding applications provide their own broker client for real
// transports.
//
// ============================================================================

use anyhow::{Context, Result};
use carrier::broker::{BrokerClient, MemoryBroker};
use carrier::lifecycle::{subscription_options, SubscriptionManager};
use carrier::pipeline::{
    attribute_key_extractor, CachedIdempotentHandler, EventDecoder, Handling, MessageHandler,
    MessageProcessor, RedisIdempotencyStore, StoreIdempotentHandler,
};
use carrier::pool::ConnectionPool;
use carrier::schema::{MemoryRegistry, RevisionCache};
use carrier::task::{create_pool, PostgresTaskRepository, TaskExecutor};
use carrier::utils::mask_credentials;
use carrier_config::{schema_name, Config};
use carrier_types::{DecodedEvent, MessageInfo};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default payload schema used when SCHEMA_DEFINITION_PATH is not provided
const DEFAULT_SCHEMA: &str = r#"{
    "type": "record",
    "name": "Event",
    "fields": [
        {"name": "id", "type": "long"},
        {"name": "kind", "type": ["null", "string"], "default": null}
    ]
}"#;

/// Plain handler: logs the decoded event and succeeds
struct EchoHandler;

#[async_trait::async_trait]
impl MessageHandler for EchoHandler {
    async fn handle(&self, event: DecodedEvent, info: &MessageInfo) -> Result<Handling> {
        info!(
            message_id = %info.id,
            delivery_attempt = info.delivery_attempt,
            revision_id = event.schema_revision_id.as_deref().unwrap_or("none"),
            "Event received"
        );
        Ok(Handling::Handled)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;
    let config = Arc::new(config);

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.rust_log.clone()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("=== Consumer Worker Starting ===");
    info!("Broker Mode: {}", config.broker.mode);
    info!("Topic: {}", config.broker.topic);
    info!("Subscription: {}", config.broker.subscription);
    info!("Connecting to Redis at: {}", mask_credentials(&config.redis_url));

    if config.broker.mode != "memory" {
        error!(
            mode = %config.broker.mode,
            "External broker transports must be wired by the embedding application"
        );
        anyhow::bail!("unsupported BROKER_MODE: {}", config.broker.mode);
    }

    // Fail fast on missing project id rather than on the first delivery
    let project_id = config.require_project_id()?.to_string();

    // Connect to Redis (idempotency cache)
    let redis = carrier_redis::RedisClient::connect(&config.redis_url)
        .await
        .context("Failed to connect to Redis")?;
    info!("Connected to Redis");

    // In-process broker and schema registry
    let broker = MemoryBroker::new();
    let registry = Arc::new(MemoryRegistry::new());
    let definition = match std::env::var("SCHEMA_DEFINITION_PATH") {
        Ok(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read schema definition from {path}"))?,
        Err(_) => {
            info!("SCHEMA_DEFINITION_PATH not set, using built-in demo schema");
            DEFAULT_SCHEMA.to_string()
        }
    };
    registry
        .register_revision(&schema_name(&config.broker.topic), "rev-1", &definition)
        .await;
    registry
        .bind_subscription(&config.broker.subscription, &config.broker.topic)
        .await;

    // Allocate a client from the connection pool
    let pool = {
        let broker = broker.clone();
        ConnectionPool::new(Box::new(move || Arc::new(broker.clone())))
    };
    let client: Arc<dyn BrokerClient> =
        pool.allocate(Some(config.subscription.max_streams));

    // Reconcile broker resources. Provisioning failures are fatal:
    // continuing against half-configured infrastructure risks silent
    // message loss.
    let options = subscription_options(&config.broker.subscription, &config.subscription);
    let manager = SubscriptionManager::new(
        client,
        &config.broker.topic,
        &config.broker.subscription,
        options,
    );
    if let Err(e) = manager.initialize().await {
        e.log();
        return Err(e).context("Resource reconciliation failed");
    }
    info!("Broker resources reconciled");

    // Compose the handler chain: cache gate outside, task ledger inside
    // when a store is configured
    let mut handler: Arc<dyn MessageHandler> = Arc::new(EchoHandler);

    if let Some(database_url) = &config.database_url {
        info!(
            "Connecting to task store at: {}",
            mask_credentials(database_url)
        );
        let db_pool = create_pool(database_url, &config.store)
            .await
            .context("Failed to connect to task store")?;
        let repository = PostgresTaskRepository::new(db_pool, &config.store.entity_kind);
        repository
            .ensure_schema()
            .await
            .context("Failed to prepare task ledger table")?;
        let executor = Arc::new(TaskExecutor::new(
            Arc::new(repository),
            &config.logging.hash_salt,
        ));
        handler = Arc::new(StoreIdempotentHandler::new(handler, executor));
        info!("Task ledger gate enabled");
    }

    let store = Arc::new(RedisIdempotencyStore::new(
        redis,
        &config.idempotency.key_prefix,
    ));
    handler = Arc::new(CachedIdempotentHandler::new(
        handler,
        store,
        attribute_key_extractor(),
        config.idempotency.ttl_seconds(),
        &config.logging.hash_salt,
    ));

    // Start the pipeline
    let cache = Arc::new(RevisionCache::new(
        registry,
        Some(project_id),
        &config.broker.topic,
        &config.broker.subscription,
    ));
    let processor = Arc::new(MessageProcessor::new(EventDecoder::new(cache), handler));
    manager
        .start(processor)
        .await
        .context("Failed to start subscription stream")?;
    info!("Pipeline started, waiting for deliveries");

    // Wait for shutdown signal
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())
            .context("Failed to register SIGTERM handler")?;
        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down...");
    }

    info!("Consumer worker stopped gracefully");
    Ok(())
}
