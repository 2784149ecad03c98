use crate::task::{Execution, TaskExecutor};
use async_trait::async_trait;
use carrier_types::{DecodedEvent, MessageInfo};
use std::sync::Arc;

/// How a handler settled one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handling {
    /// The business logic ran for this delivery
    Handled,
    /// The delivery was recognized as a duplicate and skipped
    Skipped,
}

/// Business-logic capability invoked once per decoded event.
///
/// Implementations are composed with the pipeline by injection: a plain
/// handler runs on every delivery, while the idempotent variants
/// ([`CachedIdempotentHandler`](super::CachedIdempotentHandler),
/// [`StoreIdempotentHandler`]) wrap an inner handler with a dedup gate.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, event: DecodedEvent, info: &MessageInfo) -> anyhow::Result<Handling>;
}

/// Handler variant deduplicating through the transactional task ledger.
///
/// The wrapped handler runs at most once successfully per message id, even
/// across concurrent deliveries; the ledger transaction is the correctness
/// mechanism.
pub struct StoreIdempotentHandler {
    inner: Arc<dyn MessageHandler>,
    executor: Arc<TaskExecutor>,
}

impl StoreIdempotentHandler {
    pub fn new(inner: Arc<dyn MessageHandler>, executor: Arc<TaskExecutor>) -> Self {
        Self { inner, executor }
    }
}

#[async_trait]
impl MessageHandler for StoreIdempotentHandler {
    async fn handle(&self, event: DecodedEvent, info: &MessageInfo) -> anyhow::Result<Handling> {
        let inner = self.inner.clone();
        let outcome = self
            .executor
            .execute(&info.id, || async move {
                inner.handle(event, info).await.map(|_| ())
            })
            .await?;

        Ok(match outcome {
            Execution::Performed => Handling::Handled,
            Execution::Skipped => Handling::Skipped,
        })
    }
}
