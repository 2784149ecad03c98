// ============================================================================
// Broker Collaborator Interface
// ============================================================================
//
// Trait boundary around the publish/subscribe broker SDK. The pipeline only
// ever talks to these traits: topic and subscription handles for resource
// reconciliation and publishing, and a push-driven event stream that
// delivers messages carrying their own ack/nack handle.
//
// ============================================================================

pub mod memory;

use async_trait::async_trait;
use carrier_error::AppResult;
use carrier_types::Message;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use memory::MemoryBroker;

/// Server-side redelivery backoff applied by the broker between attempts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub min_backoff_secs: u64,
    pub max_backoff_secs: u64,
}

/// Routes messages exceeding the delivery-attempt threshold to a
/// dead-letter topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterPolicy {
    pub max_delivery_attempts: u32,
    pub dead_letter_topic: String,
}

/// Client-side delivery flow control
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowControl {
    pub allow_excess_messages: bool,
    pub max_messages: usize,
}

/// Streaming pull connection budget for one subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingOptions {
    pub max_streams: u32,
}

/// Full subscription configuration, applied at creation time.
///
/// Ack deadline, flow control, and streaming options are client-side and
/// are never reconciled after creation; retry and dead-letter policies are
/// broker-side metadata pushed on every startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionOptions {
    pub ack_deadline_secs: u32,
    pub flow_control: FlowControl,
    pub streaming: StreamingOptions,
    pub retry_policy: Option<RetryPolicy>,
    pub dead_letter_policy: Option<DeadLetterPolicy>,
}

/// Broker-side metadata pushed to an existing subscription
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionUpdate {
    pub retry_policy: Option<RetryPolicy>,
    pub dead_letter_policy: Option<DeadLetterPolicy>,
}

/// Schema binding recorded on a topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaSettings {
    pub schema: String,
}

/// Topic metadata as reported by the broker
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicMetadata {
    pub schema_settings: Option<SchemaSettings>,
}

/// Access-policy roles grantable on broker resources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IamRole {
    Publisher,
    Subscriber,
}

/// One event on an open subscription stream
pub enum SubscriptionEvent {
    Message(DeliveredMessage),
    Error(carrier_error::AppError),
}

/// A delivered message together with its acknowledgment handle.
///
/// The broker owns the envelope for its lifetime; the pipeline reads it and
/// settles the delivery exactly once via [`ack`](Self::ack) or
/// [`nack`](Self::nack).
pub struct DeliveredMessage {
    pub message: Message,
    acker: Box<dyn AckHandle>,
}

impl DeliveredMessage {
    pub fn new(message: Message, acker: Box<dyn AckHandle>) -> Self {
        Self { message, acker }
    }

    /// Acknowledge the delivery; the broker will not redeliver.
    pub async fn ack(self) -> AppResult<()> {
        self.acker.ack().await
    }

    /// Negatively acknowledge the delivery; the broker redelivers, counting
    /// another delivery attempt.
    pub async fn nack(self) -> AppResult<()> {
        self.acker.nack(self.message).await
    }
}

/// Settlement callback owned by the broker client
#[async_trait]
pub trait AckHandle: Send + Sync {
    async fn ack(self: Box<Self>) -> AppResult<()>;
    async fn nack(self: Box<Self>, message: Message) -> AppResult<()>;
}

/// A broker client connection carrying a bounded number of streams
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Handle on a named topic (whether or not it exists yet)
    fn topic(&self, name: &str) -> Arc<dyn TopicHandle>;

    /// The broker's own service identity, used for dead-letter IAM grants
    fn service_identity(&self) -> String;
}

#[async_trait]
pub trait TopicHandle: Send + Sync {
    fn name(&self) -> &str;

    async fn exists(&self) -> AppResult<bool>;

    async fn create(&self) -> AppResult<()>;

    async fn get_metadata(&self) -> AppResult<TopicMetadata>;

    async fn set_metadata(&self, metadata: TopicMetadata) -> AppResult<()>;

    /// Publish a message; returns the broker-assigned message id
    async fn publish_message(
        &self,
        data: Vec<u8>,
        attributes: HashMap<String, String>,
    ) -> AppResult<String>;

    async fn set_iam_policy(&self, role: IamRole, member: &str) -> AppResult<()>;

    /// Handle on a named subscription attached to this topic
    fn subscription(&self, name: &str) -> Arc<dyn SubscriptionHandle>;
}

#[async_trait]
pub trait SubscriptionHandle: Send + Sync {
    fn name(&self) -> &str;

    async fn exists(&self) -> AppResult<bool>;

    async fn create(&self, options: SubscriptionOptions) -> AppResult<()>;

    async fn set_metadata(&self, update: SubscriptionUpdate) -> AppResult<()>;

    async fn set_iam_policy(&self, role: IamRole, member: &str) -> AppResult<()>;

    /// Open the delivery stream. Backlogged messages are flushed into the
    /// returned channel; new deliveries follow as they arrive.
    async fn open(&self) -> AppResult<mpsc::UnboundedReceiver<SubscriptionEvent>>;

    /// Close the delivery stream; undelivered messages return to the backlog.
    async fn close(&self) -> AppResult<()>;
}
