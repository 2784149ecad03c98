// ============================================================================
// In-Memory Broker
// ============================================================================
//
// In-process implementation of the broker traits. Backs the test suite and
// the worker's local mode: topic fan-out, backlog while a stream is closed,
// nack-driven redelivery with delivery-attempt counting, dead-letter routing
// once the attempt threshold is exceeded, and an admin-operation log so
// reconciliation behavior can be asserted.
//
// ============================================================================

use super::{
    AckHandle, BrokerClient, DeliveredMessage, IamRole, SubscriptionEvent, SubscriptionHandle,
    SubscriptionOptions, SubscriptionUpdate, TopicHandle, TopicMetadata,
};
use async_trait::async_trait;
use carrier_error::{AppError, AppResult};
use carrier_types::Message;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

/// One recorded administrative operation, for reconciliation assertions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminOp {
    CreateTopic(String),
    CreateSubscription(String),
    UpdateSubscription(String),
    Grant {
        resource: String,
        role: IamRole,
        member: String,
    },
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, TopicState>,
    subscriptions: HashMap<String, SubscriptionState>,
    admin_ops: Vec<AdminOp>,
}

#[derive(Default)]
struct TopicState {
    metadata: TopicMetadata,
}

struct SubscriptionState {
    topic: String,
    options: SubscriptionOptions,
    sender: Option<mpsc::UnboundedSender<SubscriptionEvent>>,
    backlog: VecDeque<Message>,
}

/// In-process broker
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    identity: String,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            identity: "broker-agent@memory.local".to_string(),
        }
    }

    /// Administrative operations performed so far, in order
    pub async fn admin_ops(&self) -> Vec<AdminOp> {
        self.state.lock().await.admin_ops.clone()
    }

    /// Inject a transport error event into an open subscription stream
    pub async fn emit_stream_error(&self, subscription: &str, message: &str) {
        let state = self.state.lock().await;
        if let Some(sub) = state.subscriptions.get(subscription) {
            if let Some(sender) = &sub.sender {
                let _ = sender.send(SubscriptionEvent::Error(AppError::transport(message)));
            }
        }
    }

    /// Effective options of a subscription, for reconciliation assertions
    pub async fn subscription_options(&self, subscription: &str) -> Option<SubscriptionOptions> {
        let state = self.state.lock().await;
        state
            .subscriptions
            .get(subscription)
            .map(|sub| sub.options.clone())
    }

    /// Number of messages waiting in a closed subscription's backlog
    pub async fn backlog_len(&self, subscription: &str) -> usize {
        let state = self.state.lock().await;
        state
            .subscriptions
            .get(subscription)
            .map(|sub| sub.backlog.len())
            .unwrap_or(0)
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerClient for MemoryBroker {
    fn topic(&self, name: &str) -> Arc<dyn TopicHandle> {
        Arc::new(MemoryTopic {
            state: self.state.clone(),
            name: name.to_string(),
        })
    }

    fn service_identity(&self) -> String {
        self.identity.clone()
    }
}

struct MemoryTopic {
    state: Arc<Mutex<BrokerState>>,
    name: String,
}

#[async_trait]
impl TopicHandle for MemoryTopic {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self) -> AppResult<bool> {
        Ok(self.state.lock().await.topics.contains_key(&self.name))
    }

    async fn create(&self) -> AppResult<()> {
        let mut state = self.state.lock().await;
        if state.topics.contains_key(&self.name) {
            return Err(AppError::provisioning(format!(
                "topic {} already exists",
                self.name
            )));
        }
        state.topics.insert(self.name.clone(), TopicState::default());
        state.admin_ops.push(AdminOp::CreateTopic(self.name.clone()));
        Ok(())
    }

    async fn get_metadata(&self) -> AppResult<TopicMetadata> {
        let state = self.state.lock().await;
        state
            .topics
            .get(&self.name)
            .map(|topic| topic.metadata.clone())
            .ok_or_else(|| AppError::broker(format!("topic {} does not exist", self.name)))
    }

    async fn set_metadata(&self, metadata: TopicMetadata) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let topic = state
            .topics
            .get_mut(&self.name)
            .ok_or_else(|| AppError::broker(format!("topic {} does not exist", self.name)))?;
        topic.metadata = metadata;
        Ok(())
    }

    async fn publish_message(
        &self,
        data: Vec<u8>,
        attributes: HashMap<String, String>,
    ) -> AppResult<String> {
        let mut state = self.state.lock().await;
        if !state.topics.contains_key(&self.name) {
            return Err(AppError::broker(format!(
                "topic {} does not exist",
                self.name
            )));
        }
        let message_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let subscribers: Vec<String> = state
            .subscriptions
            .iter()
            .filter(|(_, sub)| sub.topic == self.name)
            .map(|(name, _)| name.clone())
            .collect();
        for subscription in subscribers {
            let message = Message {
                id: message_id.clone(),
                delivery_attempt: 1,
                attributes: attributes.clone(),
                payload: data.clone(),
                publish_time: now,
                received_time: now,
            };
            deliver(&self.state, &mut state, &subscription, message);
        }
        Ok(message_id)
    }

    async fn set_iam_policy(&self, role: IamRole, member: &str) -> AppResult<()> {
        let mut state = self.state.lock().await;
        state.admin_ops.push(AdminOp::Grant {
            resource: self.name.clone(),
            role,
            member: member.to_string(),
        });
        Ok(())
    }

    fn subscription(&self, name: &str) -> Arc<dyn SubscriptionHandle> {
        Arc::new(MemorySubscription {
            state: self.state.clone(),
            topic: self.name.clone(),
            name: name.to_string(),
        })
    }
}

struct MemorySubscription {
    state: Arc<Mutex<BrokerState>>,
    topic: String,
    name: String,
}

#[async_trait]
impl SubscriptionHandle for MemorySubscription {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self) -> AppResult<bool> {
        Ok(self
            .state
            .lock()
            .await
            .subscriptions
            .contains_key(&self.name))
    }

    async fn create(&self, options: SubscriptionOptions) -> AppResult<()> {
        let mut state = self.state.lock().await;
        if state.subscriptions.contains_key(&self.name) {
            return Err(AppError::provisioning(format!(
                "subscription {} already exists",
                self.name
            )));
        }
        if !state.topics.contains_key(&self.topic) {
            return Err(AppError::provisioning(format!(
                "cannot attach subscription {} to missing topic {}",
                self.name, self.topic
            )));
        }
        state.subscriptions.insert(
            self.name.clone(),
            SubscriptionState {
                topic: self.topic.clone(),
                options,
                sender: None,
                backlog: VecDeque::new(),
            },
        );
        state
            .admin_ops
            .push(AdminOp::CreateSubscription(self.name.clone()));
        Ok(())
    }

    async fn set_metadata(&self, update: SubscriptionUpdate) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let sub = state
            .subscriptions
            .get_mut(&self.name)
            .ok_or_else(|| AppError::broker(format!("subscription {} does not exist", self.name)))?;
        sub.options.retry_policy = update.retry_policy;
        sub.options.dead_letter_policy = update.dead_letter_policy;
        state
            .admin_ops
            .push(AdminOp::UpdateSubscription(self.name.clone()));
        Ok(())
    }

    async fn set_iam_policy(&self, role: IamRole, member: &str) -> AppResult<()> {
        let mut state = self.state.lock().await;
        state.admin_ops.push(AdminOp::Grant {
            resource: self.name.clone(),
            role,
            member: member.to_string(),
        });
        Ok(())
    }

    async fn open(&self) -> AppResult<mpsc::UnboundedReceiver<SubscriptionEvent>> {
        let mut state = self.state.lock().await;
        let state_arc = self.state.clone();
        let sub = state
            .subscriptions
            .get_mut(&self.name)
            .ok_or_else(|| AppError::broker(format!("subscription {} does not exist", self.name)))?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let backlog: Vec<Message> = sub.backlog.drain(..).collect();
        sub.sender = Some(sender);
        for message in backlog {
            deliver(&state_arc, &mut state, &self.name, message);
        }
        Ok(receiver)
    }

    async fn close(&self) -> AppResult<()> {
        let mut state = self.state.lock().await;
        if let Some(sub) = state.subscriptions.get_mut(&self.name) {
            sub.sender = None;
        }
        Ok(())
    }
}

/// Route one message to a subscription: down the open stream if there is
/// one, into the backlog otherwise.
fn deliver(
    state_arc: &Arc<Mutex<BrokerState>>,
    state: &mut BrokerState,
    subscription: &str,
    mut message: Message,
) {
    let Some(sub) = state.subscriptions.get_mut(subscription) else {
        return;
    };
    message.received_time = Utc::now();
    if let Some(sender) = &sub.sender {
        let delivery = DeliveredMessage::new(
            message.clone(),
            Box::new(MemoryAcker {
                state: state_arc.clone(),
                subscription: subscription.to_string(),
            }),
        );
        if sender.send(SubscriptionEvent::Message(delivery)).is_ok() {
            return;
        }
        // receiver went away without close(); park the message
        sub.sender = None;
    }
    sub.backlog.push_back(message);
}

struct MemoryAcker {
    state: Arc<Mutex<BrokerState>>,
    subscription: String,
}

#[async_trait]
impl AckHandle for MemoryAcker {
    async fn ack(self: Box<Self>) -> AppResult<()> {
        Ok(())
    }

    async fn nack(self: Box<Self>, mut message: Message) -> AppResult<()> {
        let state_arc = self.state.clone();
        let mut state = self.state.lock().await;
        let Some(sub) = state.subscriptions.get(&self.subscription) else {
            return Ok(());
        };
        if let Some(policy) = sub.options.dead_letter_policy.clone() {
            if message.delivery_attempt >= policy.max_delivery_attempts {
                // attempts exhausted: replay on the dead-letter topic
                let dead_letter_subs: Vec<String> = state
                    .subscriptions
                    .iter()
                    .filter(|(_, sub)| sub.topic == policy.dead_letter_topic)
                    .map(|(name, _)| name.clone())
                    .collect();
                for subscription in dead_letter_subs {
                    let mut replay = message.clone();
                    replay.delivery_attempt = 1;
                    deliver(&state_arc, &mut state, &subscription, replay);
                }
                return Ok(());
            }
        }
        message.delivery_attempt += 1;
        deliver(&state_arc, &mut state, &self.subscription, message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{DeadLetterPolicy, FlowControl, StreamingOptions};

    fn test_options(dead_letter: Option<(u32, &str)>) -> SubscriptionOptions {
        SubscriptionOptions {
            ack_deadline_secs: 10,
            flow_control: FlowControl {
                allow_excess_messages: false,
                max_messages: 10,
            },
            streaming: StreamingOptions { max_streams: 1 },
            retry_policy: None,
            dead_letter_policy: dead_letter.map(|(max_delivery_attempts, topic)| {
                DeadLetterPolicy {
                    max_delivery_attempts,
                    dead_letter_topic: topic.to_string(),
                }
            }),
        }
    }

    async fn recv_message(
        receiver: &mut mpsc::UnboundedReceiver<SubscriptionEvent>,
    ) -> DeliveredMessage {
        match receiver.recv().await.expect("stream closed") {
            SubscriptionEvent::Message(delivery) => delivery,
            SubscriptionEvent::Error(e) => panic!("unexpected stream error: {e}"),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_open_subscription() {
        let broker = MemoryBroker::new();
        let topic = broker.topic("orders");
        topic.create().await.unwrap();
        let sub = topic.subscription("orders-sub");
        sub.create(test_options(None)).await.unwrap();
        let mut receiver = sub.open().await.unwrap();

        let id = topic
            .publish_message(vec![1, 2], HashMap::new())
            .await
            .unwrap();

        let delivery = recv_message(&mut receiver).await;
        assert_eq!(delivery.message.id, id);
        assert_eq!(delivery.message.delivery_attempt, 1);
        delivery.ack().await.unwrap();
    }

    #[tokio::test]
    async fn test_backlog_flushes_on_open() {
        let broker = MemoryBroker::new();
        let topic = broker.topic("orders");
        topic.create().await.unwrap();
        let sub = topic.subscription("orders-sub");
        sub.create(test_options(None)).await.unwrap();

        topic
            .publish_message(vec![1], HashMap::new())
            .await
            .unwrap();
        assert_eq!(broker.backlog_len("orders-sub").await, 1);

        let mut receiver = sub.open().await.unwrap();
        let delivery = recv_message(&mut receiver).await;
        assert_eq!(delivery.message.payload, vec![1]);
        assert_eq!(broker.backlog_len("orders-sub").await, 0);
    }

    #[tokio::test]
    async fn test_nack_redelivers_with_incremented_attempt() {
        let broker = MemoryBroker::new();
        let topic = broker.topic("orders");
        topic.create().await.unwrap();
        let sub = topic.subscription("orders-sub");
        sub.create(test_options(None)).await.unwrap();
        let mut receiver = sub.open().await.unwrap();

        topic
            .publish_message(vec![1], HashMap::new())
            .await
            .unwrap();

        let first = recv_message(&mut receiver).await;
        assert_eq!(first.message.delivery_attempt, 1);
        first.nack().await.unwrap();

        let second = recv_message(&mut receiver).await;
        assert_eq!(second.message.delivery_attempt, 2);
        second.ack().await.unwrap();
    }

    #[tokio::test]
    async fn test_dead_letter_routing_after_max_attempts() {
        let broker = MemoryBroker::new();
        let topic = broker.topic("orders");
        topic.create().await.unwrap();
        let dl_topic = broker.topic("orders-sub-unack");
        dl_topic.create().await.unwrap();
        let dl_sub = dl_topic.subscription("orders-sub-unack");
        dl_sub.create(test_options(None)).await.unwrap();
        let mut dl_receiver = dl_sub.open().await.unwrap();

        let sub = topic.subscription("orders-sub");
        sub.create(test_options(Some((2, "orders-sub-unack"))))
            .await
            .unwrap();
        let mut receiver = sub.open().await.unwrap();

        topic
            .publish_message(vec![9], HashMap::new())
            .await
            .unwrap();

        let first = recv_message(&mut receiver).await;
        first.nack().await.unwrap();
        let second = recv_message(&mut receiver).await;
        assert_eq!(second.message.delivery_attempt, 2);
        second.nack().await.unwrap();

        // attempts exhausted: the replay lands on the dead-letter stream
        let replayed = recv_message(&mut dl_receiver).await;
        assert_eq!(replayed.message.payload, vec![9]);
        assert_eq!(replayed.message.delivery_attempt, 1);
    }
}
