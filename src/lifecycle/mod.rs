// ============================================================================
// Subscription Lifecycle Manager
// ============================================================================
//
// Reconciles topic, subscription, and dead-letter resources on startup and
// runs the delivery event loop. Reconciliation is safe to repeat on every
// process start: resources are only created when absent, and only the
// broker-side policies (retry, dead-letter) are pushed to an existing
// subscription. IAM grants happen at resource creation time only — IAM
// state is never reconciled away.
//
// Stream state machine: STOPPED → STARTED on start(); a transport error
// closes and reopens the stream (STARTED → STARTED). That is the only
// automatic recovery path; it never re-runs resource reconciliation.
//
// ============================================================================

mod retry;

pub use retry::{call_with_backoff, BackoffPolicy};

use crate::broker::{
    BrokerClient, DeadLetterPolicy, FlowControl, IamRole, RetryPolicy, StreamingOptions,
    SubscriptionEvent, SubscriptionHandle, SubscriptionOptions, SubscriptionUpdate,
};
use crate::pipeline::{MessageProcessor, ProcessOutcome};
use carrier_config::{dead_letter_name, SubscriptionConfig};
use carrier_error::{AppError, AppResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

const METRICS_LOG_INTERVAL: Duration = Duration::from_secs(30);
const REOPEN_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Build the full subscription options for a primary subscription.
///
/// The dead-letter topic name is derived from the subscription name; the
/// lifecycle manager provisions it before the policy referencing it is
/// applied.
pub fn subscription_options(subscription_name: &str, config: &SubscriptionConfig) -> SubscriptionOptions {
    let retry_policy = match (config.retry_min_backoff_secs, config.retry_max_backoff_secs) {
        (None, None) => None,
        (min, max) => Some(RetryPolicy {
            min_backoff_secs: min.unwrap_or(10),
            max_backoff_secs: max.unwrap_or(600),
        }),
    };
    SubscriptionOptions {
        ack_deadline_secs: config.ack_deadline_secs,
        flow_control: FlowControl {
            allow_excess_messages: config.flow_allow_excess_messages,
            max_messages: config.flow_max_messages,
        },
        streaming: StreamingOptions {
            max_streams: config.max_streams,
        },
        retry_policy,
        dead_letter_policy: config.max_delivery_attempts.map(|max_delivery_attempts| {
            DeadLetterPolicy {
                max_delivery_attempts,
                dead_letter_topic: dead_letter_name(subscription_name),
            }
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Stopped,
    Started,
}

/// Manages one logical subscription: resource reconciliation and the
/// delivery event loop
pub struct SubscriptionManager {
    client: Arc<dyn BrokerClient>,
    topic_name: String,
    subscription_name: String,
    options: SubscriptionOptions,
    policy: BackoffPolicy,
    state: Mutex<StreamState>,
}

impl SubscriptionManager {
    pub fn new(
        client: Arc<dyn BrokerClient>,
        topic_name: &str,
        subscription_name: &str,
        options: SubscriptionOptions,
    ) -> Self {
        Self {
            client,
            topic_name: topic_name.to_string(),
            subscription_name: subscription_name.to_string(),
            options,
            policy: BackoffPolicy::broker_write(),
            state: Mutex::new(StreamState::Stopped),
        }
    }

    /// Reconcile topic, subscription, and dead-letter resources.
    ///
    /// Safe to call on every process startup. Any failure is a provisioning
    /// error: the caller must treat it as fatal rather than continue against
    /// half-configured infrastructure.
    pub async fn initialize(&self) -> AppResult<()> {
        self.reconcile().await.map_err(|e| match e {
            e @ (AppError::Provisioning(_) | AppError::Config(_)) => e,
            other => AppError::provisioning(format!(
                "failed to reconcile resources for subscription {}: {other}",
                self.subscription_name
            )),
        })
    }

    async fn reconcile(&self) -> AppResult<()> {
        let topic = self.client.topic(&self.topic_name);
        if !topic.exists().await? {
            info!(topic = %self.topic_name, "Topic absent, creating");
            call_with_backoff("create_topic", &self.policy, || topic.create()).await?;
        }

        // The dead-letter topic must exist and be IAM-bound before the
        // primary subscription's dead-letter policy references it.
        if let Some(policy) = &self.options.dead_letter_policy {
            let dead_letter_topic = self.client.topic(&policy.dead_letter_topic);
            if !dead_letter_topic.exists().await? {
                info!(topic = %policy.dead_letter_topic, "Dead-letter topic absent, creating");
                call_with_backoff("create_dead_letter_topic", &self.policy, || {
                    dead_letter_topic.create()
                })
                .await?;
                // grant only at creation: IAM state is not reconciled away
                dead_letter_topic
                    .set_iam_policy(IamRole::Publisher, &self.client.service_identity())
                    .await?;
                info!(
                    topic = %policy.dead_letter_topic,
                    "Granted broker identity publish rights on dead-letter topic"
                );
            }
        }

        let subscription = topic.subscription(&self.subscription_name);
        if !subscription.exists().await? {
            info!(subscription = %self.subscription_name, "Subscription absent, creating");
            call_with_backoff("create_subscription", &self.policy, || {
                subscription.create(self.options.clone())
            })
            .await?;
        } else {
            // flow control, streaming, and ack deadline are client-side;
            // only the broker-side policies are pushed post-creation
            let update = SubscriptionUpdate {
                retry_policy: self.options.retry_policy.clone(),
                dead_letter_policy: self.options.dead_letter_policy.clone(),
            };
            call_with_backoff("update_subscription", &self.policy, || {
                subscription.set_metadata(update.clone())
            })
            .await?;
            info!(
                subscription = %self.subscription_name,
                "Subscription present, pushed retry and dead-letter policies"
            );
        }

        if let Some(policy) = &self.options.dead_letter_policy {
            let dead_letter_subscription_name = dead_letter_name(&self.subscription_name);
            let dead_letter_topic = self.client.topic(&policy.dead_letter_topic);
            let dead_letter_subscription =
                dead_letter_topic.subscription(&dead_letter_subscription_name);
            if !dead_letter_subscription.exists().await? {
                info!(
                    subscription = %dead_letter_subscription_name,
                    "Dead-letter subscription absent, creating"
                );
                let dead_letter_options = SubscriptionOptions {
                    retry_policy: None,
                    dead_letter_policy: None,
                    ..self.options.clone()
                };
                call_with_backoff("create_dead_letter_subscription", &self.policy, || {
                    dead_letter_subscription.create(dead_letter_options.clone())
                })
                .await?;
                dead_letter_subscription
                    .set_iam_policy(IamRole::Subscriber, &self.client.service_identity())
                    .await?;
                info!(
                    subscription = %dead_letter_subscription_name,
                    "Granted broker identity subscribe rights on dead-letter subscription"
                );
            }
        }

        Ok(())
    }

    /// Attach the delivery event loop and return without blocking.
    ///
    /// Not re-entrant for the same subscription: a second call while the
    /// stream is running is an error.
    pub async fn start(&self, processor: Arc<MessageProcessor>) -> AppResult<()> {
        {
            let mut state = self.state.lock().await;
            if *state == StreamState::Started {
                return Err(AppError::broker(format!(
                    "subscription {} is already started",
                    self.subscription_name
                )));
            }
            *state = StreamState::Started;
        }

        let subscription = self
            .client
            .topic(&self.topic_name)
            .subscription(&self.subscription_name);
        let events = subscription.open().await?;
        info!(subscription = %self.subscription_name, "Subscription stream started");

        let subscription_name = self.subscription_name.clone();
        tokio::spawn(run_event_loop(
            subscription,
            subscription_name,
            events,
            processor,
        ));
        Ok(())
    }
}

#[derive(Default)]
struct PipelineCounters {
    handled: AtomicU64,
    skipped: AtomicU64,
    decode_failed: AtomicU64,
    handler_failed: AtomicU64,
}

impl PipelineCounters {
    fn record(&self, outcome: ProcessOutcome) {
        let counter = match outcome {
            ProcessOutcome::Handled => &self.handled,
            ProcessOutcome::Skipped => &self.skipped,
            ProcessOutcome::DecodeFailed => &self.decode_failed,
            ProcessOutcome::HandlerFailed => &self.handler_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn log_and_reset(&self, subscription: &str) {
        let handled = self.handled.swap(0, Ordering::Relaxed);
        let skipped = self.skipped.swap(0, Ordering::Relaxed);
        let decode_failed = self.decode_failed.swap(0, Ordering::Relaxed);
        let handler_failed = self.handler_failed.swap(0, Ordering::Relaxed);
        if handled + skipped + decode_failed + handler_failed > 0 {
            info!(
                subscription = %subscription,
                handled = handled,
                skipped = skipped,
                decode_failed = decode_failed,
                handler_failed = handler_failed,
                "Pipeline metrics (last 30s)"
            );
        }
    }
}

async fn run_event_loop(
    subscription: Arc<dyn SubscriptionHandle>,
    subscription_name: String,
    mut events: mpsc::UnboundedReceiver<SubscriptionEvent>,
    processor: Arc<MessageProcessor>,
) {
    let counters = Arc::new(PipelineCounters::default());
    let mut metrics_interval = tokio::time::interval(METRICS_LOG_INTERVAL);
    metrics_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SubscriptionEvent::Message(delivery)) => {
                    // deliveries are processed concurrently up to the
                    // broker's own flow-control limits
                    let processor = processor.clone();
                    let counters = counters.clone();
                    tokio::spawn(async move {
                        let outcome = processor.process(delivery).await;
                        counters.record(outcome);
                    });
                }
                Some(SubscriptionEvent::Error(e)) => {
                    error!(
                        subscription = %subscription_name,
                        error = %e,
                        "Transport error on subscription stream, reopening"
                    );
                    subscription.close().await.ok();
                    events = reopen(&subscription, &subscription_name).await;
                }
                None => {
                    warn!(
                        subscription = %subscription_name,
                        "Subscription stream ended, reopening"
                    );
                    events = reopen(&subscription, &subscription_name).await;
                }
            },
            _ = metrics_interval.tick() => {
                counters.log_and_reset(&subscription_name);
            }
        }
    }
}

/// Reopen the stream, retrying until the broker accepts. In-flight handler
/// continuations from the previous stream were dropped by the broker client;
/// unacked messages come back through redelivery.
async fn reopen(
    subscription: &Arc<dyn SubscriptionHandle>,
    subscription_name: &str,
) -> mpsc::UnboundedReceiver<SubscriptionEvent> {
    loop {
        match subscription.open().await {
            Ok(events) => {
                info!(subscription = %subscription_name, "Subscription stream reopened");
                return events;
            }
            Err(e) => {
                error!(
                    subscription = %subscription_name,
                    error = %e,
                    "Failed to reopen subscription stream, retrying"
                );
                tokio::time::sleep(REOPEN_RETRY_DELAY).await;
            }
        }
    }
}
