// ============================================================================
// Publisher
// ============================================================================
//
// Companion write path: payloads are validated and encoded against the
// latest schema revision, stamped with the revision id, and published under
// the uniform broker-write backoff policy.
//
// ============================================================================

use crate::broker::TopicHandle;
use crate::lifecycle::{call_with_backoff, BackoffPolicy};
use crate::schema::RevisionCache;
use carrier_error::AppResult;
use carrier_types::ATTR_SCHEMA_REVISION_ID;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Schema-validated publisher for one topic
pub struct Publisher {
    topic: Arc<dyn TopicHandle>,
    cache: Arc<RevisionCache>,
    policy: BackoffPolicy,
}

impl Publisher {
    pub fn new(topic: Arc<dyn TopicHandle>, cache: Arc<RevisionCache>) -> Self {
        Self {
            topic,
            cache,
            policy: BackoffPolicy::broker_write(),
        }
    }

    /// Encode and publish a payload; returns the broker-assigned message id.
    ///
    /// The payload is validated against the latest schema revision, and the
    /// revision id is stamped into the message attributes so consumers
    /// resolve the matching decoder.
    pub async fn publish(
        &self,
        payload: &serde_json::Value,
        mut attributes: HashMap<String, String>,
    ) -> AppResult<String> {
        let decoder = self.cache.latest().await?;
        let data = decoder.encode(payload)?;
        attributes.insert(
            ATTR_SCHEMA_REVISION_ID.to_string(),
            decoder.revision_id.clone(),
        );

        let message_id = call_with_backoff("publish_message", &self.policy, || {
            self.topic.publish_message(data.clone(), attributes.clone())
        })
        .await?;

        debug!(
            message_id = %message_id,
            topic = %self.topic.name(),
            revision_id = %decoder.revision_id,
            "Message published"
        );
        Ok(message_id)
    }
}
