use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ===== Well-known attribute keys =====

/// Attribute carrying the application-level idempotency key
pub const ATTR_IDEMPOTENCY_KEY: &str = "join_idempotency_key";

/// Attribute carrying the schema revision id the payload was encoded with
pub const ATTR_SCHEMA_REVISION_ID: &str = "schema_revision_id";

/// Attribute listing (comma-separated) fields that must decode to arrays;
/// a null value for a listed field is repaired to an empty array
pub const ATTR_OPTIONAL_ARRAY_FIELDS: &str = "optional_array_fields";

/// Attribute listing (comma-separated) fields whose explicit null values
/// are preserved instead of being dropped from the decoded payload
pub const ATTR_PRESERVE_NULL_FIELDS: &str = "preserve_null_fields";

/// A delivered message envelope.
///
/// Owned by the broker client for its lifetime; the pipeline only reads it
/// and issues ack/nack through the delivery handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Broker-assigned message id, unique per publish
    pub id: String,

    /// 1-based delivery attempt counter, incremented on redelivery
    pub delivery_attempt: u32,

    /// Wire attributes (idempotency key, schema revision, repair lists)
    pub attributes: HashMap<String, String>,

    /// Raw encoded payload bytes
    #[serde(with = "serde_bytes_base64")]
    pub payload: Vec<u8>,

    /// When the message was accepted by the broker
    pub publish_time: DateTime<Utc>,

    /// When this delivery reached the client
    pub received_time: DateTime<Utc>,
}

impl Message {
    /// Validate envelope structure
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            anyhow::bail!("message id is required");
        }
        if self.delivery_attempt == 0 {
            anyhow::bail!("delivery_attempt starts at 1");
        }
        Ok(())
    }

    /// The idempotency key attribute, if the publisher supplied one
    pub fn idempotency_key(&self) -> Option<&str> {
        self.attributes
            .get(ATTR_IDEMPOTENCY_KEY)
            .map(String::as_str)
    }

    /// The schema revision id attribute, if present
    pub fn schema_revision_id(&self) -> Option<&str> {
        self.attributes
            .get(ATTR_SCHEMA_REVISION_ID)
            .map(String::as_str)
    }
}

/// Delivery metadata handed to message handlers alongside the decoded event
#[derive(Debug, Clone)]
pub struct MessageInfo {
    pub id: String,
    pub delivery_attempt: u32,
    pub attributes: HashMap<String, String>,
    pub publish_time: DateTime<Utc>,
    pub received_time: DateTime<Utc>,
}

impl From<&Message> for MessageInfo {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            delivery_attempt: message.delivery_attempt,
            attributes: message.attributes.clone(),
            publish_time: message.publish_time,
            received_time: message.received_time,
        }
    }
}

/// A decoded business event.
///
/// Derived from a [`Message`], owned by one pipeline invocation and
/// discarded after handler completion.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    pub payload: serde_json::Value,
    pub schema_revision_id: Option<String>,
}

mod serde_bytes_base64 {
    //! Payload bytes serialize as base64 so envelopes stay printable in
    //! diagnostic output.

    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}
