use crate::schema::RevisionCache;
use carrier_error::AppResult;
use carrier_types::{
    DecodedEvent, Message, ATTR_OPTIONAL_ARRAY_FIELDS, ATTR_PRESERVE_NULL_FIELDS,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Decodes raw payloads into events using the revision cache
pub struct EventDecoder {
    cache: Arc<RevisionCache>,
}

impl EventDecoder {
    pub fn new(cache: Arc<RevisionCache>) -> Self {
        Self { cache }
    }

    /// Decode one delivered message.
    ///
    /// The revision attribute selects the decoder; without one the latest
    /// revision is used. After decoding, attribute-driven repairs normalize
    /// the payload shape.
    pub async fn decode(&self, message: &Message) -> AppResult<DecodedEvent> {
        let decoder = match message.schema_revision_id() {
            Some(revision_id) => self.cache.resolve(revision_id).await?,
            None => self.cache.latest().await?,
        };
        let mut payload = decoder.decode(&message.payload)?;
        repair_payload(&mut payload, &message.attributes);
        Ok(DecodedEvent {
            payload,
            schema_revision_id: Some(decoder.revision_id.clone()),
        })
    }
}

/// Normalize a decoded payload according to the repair attributes:
/// fields named in the optional-array list decode `null` as `[]`, and null
/// fields are dropped unless named in the preserve-null list.
pub fn repair_payload(payload: &mut Value, attributes: &HashMap<String, String>) {
    let Value::Object(object) = payload else {
        return;
    };

    for field in attribute_list(attributes, ATTR_OPTIONAL_ARRAY_FIELDS) {
        if let Some(value) = object.get_mut(field) {
            if value.is_null() {
                *value = Value::Array(Vec::new());
            }
        }
    }

    let preserve: Vec<&str> = attribute_list(attributes, ATTR_PRESERVE_NULL_FIELDS).collect();
    object.retain(|field, value| !value.is_null() || preserve.contains(&field.as_str()));
}

fn attribute_list<'a>(
    attributes: &'a HashMap<String, String>,
    key: &str,
) -> impl Iterator<Item = &'a str> {
    attributes
        .get(key)
        .map(String::as_str)
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|field| !field.is_empty())
}
