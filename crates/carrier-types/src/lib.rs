//! # Carrier Types
//!
//! Shared message envelope types for the carrier consumer pipeline.

mod message;

pub use message::{
    DecodedEvent, Message, MessageInfo, ATTR_IDEMPOTENCY_KEY, ATTR_OPTIONAL_ARRAY_FIELDS,
    ATTR_PRESERVE_NULL_FIELDS, ATTR_SCHEMA_REVISION_ID,
};
