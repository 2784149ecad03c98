// ============================================================================
// Message Processing Pipeline
// ============================================================================
//
// Per delivered message: decode → idempotency gate → handler →
// acknowledge/negative-acknowledge → log. All failures here are contained
// to the single message's settlement; nothing escapes to the stream.
//
// ============================================================================

mod decode;
mod handler;
mod idempotency;

pub use decode::{repair_payload, EventDecoder};
pub use handler::{Handling, MessageHandler, StoreIdempotentHandler};
pub use idempotency::{
    attribute_key_extractor, CachedIdempotentHandler, IdempotencyStore, KeyExtractor,
    MemoryIdempotencyStore, RedisIdempotencyStore,
};

use crate::broker::DeliveredMessage;
use carrier_types::MessageInfo;
use std::sync::Arc;
use tracing::{debug, error};

/// How one delivery was settled.
///
/// Decode and handler failures negative-acknowledge for redelivery;
/// everything else acknowledges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Decoded, handled, acknowledged
    Handled,
    /// Recognized as a duplicate, acknowledged without running the handler
    Skipped,
    /// Payload could not be decoded; negative-acknowledged
    DecodeFailed,
    /// Handler returned an error; negative-acknowledged
    HandlerFailed,
}

/// Drives one delivered message through decode, handling, and settlement
pub struct MessageProcessor {
    decoder: EventDecoder,
    handler: Arc<dyn MessageHandler>,
}

impl MessageProcessor {
    pub fn new(decoder: EventDecoder, handler: Arc<dyn MessageHandler>) -> Self {
        Self { decoder, handler }
    }

    /// Process a single delivery end to end.
    ///
    /// Never returns an error: every failure is settled on the message
    /// itself and reported through the outcome.
    pub async fn process(&self, delivery: DeliveredMessage) -> ProcessOutcome {
        let message_id = delivery.message.id.clone();

        if let Err(e) = delivery.message.validate() {
            error!(message_id = %message_id, error = %e, "Malformed delivery envelope");
            settle_nack(delivery, &message_id).await;
            return ProcessOutcome::DecodeFailed;
        }

        let event = match self.decoder.decode(&delivery.message).await {
            Ok(event) => event,
            Err(e) => {
                error!(
                    message_id = %message_id,
                    error = %e,
                    "Failed to decode message payload"
                );
                settle_nack(delivery, &message_id).await;
                return ProcessOutcome::DecodeFailed;
            }
        };

        let info = MessageInfo::from(&delivery.message);
        match self.handler.handle(event, &info).await {
            Ok(handling) => {
                if let Err(e) = delivery.ack().await {
                    error!(message_id = %message_id, error = %e, "Failed to acknowledge message");
                }
                match handling {
                    Handling::Handled => {
                        debug!(message_id = %message_id, "Message handled and acknowledged");
                        ProcessOutcome::Handled
                    }
                    Handling::Skipped => {
                        debug!(
                            message_id = %message_id,
                            "Duplicate delivery acknowledged without handling"
                        );
                        ProcessOutcome::Skipped
                    }
                }
            }
            Err(e) => {
                error!(
                    message_id = %message_id,
                    delivery_attempt = info.delivery_attempt,
                    error = %e,
                    "Handler failed, message will be redelivered"
                );
                settle_nack(delivery, &message_id).await;
                ProcessOutcome::HandlerFailed
            }
        }
    }
}

async fn settle_nack(delivery: DeliveredMessage, message_id: &str) {
    if let Err(e) = delivery.nack().await {
        error!(message_id = %message_id, error = %e, "Failed to negative-acknowledge message");
    }
}
