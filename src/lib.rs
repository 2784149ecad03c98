//! # Carrier
//!
//! Consumer-side processing pipeline for a publish/subscribe message broker.
//!
//! A raw delivered message becomes a decoded, exactly-once-processed business
//! event: payloads are decoded through a revision-aware schema cache, gated
//! through either a TTL idempotency cache or a transactional task ledger,
//! handed to an injected handler, and acknowledged or negatively acknowledged
//! based on the outcome. Broker-side topic/subscription/dead-letter resources
//! are reconciled idempotently at startup, and logical subscriptions are
//! spread over a bounded pool of broker client connections.
//!
//! The broker transport, schema registry, transactional store, and
//! idempotency cache are collaborators behind traits; in-process
//! implementations back the test suite and local runs.

pub mod broker;
pub mod lifecycle;
pub mod pipeline;
pub mod pool;
pub mod publisher;
pub mod schema;
pub mod task;
pub mod utils;

pub use carrier_error::{AppError, AppResult};
