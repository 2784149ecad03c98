// ============================================================================
// Connection Pool Allocator
// ============================================================================
//
// Spreads logical subscriptions across broker client connections under a
// hard per-client stream budget. The budget is monotonic for the process
// lifetime: stopped subscriptions do not return their streams, which is
// acceptable because subscription count is fixed at startup in the target
// deployment model.
//
// ============================================================================

use crate::broker::BrokerClient;
use carrier_config::{DEFAULT_SUBSCRIPTION_STREAMS, MAX_CLIENT_STREAMS};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Creates a fresh broker client connection
pub type ClientFactory = Box<dyn Fn() -> Arc<dyn BrokerClient> + Send + Sync>;

struct PoolState {
    client: Arc<dyn BrokerClient>,
    committed_streams: u32,
}

/// Hands out broker clients while keeping each client under the hard
/// stream budget
pub struct ConnectionPool {
    factory: ClientFactory,
    max_streams: u32,
    default_streams: u32,
    state: Mutex<PoolState>,
}

impl ConnectionPool {
    pub fn new(factory: ClientFactory) -> Self {
        Self::with_limits(factory, MAX_CLIENT_STREAMS, DEFAULT_SUBSCRIPTION_STREAMS)
    }

    pub fn with_limits(factory: ClientFactory, max_streams: u32, default_streams: u32) -> Self {
        let client = factory();
        Self {
            factory,
            max_streams,
            default_streams,
            state: Mutex::new(PoolState {
                client,
                committed_streams: 0,
            }),
        }
    }

    /// Allocate stream budget for one subscription and return the client to
    /// attach it to.
    ///
    /// Reuses the current client while the budget holds; otherwise starts a
    /// brand-new client and resets the running total to this request.
    pub fn allocate(&self, requested_streams: Option<u32>) -> Arc<dyn BrokerClient> {
        let requested = requested_streams.unwrap_or(self.default_streams);
        let mut state = self.state.lock().expect("connection pool lock poisoned");

        if state.committed_streams + requested <= self.max_streams {
            state.committed_streams += requested;
            debug!(
                committed_streams = state.committed_streams,
                requested = requested,
                "Stream budget allocated on current client"
            );
            return state.client.clone();
        }

        warn!(
            committed_streams = state.committed_streams,
            requested = requested,
            max_streams = self.max_streams,
            "Per-client stream budget reached, starting a new broker client"
        );
        state.client = (self.factory)();
        state.committed_streams = requested;
        state.client.clone()
    }

    /// Streams committed against the current client
    pub fn committed_streams(&self) -> u32 {
        self.state
            .lock()
            .expect("connection pool lock poisoned")
            .committed_streams
    }
}
