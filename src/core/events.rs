//! Live routing event feed.
//!
//! Events are pushed over a `tokio::sync::broadcast` channel: delivery is
//! best-effort, ordering is emission order, and a slow or disconnected
//! subscriber only ever loses its own backlog; routing never blocks on it.
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::core::strategy::Algorithm;

/// One observable routing moment.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BalancerEvent {
    /// A request was routed to a backend.
    Request {
        timestamp: DateTime<Utc>,
        algorithm: Algorithm,
        server: String,
        method: String,
        path: String,
        client: String,
        connections: u64,
    },
    /// A routed request completed (or failed in transport).
    Response {
        timestamp: DateTime<Utc>,
        algorithm: Algorithm,
        server: String,
        response_time_ms: u64,
        success: bool,
    },
}

/// Broadcast fan-out for [`BalancerEvent`]s.
pub struct EventBus {
    tx: broadcast::Sender<BalancerEvent>,
}

impl EventBus {
    /// `capacity` bounds the per-subscriber backlog; lagging subscribers
    /// skip over dropped events.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BalancerEvent> {
        self.tx.subscribe()
    }

    /// Publish to whoever is listening. Having no subscribers is normal.
    pub fn publish(&self, event: BalancerEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
