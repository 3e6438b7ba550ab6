//! State publishing.
//!
//! After each completed cycle the scheduler hands an [`OutboundEvent`] to a
//! [`StatePublisher`]. The transport to clients is out of scope; the
//! broadcast publisher is the fan-out point a WebSocket layer subscribes
//! to.

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::events::OutboundEvent;

/// Receives every completed cycle's event.
pub trait StatePublisher: Send + Sync {
    /// Publish one event. Must not block.
    fn publish(&self, event: &OutboundEvent);
}

/// Fans events out over a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<OutboundEvent>,
}

impl BroadcastPublisher {
    /// A channel that buffers up to `capacity` events per slow receiver.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// A new client subscription.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<OutboundEvent> {
        self.tx.subscribe()
    }

    /// Connected receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl StatePublisher for BroadcastPublisher {
    fn publish(&self, event: &OutboundEvent) {
        match self.tx.send(event.clone()) {
            Ok(receivers) => debug!(character = %event.character(), receivers, "event broadcast"),
            Err(_) => debug!(character = %event.character(), "no connected clients"),
        }
    }
}

/// Logs each event as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPublisher;

impl StatePublisher for LogPublisher {
    fn publish(&self, event: &OutboundEvent) {
        let json = event.to_json().unwrap_or_default();
        info!(character = %event.character(), event = %json, "agent update");
    }
}
