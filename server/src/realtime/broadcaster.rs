use std::sync::Arc;

use tracing::{debug, error};

use super::events::{DomainEvent, Scope};
use super::registry::ConnectionRegistry;

/// Best-effort, non-durable fan-out. Nothing is queued for absent subscribers.
///
/// A multi-instance deployment would implement this over a shared pub/sub
/// layer; handlers only see the trait.
pub trait Broadcaster: Send + Sync {
    /// Returns how many connections the event was handed to.
    fn publish_many(&self, scopes: &[Scope], event: &DomainEvent) -> usize;

    fn publish(&self, scope: Scope, event: &DomainEvent) -> usize {
        self.publish_many(&[scope], event)
    }
}

pub struct LocalBroadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl LocalBroadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }
}

impl Broadcaster for LocalBroadcaster {
    fn publish_many(&self, scopes: &[Scope], event: &DomainEvent) -> usize {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, kind = event.kind(), "Failed to encode socket event");
                return 0;
            }
        };

        let delivered = self.registry.deliver(scopes, &payload);
        debug!(
            kind = event.kind(),
            event_id = %event.event_id(),
            delivered,
            "Published socket event"
        );
        delivered
    }
}
