use std::sync::Arc;

use shared::models::events::MatchmakingEvent;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::registry::ConnectionRegistry;

/// Forwards topic events to the connections this process holds. Events for
/// users connected elsewhere are ignored.
pub struct NotificationDispatcher {
    registry: Arc<ConnectionRegistry>,
    events: broadcast::Receiver<MatchmakingEvent>,
}

impl NotificationDispatcher {
    /// Takes a receiver rather than subscribing itself so callers can
    /// subscribe before anything is published.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        events: broadcast::Receiver<MatchmakingEvent>,
    ) -> Self {
        Self { registry, events }
    }

    pub async fn run(mut self) {
        info!("Notification dispatcher started");

        loop {
            match self.events.recv().await {
                Ok(event) => {
                    self.dispatch(&event).await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Notification dispatcher skipped {} events", skipped);
                }
                Err(RecvError::Closed) => {
                    info!("Event topic closed; dispatcher stopping");
                    break;
                }
            }
        }
    }

    /// Returns how many deliveries landed on a local connection.
    pub async fn dispatch(&self, event: &MatchmakingEvent) -> usize {
        let mut delivered = 0;
        for delivery in event.deliveries() {
            if self.registry.deliver(&delivery).await {
                debug!(
                    "Delivered {:?} to {} for schedule {}",
                    delivery.event, delivery.user_id, delivery.schedule_id
                );
                delivered += 1;
            }
        }
        delivered
    }
}
