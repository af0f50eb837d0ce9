use std::collections::HashMap;

use shared::models::events::{ClientEvent, Delivery};
use shared::models::queue::BucketKey;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Write side of one live client connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub connection_id: String,
    sender: mpsc::UnboundedSender<ClientEvent>,
}

impl ConnectionHandle {
    pub fn new(sender: mpsc::UnboundedSender<ClientEvent>) -> Self {
        Self {
            connection_id: Uuid::new_v4().to_string(),
            sender,
        }
    }

    /// Returns `false` when the connection has already gone away.
    pub fn send(&self, event: ClientEvent) -> bool {
        self.sender.send(event).is_ok()
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionRegistryEntry {
    pub schedule_id: String,
    pub bucket: BucketKey,
    pub connection: ConnectionHandle,
}

/// Process-local map from user id to the searches this process holds a
/// connection for. A user may search with several schedules at once.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: RwLock<HashMap<String, Vec<ConnectionRegistryEntry>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any previous entry for the same schedule.
    pub async fn register(&self, user_id: &str, entry: ConnectionRegistryEntry) {
        let mut entries = self.entries.write().await;
        let held = entries.entry(user_id.to_string()).or_default();
        held.retain(|existing| existing.schedule_id != entry.schedule_id);
        held.push(entry);
    }

    pub async fn unregister(
        &self,
        user_id: &str,
        schedule_id: &str,
    ) -> Option<ConnectionRegistryEntry> {
        let mut entries = self.entries.write().await;
        let held = entries.get_mut(user_id)?;
        let position = held.iter().position(|e| e.schedule_id == schedule_id)?;
        let removed = held.remove(position);
        if held.is_empty() {
            entries.remove(user_id);
        }
        Some(removed)
    }

    /// Removes every entry held by `connection_id`, returning them with their
    /// user ids.
    pub async fn remove_connection(
        &self,
        connection_id: &str,
    ) -> Vec<(String, ConnectionRegistryEntry)> {
        let mut entries = self.entries.write().await;
        let mut removed = Vec::new();

        entries.retain(|user_id, held| {
            let (dropped, kept): (Vec<_>, Vec<_>) = held
                .drain(..)
                .partition(|e| e.connection.connection_id == connection_id);
            removed.extend(dropped.into_iter().map(|e| (user_id.clone(), e)));
            *held = kept;
            !held.is_empty()
        });

        removed
    }

    /// Sends the event to the holder of `(user_id, schedule_id)` and drops the
    /// entry. Returns `false` when this process holds no such entry.
    pub async fn deliver(&self, delivery: &Delivery) -> bool {
        let Some(entry) = self
            .unregister(&delivery.user_id, &delivery.schedule_id)
            .await
        else {
            return false;
        };

        if !entry.connection.send(delivery.event.clone()) {
            debug!(
                "Connection {} closed before event for schedule {} arrived",
                entry.connection.connection_id, delivery.schedule_id
            );
        }
        true
    }

    pub async fn contains(&self, user_id: &str, schedule_id: &str) -> bool {
        self.entries
            .read()
            .await
            .get(user_id)
            .is_some_and(|held| held.iter().any(|e| e.schedule_id == schedule_id))
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(schedule_id: &str, connection: &ConnectionHandle) -> ConnectionRegistryEntry {
        ConnectionRegistryEntry {
            schedule_id: schedule_id.to_string(),
            bucket: BucketKey::from_category("technical").unwrap(),
            connection: connection.clone(),
        }
    }

    #[tokio::test]
    async fn test_user_can_hold_several_searches() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let connection = ConnectionHandle::new(tx);

        registry.register("alice", entry("s1", &connection)).await;
        registry.register("alice", entry("s2", &connection)).await;

        assert_eq!(registry.len().await, 2);
        assert!(registry.contains("alice", "s1").await);
        assert!(registry.contains("alice", "s2").await);
    }

    #[tokio::test]
    async fn test_deliver_sends_once_and_drops_entry() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = ConnectionHandle::new(tx);
        registry.register("alice", entry("s1", &connection)).await;
        let delivery = Delivery {
            user_id: "alice".to_string(),
            schedule_id: "s1".to_string(),
            event: ClientEvent::Timeout {
                schedule_id: "s1".to_string(),
            },
        };

        assert!(registry.deliver(&delivery).await);
        assert!(!registry.deliver(&delivery).await);

        assert_eq!(rx.recv().await, Some(delivery.event.clone()));
        assert!(rx.try_recv().is_err());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_deliver_ignores_other_processes_users() {
        let registry = ConnectionRegistry::new();
        let delivery = Delivery {
            user_id: "bob".to_string(),
            schedule_id: "s9".to_string(),
            event: ClientEvent::Pong,
        };

        assert!(!registry.deliver(&delivery).await);
    }

    #[tokio::test]
    async fn test_remove_connection_only_touches_that_connection() {
        let registry = ConnectionRegistry::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        let first = ConnectionHandle::new(tx1);
        let second = ConnectionHandle::new(tx2);
        registry.register("alice", entry("s1", &first)).await;
        registry.register("alice", entry("s2", &second)).await;
        registry.register("bob", entry("s3", &first)).await;

        let mut removed: Vec<_> = registry
            .remove_connection(&first.connection_id)
            .await
            .into_iter()
            .map(|(user, e)| (user, e.schedule_id))
            .collect();
        removed.sort();

        assert_eq!(
            removed,
            vec![
                ("alice".to_string(), "s1".to_string()),
                ("bob".to_string(), "s3".to_string())
            ]
        );
        assert!(registry.contains("alice", "s2").await);
        assert_eq!(registry.len().await, 1);
    }
}
