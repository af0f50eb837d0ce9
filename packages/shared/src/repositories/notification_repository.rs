use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::events::MatchmakingEvent;
use crate::repositories::errors::notification_repository_errors::NotificationRepositoryError;

pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Broadcast topic for match, timeout and cancel events. Every process that
/// holds client connections subscribes; any worker may publish.
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn publish(&self, event: &MatchmakingEvent) -> Result<(), NotificationRepositoryError>;

    /// Receives every event published after the call.
    fn subscribe(&self) -> broadcast::Receiver<MatchmakingEvent>;
}

/// Events are items under a single `topic` partition, sorted by `event_id`
/// (microsecond timestamp + random suffix) and expired through a TTL
/// attribute. `run_poller` reads forward and re-broadcasts locally.
pub struct DynamoDbNotificationRepository {
    client: Client,
    table_name: String,
    topic: String,
    poll_interval: Duration,
    lookback: chrono::Duration,
    retention: chrono::Duration,
    sender: broadcast::Sender<MatchmakingEvent>,
}

impl DynamoDbNotificationRepository {
    pub fn new(client: Client, table_name: &str, poll_interval: Duration) -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            client,
            table_name: table_name.to_string(),
            topic: "matchmaking-events".to_string(),
            poll_interval,
            lookback: chrono::Duration::seconds(5),
            retention: chrono::Duration::hours(1),
            sender,
        }
    }

    fn next_event_id() -> String {
        format!(
            "{:020}#{}",
            Utc::now().timestamp_micros(),
            Uuid::new_v4().simple()
        )
    }

    /// Polls the topic until the task is dropped. Re-reads a short window
    /// behind the newest event so publishers with slightly lagging clocks are
    /// not missed; ids already forwarded are skipped.
    pub async fn run_poller(&self) {
        let started = Utc::now().timestamp_micros();
        let lookback = self.lookback.num_microseconds().unwrap_or(5_000_000);
        let mut forwarded: HashMap<String, i64> = HashMap::new();

        info!("Polling event topic {} on {}", self.topic, self.table_name);

        loop {
            let now = Utc::now().timestamp_micros();
            let since = (now - lookback).max(started);

            match self.fetch_since(since).await {
                Ok(events) => {
                    for (event_id, event) in events {
                        if forwarded.contains_key(&event_id) {
                            continue;
                        }
                        forwarded.insert(event_id, now);
                        // No local subscribers is fine; nobody here holds a connection.
                        let _ = self.sender.send(event);
                    }
                }
                Err(e) => warn!("Failed to poll event topic {}: {}", self.topic, e),
            }

            forwarded.retain(|_, seen_at| now - *seen_at <= 2 * lookback);
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn fetch_since(
        &self,
        since_micros: i64,
    ) -> Result<Vec<(String, MatchmakingEvent)>, NotificationRepositoryError> {
        let mut events = Vec::new();
        let mut start_key = None;

        loop {
            let page = self
                .client
                .query()
                .table_name(&self.table_name)
                .key_condition_expression("topic = :topic AND event_id > :since")
                .expression_attribute_values(":topic", AttributeValue::S(self.topic.clone()))
                .expression_attribute_values(
                    ":since",
                    AttributeValue::S(format!("{:020}", since_micros)),
                )
                .consistent_read(true)
                .set_exclusive_start_key(start_key)
                .send()
                .await
                .map_err(|e| NotificationRepositoryError::DynamoDb(e.to_string()))?;

            for item in page.items.unwrap_or_default() {
                let (Some(AttributeValue::S(event_id)), Some(AttributeValue::S(payload))) =
                    (item.get("event_id"), item.get("payload"))
                else {
                    warn!("Skipping event item without id or payload");
                    continue;
                };

                match serde_json::from_str::<MatchmakingEvent>(payload) {
                    Ok(event) => events.push((event_id.clone(), event)),
                    Err(e) => warn!("Skipping malformed event {}: {}", event_id, e),
                }
            }

            start_key = page.last_evaluated_key;
            if start_key.is_none() {
                break;
            }
        }

        Ok(events)
    }
}

#[async_trait]
impl NotificationRepository for DynamoDbNotificationRepository {
    async fn publish(&self, event: &MatchmakingEvent) -> Result<(), NotificationRepositoryError> {
        let payload = serde_json::to_string(event)
            .map_err(|e| NotificationRepositoryError::Serialization(e.to_string()))?;
        let event_id = Self::next_event_id();
        let expires_at = (Utc::now() + self.retention).timestamp();

        self.client
            .put_item()
            .table_name(&self.table_name)
            .item("topic", AttributeValue::S(self.topic.clone()))
            .item("event_id", AttributeValue::S(event_id.clone()))
            .item("payload", AttributeValue::S(payload))
            .item("expires_at", AttributeValue::N(expires_at.to_string()))
            .send()
            .await
            .map_err(|e| NotificationRepositoryError::DynamoDb(e.to_string()))?;

        debug!("Published event {} to topic {}", event_id, self.topic);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<MatchmakingEvent> {
        self.sender.subscribe()
    }
}
