pub mod errors;
pub mod memory;
pub mod notification_repository;
pub mod queue_repository;
pub mod schedule_repository;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

pub use notification_repository::NotificationRepository;
pub use queue_repository::QueueRepository;
pub use schedule_repository::ScheduleRepository;

use crate::clock::SystemClock;
use crate::config::{MatchmakingConfig, StorageBackend};
use memory::{InMemoryNotificationRepository, InMemoryQueueRepository, InMemoryScheduleRepository};
use notification_repository::DynamoDbNotificationRepository;
use queue_repository::DynamoDbQueueRepository;
use schedule_repository::DynamoDbScheduleRepository;

/// The three stores every matchmaking process talks to.
#[derive(Clone)]
pub struct Repositories {
    pub queue: Arc<dyn QueueRepository + Send + Sync>,
    pub schedules: Arc<dyn ScheduleRepository + Send + Sync>,
    pub notifications: Arc<dyn NotificationRepository + Send + Sync>,
    event_poller: Option<Arc<DynamoDbNotificationRepository>>,
}

impl Repositories {
    pub async fn connect(config: &MatchmakingConfig) -> Self {
        match &config.storage {
            StorageBackend::Memory => {
                info!("Using in-memory matchmaking stores");
                Self::in_memory(
                    Arc::new(InMemoryQueueRepository::with_clock(
                        Arc::new(SystemClock),
                        config.worker.claim_lease,
                    )),
                    Arc::new(InMemoryScheduleRepository::new()),
                    Arc::new(InMemoryNotificationRepository::new()),
                )
            }
            StorageBackend::DynamoDb(tables) => {
                let aws_config = aws_config::load_from_env().await;
                let client = aws_sdk_dynamodb::Client::new(&aws_config);

                info!(
                    "Using DynamoDB stores: schedules={}, matches={}, queue={}, events={}",
                    tables.schedules_table,
                    tables.matches_table,
                    tables.queue_table,
                    tables.events_table
                );

                let notifications = Arc::new(DynamoDbNotificationRepository::new(
                    client.clone(),
                    &tables.events_table,
                    config.worker.events_poll_interval,
                ));

                Self {
                    queue: Arc::new(DynamoDbQueueRepository::new(
                        client.clone(),
                        &tables.queue_table,
                        config.worker.queue_poll_interval,
                        config.worker.claim_lease,
                    )),
                    schedules: Arc::new(DynamoDbScheduleRepository::new(
                        client,
                        &tables.schedules_table,
                        &tables.matches_table,
                    )),
                    notifications: notifications.clone(),
                    event_poller: Some(notifications),
                }
            }
        }
    }

    pub fn new(
        queue: Arc<dyn QueueRepository + Send + Sync>,
        schedules: Arc<dyn ScheduleRepository + Send + Sync>,
        notifications: Arc<dyn NotificationRepository + Send + Sync>,
    ) -> Self {
        Self {
            queue,
            schedules,
            notifications,
            event_poller: None,
        }
    }

    pub fn in_memory(
        queue: Arc<InMemoryQueueRepository>,
        schedules: Arc<InMemoryScheduleRepository>,
        notifications: Arc<InMemoryNotificationRepository>,
    ) -> Self {
        Self::new(queue, schedules, notifications)
    }

    /// Starts forwarding topic events to local subscribers. Only processes
    /// that hold client connections need this; the in-memory topic delivers
    /// directly.
    pub fn start_event_poller(&self) -> Option<JoinHandle<()>> {
        self.event_poller.clone().map(|poller| {
            tokio::spawn(async move {
                poller.run_poller().await;
            })
        })
    }
}
