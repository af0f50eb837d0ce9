use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shared::clock::Clock;
use shared::models::events::{ClientEvent, MatchmakingEvent};
use shared::models::policy::MatchPolicy;
use shared::models::queue::QueueEntry;
use shared::models::schedule::{InterviewMode, ScheduleRecord, ScheduleStatus};
use shared::repositories::{
    NotificationRepository, QueueRepository, Repositories, ScheduleRepository,
};
use shared::services::video_room_service::VideoRoomProvider;
use tracing::{error, info, warn};

use crate::registry::{ConnectionHandle, ConnectionRegistry, ConnectionRegistryEntry};
use crate::services::errors::queue_service_errors::QueueServiceError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSummary {
    pub match_id: String,
    pub room_name: String,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub schedule_id: String,
    pub status: ScheduleStatus,
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub match_summary: Option<MatchSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialResponse {
    pub credential: String,
    pub server_url: String,
    pub room_name: String,
}

/// Join, cancel and status operations on behalf of a caller. Owns the
/// caller-facing half of the matchmaking state machine: `pending ->
/// searching` on join and `searching -> cancelled` on cancel or disconnect.
pub struct QueueService {
    queue: Arc<dyn QueueRepository + Send + Sync>,
    schedules: Arc<dyn ScheduleRepository + Send + Sync>,
    notifications: Arc<dyn NotificationRepository + Send + Sync>,
    registry: Arc<ConnectionRegistry>,
    video_room: Arc<dyn VideoRoomProvider + Send + Sync>,
    clock: Arc<dyn Clock>,
    policy: MatchPolicy,
}

impl QueueService {
    pub fn new(
        repositories: &Repositories,
        registry: Arc<ConnectionRegistry>,
        video_room: Arc<dyn VideoRoomProvider + Send + Sync>,
        clock: Arc<dyn Clock>,
        policy: MatchPolicy,
    ) -> Self {
        QueueService {
            queue: repositories.queue.clone(),
            schedules: repositories.schedules.clone(),
            notifications: repositories.notifications.clone(),
            registry,
            video_room,
            clock,
            policy,
        }
    }

    /// Loads a schedule and hides other users' schedules behind `NotFound`.
    async fn owned_schedule(
        &self,
        user_id: &str,
        schedule_id: &str,
    ) -> Result<ScheduleRecord, QueueServiceError> {
        let schedule = self.schedules.get_schedule(schedule_id).await?;
        if !schedule.is_owned_by(user_id) {
            warn!(
                "User {} tried to use schedule {} owned by someone else",
                user_id, schedule_id
            );
            return Err(QueueServiceError::NotFound);
        }
        Ok(schedule)
    }

    /// Validates everything before mutating anything, then moves the schedule
    /// to `searching`, registers the connection, acknowledges the join on it
    /// and enqueues. `accepted` goes out before the entry becomes poppable,
    /// so it always precedes `match` on the connection. A failed push undoes
    /// the first two steps; the caller reports the error after `accepted`.
    pub async fn join_queue(
        &self,
        user_id: &str,
        schedule_id: &str,
        connection: &ConnectionHandle,
    ) -> Result<(), QueueServiceError> {
        let schedule = self.owned_schedule(user_id, schedule_id).await?;

        if schedule.status != ScheduleStatus::Pending {
            return Err(QueueServiceError::InvalidState(format!(
                "schedule is {}, expected pending",
                schedule.status
            )));
        }

        if schedule.interview_mode != InterviewMode::PeerToPeer {
            return Err(QueueServiceError::InvalidState(
                "schedule is not a peer-to-peer interview".to_string(),
            ));
        }

        let bucket = schedule.bucket_key().ok_or_else(|| {
            QueueServiceError::InvalidState("schedule has no usable interview category".to_string())
        })?;

        let now = self.clock.now();
        if !self.policy.within_join_window(schedule.scheduled_time, now) {
            return Err(QueueServiceError::InvalidState(format!(
                "joining is only allowed around {}",
                schedule.scheduled_time.to_rfc3339()
            )));
        }

        let swapped = self
            .schedules
            .compare_and_swap_status(schedule_id, ScheduleStatus::Pending, ScheduleStatus::Searching)
            .await?;
        if !swapped {
            return Err(QueueServiceError::InvalidState(
                "schedule changed state while joining".to_string(),
            ));
        }

        self.registry
            .register(
                user_id,
                ConnectionRegistryEntry {
                    schedule_id: schedule_id.to_string(),
                    bucket: bucket.clone(),
                    connection: connection.clone(),
                },
            )
            .await;
        connection.send(ClientEvent::Accepted {
            schedule_id: schedule_id.to_string(),
        });

        let entry = QueueEntry::new(user_id, schedule_id, now);
        if let Err(e) = self.queue.push_back(&bucket, &entry).await {
            error!(
                "Failed to enqueue schedule {} in bucket {}: {}",
                schedule_id, bucket, e
            );
            self.registry.unregister(user_id, schedule_id).await;
            match self
                .schedules
                .compare_and_swap_status(
                    schedule_id,
                    ScheduleStatus::Searching,
                    ScheduleStatus::Pending,
                )
                .await
            {
                Ok(true) => {}
                Ok(false) => warn!("Schedule {} moved on before rollback", schedule_id),
                Err(rollback) => error!(
                    "Failed to roll schedule {} back to pending: {}",
                    schedule_id, rollback
                ),
            }
            return Err(e.into());
        }

        info!(
            "User {} joined bucket {} with schedule {}",
            user_id, bucket, schedule_id
        );
        Ok(())
    }

    /// Stops a search. Returns whether this call performed the transition;
    /// `false` means the schedule had already left `searching`.
    pub async fn cancel_queue(
        &self,
        user_id: &str,
        schedule_id: &str,
    ) -> Result<bool, QueueServiceError> {
        let schedule = self.owned_schedule(user_id, schedule_id).await?;

        if let Some(bucket) = schedule.bucket_key() {
            self.queue.remove(&bucket, schedule_id).await?;
        }

        let cancelled = self
            .schedules
            .compare_and_swap_status(
                schedule_id,
                ScheduleStatus::Searching,
                ScheduleStatus::Cancelled,
            )
            .await?;
        if !cancelled {
            info!(
                "Cancel for schedule {} ignored; it is no longer searching",
                schedule_id
            );
            return Ok(false);
        }

        info!("User {} cancelled schedule {}", user_id, schedule_id);

        if let Some(entry) = self.registry.unregister(user_id, schedule_id).await {
            entry.connection.send(ClientEvent::Cancelled {
                schedule_id: schedule_id.to_string(),
            });
        }

        // Another process may hold the connection.
        let event = MatchmakingEvent::Cancelled {
            user_id: user_id.to_string(),
            schedule_id: schedule_id.to_string(),
        };
        if let Err(e) = self.notifications.publish(&event).await {
            warn!(
                "Cancellation of schedule {} was not broadcast: {}",
                schedule_id, e
            );
        }

        Ok(true)
    }

    /// Cleans up every search held by a closed connection. Returns the
    /// schedule ids this call cancelled.
    pub async fn disconnect(&self, connection_id: &str) -> Vec<String> {
        let mut cancelled = Vec::new();

        for (user_id, entry) in self.registry.remove_connection(connection_id).await {
            if let Err(e) = self.queue.remove(&entry.bucket, &entry.schedule_id).await {
                warn!(
                    "Failed to remove schedule {} from bucket {} on disconnect: {}",
                    entry.schedule_id, entry.bucket, e
                );
            }

            match self
                .schedules
                .compare_and_swap_status(
                    &entry.schedule_id,
                    ScheduleStatus::Searching,
                    ScheduleStatus::Cancelled,
                )
                .await
            {
                Ok(true) => {
                    info!(
                        "Cancelled schedule {} for {} after disconnect",
                        entry.schedule_id, user_id
                    );
                    cancelled.push(entry.schedule_id);
                }
                Ok(false) => {}
                Err(e) => error!(
                    "Failed to cancel schedule {} after disconnect: {}",
                    entry.schedule_id, e
                ),
            }
        }

        cancelled
    }

    pub async fn queue_status(
        &self,
        user_id: &str,
        schedule_id: &str,
    ) -> Result<QueueStatus, QueueServiceError> {
        let schedule = self.owned_schedule(user_id, schedule_id).await?;

        let match_summary = match (&schedule.status, &schedule.match_id) {
            (ScheduleStatus::Matched, Some(match_id)) => {
                let record = self.schedules.get_match(match_id).await?;
                Some(MatchSummary {
                    match_id: record.match_id,
                    room_name: record.room_name,
                    session_id: record.session_id,
                })
            }
            _ => None,
        };

        Ok(QueueStatus {
            schedule_id: schedule.schedule_id,
            status: schedule.status,
            match_summary,
        })
    }

    pub async fn reissue_credential(
        &self,
        user_id: &str,
        schedule_id: &str,
    ) -> Result<CredentialResponse, QueueServiceError> {
        let schedule = self.owned_schedule(user_id, schedule_id).await?;

        let match_id = match (&schedule.status, schedule.match_id) {
            (ScheduleStatus::Matched, Some(match_id)) => match_id,
            _ => {
                return Err(QueueServiceError::InvalidState(format!(
                    "schedule is {}, expected matched",
                    schedule.status
                )))
            }
        };

        let record = self.schedules.get_match(&match_id).await?;
        let credential = self
            .video_room
            .issue_credential(user_id, &record.room_name)
            .await?;

        info!(
            "Re-issued credential for {} in room {}",
            user_id, record.room_name
        );
        Ok(CredentialResponse {
            credential: credential.token,
            server_url: credential.server_url,
            room_name: record.room_name,
        })
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use shared::clock::ManualClock;
    use shared::models::events::Delivery;
    use shared::models::queue::{BucketKey, ClaimedEntry};
    use shared::models::video::VideoCredential;
    use shared::repositories::errors::queue_repository_errors::QueueRepositoryError;
    use shared::repositories::memory::{
        InMemoryNotificationRepository, InMemoryQueueRepository, InMemoryScheduleRepository,
    };
    use shared::services::errors::video_room_errors::VideoRoomError;
    use tokio::sync::mpsc;

    pub struct StaticVideoRoom;

    #[async_trait]
    impl VideoRoomProvider for StaticVideoRoom {
        async fn issue_credential(
            &self,
            identity: &str,
            room_name: &str,
        ) -> Result<VideoCredential, VideoRoomError> {
            Ok(VideoCredential {
                token: format!("{}@{}", identity, room_name),
                server_url: "wss://video.test".to_string(),
            })
        }
    }

    /// Queue whose pushes always fail.
    struct BrokenQueue;

    #[async_trait]
    impl QueueRepository for BrokenQueue {
        async fn push_back(
            &self,
            _bucket: &BucketKey,
            _entry: &QueueEntry,
        ) -> Result<(), QueueRepositoryError> {
            Err(QueueRepositoryError::DynamoDb("throttled".to_string()))
        }

        async fn pop_front(
            &self,
            _bucket: &BucketKey,
        ) -> Result<Option<ClaimedEntry>, QueueRepositoryError> {
            Ok(None)
        }

        async fn pop_blocking(
            &self,
            _buckets: &[BucketKey],
            _timeout: std::time::Duration,
        ) -> Result<Option<ClaimedEntry>, QueueRepositoryError> {
            Ok(None)
        }

        async fn acknowledge(&self, _claim: &ClaimedEntry) -> Result<bool, QueueRepositoryError> {
            Ok(false)
        }

        async fn requeue(&self, _claim: &ClaimedEntry) -> Result<bool, QueueRepositoryError> {
            Ok(false)
        }

        async fn remove(
            &self,
            _bucket: &BucketKey,
            _schedule_id: &str,
        ) -> Result<bool, QueueRepositoryError> {
            Ok(false)
        }

        async fn list(&self, _bucket: &BucketKey) -> Result<Vec<QueueEntry>, QueueRepositoryError> {
            Ok(Vec::new())
        }

        async fn buckets(&self) -> Result<Vec<BucketKey>, QueueRepositoryError> {
            Ok(Vec::new())
        }
    }

    /// Queue that hands every pushed entry straight to the registry as a
    /// match, as a worker plus dispatcher racing the join would.
    struct InstantMatchQueue {
        registry: Arc<ConnectionRegistry>,
    }

    #[async_trait]
    impl QueueRepository for InstantMatchQueue {
        async fn push_back(
            &self,
            _bucket: &BucketKey,
            entry: &QueueEntry,
        ) -> Result<(), QueueRepositoryError> {
            self.registry
                .deliver(&Delivery {
                    user_id: entry.user_id.clone(),
                    schedule_id: entry.schedule_id.clone(),
                    event: ClientEvent::Match {
                        match_id: "m1".to_string(),
                        session_id: "session-1".to_string(),
                        room_name: "room-1".to_string(),
                        schedule_id: entry.schedule_id.clone(),
                        credential: None,
                        server_url: None,
                    },
                })
                .await;
            Ok(())
        }

        async fn pop_front(
            &self,
            _bucket: &BucketKey,
        ) -> Result<Option<ClaimedEntry>, QueueRepositoryError> {
            Ok(None)
        }

        async fn pop_blocking(
            &self,
            _buckets: &[BucketKey],
            _timeout: std::time::Duration,
        ) -> Result<Option<ClaimedEntry>, QueueRepositoryError> {
            Ok(None)
        }

        async fn acknowledge(&self, _claim: &ClaimedEntry) -> Result<bool, QueueRepositoryError> {
            Ok(false)
        }

        async fn requeue(&self, _claim: &ClaimedEntry) -> Result<bool, QueueRepositoryError> {
            Ok(false)
        }

        async fn remove(
            &self,
            _bucket: &BucketKey,
            _schedule_id: &str,
        ) -> Result<bool, QueueRepositoryError> {
            Ok(false)
        }

        async fn list(&self, _bucket: &BucketKey) -> Result<Vec<QueueEntry>, QueueRepositoryError> {
            Ok(Vec::new())
        }

        async fn buckets(&self) -> Result<Vec<BucketKey>, QueueRepositoryError> {
            Ok(Vec::new())
        }
    }

    struct Harness {
        queue: Arc<InMemoryQueueRepository>,
        schedules: Arc<InMemoryScheduleRepository>,
        notifications: Arc<InMemoryNotificationRepository>,
        registry: Arc<ConnectionRegistry>,
        clock: Arc<ManualClock>,
        service: QueueService,
    }

    fn harness() -> Harness {
        let queue = Arc::new(InMemoryQueueRepository::new());
        let schedules = Arc::new(InMemoryScheduleRepository::new());
        let notifications = Arc::new(InMemoryNotificationRepository::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 10, 17, 10, 0, 0).unwrap(),
        ));
        let repositories =
            Repositories::in_memory(queue.clone(), schedules.clone(), notifications.clone());
        let service = QueueService::new(
            &repositories,
            registry.clone(),
            Arc::new(StaticVideoRoom),
            clock.clone(),
            MatchPolicy::default(),
        );
        Harness {
            queue,
            schedules,
            notifications,
            registry,
            clock,
            service,
        }
    }

    fn connection() -> (ConnectionHandle, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(tx), rx)
    }

    impl Harness {
        fn pending(&self, schedule_id: &str, user_id: &str) -> ScheduleRecord {
            let record = ScheduleRecord {
                schedule_id: schedule_id.to_string(),
                owner_user_id: user_id.to_string(),
                scheduled_time: self.clock.now(),
                interview_category: "Technical".to_string(),
                interview_mode: InterviewMode::PeerToPeer,
                status: ScheduleStatus::Pending,
                match_id: None,
            };
            self.schedules.insert_schedule(record.clone());
            record
        }

        fn bucket(&self) -> BucketKey {
            BucketKey::from_category("technical").unwrap()
        }
    }

    #[tokio::test]
    async fn test_join_enqueues_and_registers() {
        let h = harness();
        h.pending("s1", "alice");
        let (conn, mut rx) = connection();

        h.service.join_queue("alice", "s1", &conn).await.unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            ClientEvent::Accepted {
                schedule_id: "s1".to_string()
            }
        );
        assert_eq!(h.schedules.status_of("s1"), Some(ScheduleStatus::Searching));
        assert!(h.registry.contains("alice", "s1").await);
        let queued = h.queue.list(&h.bucket()).await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].enqueued_at, h.clock.now());
    }

    #[tokio::test]
    async fn test_join_unknown_or_foreign_schedule_is_not_found() {
        let h = harness();
        h.pending("s1", "alice");
        let (conn, _rx) = connection();

        assert_eq!(
            h.service.join_queue("alice", "nope", &conn).await,
            Err(QueueServiceError::NotFound)
        );
        assert_eq!(
            h.service.join_queue("mallory", "s1", &conn).await,
            Err(QueueServiceError::NotFound)
        );
        assert_eq!(h.schedules.status_of("s1"), Some(ScheduleStatus::Pending));
    }

    #[tokio::test]
    async fn test_join_rejects_invalid_states_without_side_effects() {
        let h = harness();
        let mut ai = h.pending("s1", "alice");
        ai.interview_mode = InterviewMode::Ai;
        h.schedules.insert_schedule(ai);
        let mut blank = h.pending("s2", "alice");
        blank.interview_category = "   ".to_string();
        h.schedules.insert_schedule(blank);
        let mut done = h.pending("s3", "alice");
        done.status = ScheduleStatus::Completed;
        h.schedules.insert_schedule(done);
        let mut reserved = h.pending("s4", "alice");
        reserved.interview_category = "#registry".to_string();
        h.schedules.insert_schedule(reserved);
        let (conn, mut rx) = connection();

        for schedule_id in ["s1", "s2", "s3", "s4"] {
            let result = h.service.join_queue("alice", schedule_id, &conn).await;
            assert!(matches!(result, Err(QueueServiceError::InvalidState(_))));
        }

        assert!(h.registry.is_empty().await);
        assert!(h.queue.buckets().await.unwrap().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_join_outside_window_is_rejected() {
        let h = harness();
        h.pending("s1", "alice");
        h.clock.advance(Duration::minutes(6));
        let (conn, _rx) = connection();

        let result = h.service.join_queue("alice", "s1", &conn).await;

        assert!(matches!(result, Err(QueueServiceError::InvalidState(_))));
        assert_eq!(h.schedules.status_of("s1"), Some(ScheduleStatus::Pending));
    }

    #[tokio::test]
    async fn test_second_join_of_same_schedule_is_rejected() {
        let h = harness();
        h.pending("s1", "alice");
        let (conn, _rx) = connection();
        h.service.join_queue("alice", "s1", &conn).await.unwrap();

        let result = h.service.join_queue("alice", "s1", &conn).await;

        assert!(matches!(result, Err(QueueServiceError::InvalidState(_))));
        assert_eq!(h.queue.list(&h.bucket()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_push_rolls_back() {
        let h = harness();
        h.pending("s1", "alice");
        let repositories = Repositories::new(
            Arc::new(BrokenQueue),
            h.schedules.clone(),
            h.notifications.clone(),
        );
        let service = QueueService::new(
            &repositories,
            h.registry.clone(),
            Arc::new(StaticVideoRoom),
            h.clock.clone(),
            MatchPolicy::default(),
        );
        let (conn, _rx) = connection();

        let result = service.join_queue("alice", "s1", &conn).await;

        assert!(matches!(result, Err(QueueServiceError::Downstream(_))));
        assert_eq!(h.schedules.status_of("s1"), Some(ScheduleStatus::Pending));
        assert!(h.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_accepted_precedes_an_immediate_match() {
        let h = harness();
        h.pending("s1", "alice");
        let repositories = Repositories::new(
            Arc::new(InstantMatchQueue {
                registry: h.registry.clone(),
            }),
            h.schedules.clone(),
            h.notifications.clone(),
        );
        let service = QueueService::new(
            &repositories,
            h.registry.clone(),
            Arc::new(StaticVideoRoom),
            h.clock.clone(),
            MatchPolicy::default(),
        );
        let (conn, mut rx) = connection();

        service.join_queue("alice", "s1", &conn).await.unwrap();

        assert!(matches!(rx.try_recv(), Ok(ClientEvent::Accepted { .. })));
        assert!(matches!(rx.try_recv(), Ok(ClientEvent::Match { .. })));
    }

    #[tokio::test]
    async fn test_cancel_removes_entry_and_notifies() {
        let h = harness();
        h.pending("s1", "alice");
        let (conn, mut rx) = connection();
        let mut events = h.notifications.subscribe();
        h.service.join_queue("alice", "s1", &conn).await.unwrap();

        assert!(h.service.cancel_queue("alice", "s1").await.unwrap());
        assert!(!h.service.cancel_queue("alice", "s1").await.unwrap());

        assert_eq!(h.schedules.status_of("s1"), Some(ScheduleStatus::Cancelled));
        assert!(h.queue.list(&h.bucket()).await.unwrap().is_empty());
        assert!(!h.registry.contains("alice", "s1").await);
        assert!(matches!(rx.recv().await, Some(ClientEvent::Accepted { .. })));
        assert_eq!(
            rx.recv().await,
            Some(ClientEvent::Cancelled {
                schedule_id: "s1".to_string()
            })
        );
        assert_eq!(
            events.recv().await.unwrap(),
            MatchmakingEvent::Cancelled {
                user_id: "alice".to_string(),
                schedule_id: "s1".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_disconnect_cancels_every_held_search() {
        let h = harness();
        h.pending("s1", "alice");
        h.pending("s2", "alice");
        let (conn, _rx) = connection();
        h.service.join_queue("alice", "s1", &conn).await.unwrap();
        h.service.join_queue("alice", "s2", &conn).await.unwrap();

        let mut cancelled = h.service.disconnect(&conn.connection_id).await;
        cancelled.sort();

        assert_eq!(cancelled, vec!["s1", "s2"]);
        assert!(h.queue.list(&h.bucket()).await.unwrap().is_empty());
        assert_eq!(h.schedules.status_of("s2"), Some(ScheduleStatus::Cancelled));
        assert!(h.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_status_and_credential_for_matched_schedule() {
        let h = harness();
        let mut a = h.pending("s1", "alice");
        let mut b = h.pending("s2", "bob");
        a.status = ScheduleStatus::Searching;
        b.status = ScheduleStatus::Searching;
        h.schedules.insert_schedule(a.clone());
        h.schedules.insert_schedule(b.clone());
        let record = h
            .schedules
            .create_match(&a, &b, "room-7", "session-7", h.clock.now())
            .await
            .unwrap();

        let status = h.service.queue_status("alice", "s1").await.unwrap();
        let credential = h.service.reissue_credential("alice", "s1").await.unwrap();

        assert_eq!(status.status, ScheduleStatus::Matched);
        assert_eq!(
            status.match_summary,
            Some(MatchSummary {
                match_id: record.match_id,
                room_name: "room-7".to_string(),
                session_id: "session-7".to_string(),
            })
        );
        assert_eq!(credential.room_name, "room-7");
        assert_eq!(credential.credential, "alice@room-7");
    }

    #[tokio::test]
    async fn test_credential_requires_matched_schedule() {
        let h = harness();
        h.pending("s1", "alice");

        let result = h.service.reissue_credential("alice", "s1").await;

        assert!(matches!(result, Err(QueueServiceError::InvalidState(_))));
        let status = h.service.queue_status("alice", "s1").await.unwrap();
        assert_eq!(status.status, ScheduleStatus::Pending);
        assert_eq!(status.match_summary, None);
    }
}
