use std::sync::Arc;
use std::time::Duration;

use shared::clock::Clock;
use shared::models::events::MatchmakingEvent;
use shared::models::policy::MatchPolicy;
use shared::models::queue::{BucketKey, QueueEntry};
use shared::models::schedule::ScheduleStatus;
use shared::repositories::{NotificationRepository, QueueRepository, ScheduleRepository};
use tracing::{debug, error, info, warn};

use crate::services::errors::MatchmakingServiceError;

/// Cancels entries that waited longer than the wait budget. The
/// `searching -> cancelled` swap decides the race against the worker: only
/// the winner's outcome is ever reported to the user.
#[derive(Clone)]
pub struct TimeoutSweeper {
    queue: Arc<dyn QueueRepository + Send + Sync>,
    schedules: Arc<dyn ScheduleRepository + Send + Sync>,
    notifications: Arc<dyn NotificationRepository + Send + Sync>,
    clock: Arc<dyn Clock>,
    policy: MatchPolicy,
    interval: Duration,
}

impl TimeoutSweeper {
    pub fn new(
        queue: Arc<dyn QueueRepository + Send + Sync>,
        schedules: Arc<dyn ScheduleRepository + Send + Sync>,
        notifications: Arc<dyn NotificationRepository + Send + Sync>,
        clock: Arc<dyn Clock>,
        policy: MatchPolicy,
        interval: Duration,
    ) -> Self {
        TimeoutSweeper {
            queue,
            schedules,
            notifications,
            clock,
            policy,
            interval,
        }
    }

    pub async fn run(&self) {
        info!("Timeout sweeper started, scanning every {:?}", self.interval);

        loop {
            match self.sweep_once().await {
                Ok(expired) if !expired.is_empty() => {
                    info!("Timed out {} waiting schedule(s)", expired.len())
                }
                Ok(_) => {}
                Err(e) => error!("Timeout sweep failed: {}", e),
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    /// Scans every bucket once and returns the entries this sweep timed out.
    /// Entries claimed by a worker are scanned too, so an entry stranded by a
    /// dead worker still times out. A failure on one entry does not stop the
    /// scan.
    pub async fn sweep_once(&self) -> Result<Vec<QueueEntry>, MatchmakingServiceError> {
        let now = self.clock.now();
        let mut expired = Vec::new();

        for bucket in self.queue.buckets().await? {
            let entries = match self.queue.list(&bucket).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Skipping bucket {} in this sweep: {}", bucket, e);
                    continue;
                }
            };

            for entry in entries
                .into_iter()
                .filter(|entry| entry.is_expired(now, self.policy.wait_budget))
            {
                match self.expire(&bucket, &entry).await {
                    Ok(true) => expired.push(entry),
                    Ok(false) => {}
                    Err(e) => error!("Failed to time out schedule {}: {}", entry.schedule_id, e),
                }
            }
        }

        Ok(expired)
    }

    /// Returns `true` when this call moved the schedule to `cancelled`.
    pub async fn expire(
        &self,
        bucket: &BucketKey,
        entry: &QueueEntry,
    ) -> Result<bool, MatchmakingServiceError> {
        let removed = self.queue.remove(bucket, &entry.schedule_id).await?;

        let cancelled = self
            .schedules
            .compare_and_swap_status(
                &entry.schedule_id,
                ScheduleStatus::Searching,
                ScheduleStatus::Cancelled,
            )
            .await?;

        if !cancelled {
            debug!(
                "Schedule {} left searching before its timeout (removed from queue: {})",
                entry.schedule_id, removed
            );
            return Ok(false);
        }

        info!(
            "Schedule {} for {} waited past {}s; cancelled",
            entry.schedule_id,
            entry.user_id,
            self.policy.wait_budget.num_seconds()
        );

        let event = MatchmakingEvent::TimedOut {
            user_id: entry.user_id.clone(),
            schedule_id: entry.schedule_id.clone(),
        };
        if let Err(e) = self.notifications.publish(&event).await {
            error!(
                "Timeout for schedule {} was not delivered: {}",
                entry.schedule_id, e
            );
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use shared::clock::ManualClock;
    use shared::models::schedule::{InterviewMode, ScheduleRecord};
    use shared::repositories::memory::{
        InMemoryNotificationRepository, InMemoryQueueRepository, InMemoryScheduleRepository,
    };

    struct Harness {
        queue: Arc<InMemoryQueueRepository>,
        schedules: Arc<InMemoryScheduleRepository>,
        notifications: Arc<InMemoryNotificationRepository>,
        clock: Arc<ManualClock>,
        sweeper: TimeoutSweeper,
        bucket: BucketKey,
    }

    fn harness() -> Harness {
        let queue = Arc::new(InMemoryQueueRepository::new());
        let schedules = Arc::new(InMemoryScheduleRepository::new());
        let notifications = Arc::new(InMemoryNotificationRepository::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 10, 17, 9, 0, 0).unwrap(),
        ));
        let sweeper = TimeoutSweeper::new(
            queue.clone(),
            schedules.clone(),
            notifications.clone(),
            clock.clone(),
            MatchPolicy::default(),
            Duration::from_secs(5),
        );
        Harness {
            queue,
            schedules,
            notifications,
            clock,
            sweeper,
            bucket: BucketKey::from_category("technical").unwrap(),
        }
    }

    impl Harness {
        async fn enqueue(&self, schedule_id: &str, user_id: &str) {
            self.schedules.insert_schedule(ScheduleRecord {
                schedule_id: schedule_id.to_string(),
                owner_user_id: user_id.to_string(),
                scheduled_time: self.clock.now(),
                interview_category: "technical".to_string(),
                interview_mode: InterviewMode::PeerToPeer,
                status: ScheduleStatus::Searching,
                match_id: None,
            });
            self.queue
                .push_back(
                    &self.bucket,
                    &QueueEntry::new(user_id, schedule_id, self.clock.now()),
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_entry_within_budget_is_kept() {
        let h = harness();
        h.enqueue("s1", "alice").await;
        h.clock.advance(ChronoDuration::seconds(119));

        let expired = h.sweeper.sweep_once().await.unwrap();

        assert!(expired.is_empty());
        assert_eq!(h.queue.list(&h.bucket).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_cancelled_and_announced() {
        let h = harness();
        let mut events = h.notifications.subscribe();
        h.enqueue("s1", "alice").await;
        h.clock.advance(ChronoDuration::seconds(120));

        let expired = h.sweeper.sweep_once().await.unwrap();

        assert_eq!(expired.len(), 1);
        assert!(h.queue.list(&h.bucket).await.unwrap().is_empty());
        assert_eq!(h.schedules.status_of("s1"), Some(ScheduleStatus::Cancelled));
        assert_eq!(
            events.recv().await.unwrap(),
            MatchmakingEvent::TimedOut {
                user_id: "alice".to_string(),
                schedule_id: "s1".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_matched_schedule_is_not_timed_out() {
        let h = harness();
        let mut events = h.notifications.subscribe();
        h.enqueue("s1", "alice").await;
        h.schedules
            .compare_and_swap_status("s1", ScheduleStatus::Searching, ScheduleStatus::Matched)
            .await
            .unwrap();
        h.clock.advance(ChronoDuration::minutes(10));

        let expired = h.sweeper.sweep_once().await.unwrap();

        assert!(expired.is_empty());
        assert_eq!(h.schedules.status_of("s1"), Some(ScheduleStatus::Matched));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_expire_twice_reports_once() {
        let h = harness();
        h.enqueue("s1", "alice").await;
        let entry = h.queue.list(&h.bucket).await.unwrap().remove(0);

        assert!(h.sweeper.expire(&h.bucket, &entry).await.unwrap());
        assert!(!h.sweeper.expire(&h.bucket, &entry).await.unwrap());
    }
}
