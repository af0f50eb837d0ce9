//! Process-local adapters for single-process deployments and tests. They keep
//! the same atomicity guarantees as the DynamoDB adapters: pops hand a claim
//! to one caller, status swaps and match creation happen under one lock.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Notify};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::models::events::MatchmakingEvent;
use crate::models::match_record::MatchRecord;
use crate::models::queue::{BucketKey, ClaimedEntry, QueueEntry};
use crate::models::schedule::{ScheduleRecord, ScheduleStatus};
use crate::repositories::errors::notification_repository_errors::NotificationRepositoryError;
use crate::repositories::errors::queue_repository_errors::QueueRepositoryError;
use crate::repositories::errors::schedule_repository_errors::ScheduleRepositoryError;
use crate::repositories::notification_repository::{
    NotificationRepository, EVENT_CHANNEL_CAPACITY,
};
use crate::repositories::queue_repository::QueueRepository;
use crate::repositories::schedule_repository::ScheduleRepository;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub const DEFAULT_CLAIM_LEASE: Duration = Duration::from_secs(30);

struct Slot {
    entry: QueueEntry,
    position: String,
    receipt: Option<String>,
    claimed_until: Option<DateTime<Utc>>,
}

impl Slot {
    fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.claimed_until.map_or(true, |until| until <= now)
    }

    fn is_held_by(&self, claim: &ClaimedEntry) -> bool {
        self.position == claim.position && self.receipt.as_deref() == Some(claim.receipt.as_str())
    }
}

#[derive(Default)]
struct QueueState {
    buckets: BTreeMap<BucketKey, VecDeque<Slot>>,
    next_position: u64,
}

impl QueueState {
    fn push_unclaimed(&mut self, bucket: &BucketKey, entry: QueueEntry) {
        self.next_position += 1;
        let position = format!("{:020}", self.next_position);
        self.buckets.entry(bucket.clone()).or_default().push_back(Slot {
            entry,
            position,
            receipt: None,
            claimed_until: None,
        });
    }

    fn take_claimed(&mut self, claim: &ClaimedEntry) -> Option<Slot> {
        let queue = self.buckets.get_mut(&claim.bucket)?;
        let index = queue.iter().position(|slot| slot.is_held_by(claim))?;
        queue.remove(index)
    }
}

pub struct InMemoryQueueRepository {
    state: Mutex<QueueState>,
    pushed: Notify,
    clock: Arc<dyn Clock>,
    claim_lease: chrono::Duration,
}

impl Default for InMemoryQueueRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQueueRepository {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock), DEFAULT_CLAIM_LEASE)
    }

    /// Claim leases are measured against `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>, claim_lease: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            pushed: Notify::new(),
            clock,
            claim_lease: chrono::Duration::milliseconds(claim_lease.as_millis() as i64),
        }
    }

    fn try_claim_any(&self, buckets: &[BucketKey]) -> Option<ClaimedEntry> {
        let now = self.clock.now();
        let mut state = lock(&self.state);

        for bucket in buckets {
            let Some(queue) = state.buckets.get_mut(bucket) else {
                continue;
            };
            if let Some(slot) = queue.iter_mut().find(|slot| slot.is_claimable(now)) {
                let receipt = Uuid::new_v4().to_string();
                slot.receipt = Some(receipt.clone());
                slot.claimed_until = Some(now + self.claim_lease);
                return Some(ClaimedEntry {
                    bucket: bucket.clone(),
                    entry: slot.entry.clone(),
                    position: slot.position.clone(),
                    receipt,
                });
            }
        }
        None
    }
}

#[async_trait]
impl QueueRepository for InMemoryQueueRepository {
    async fn push_back(
        &self,
        bucket: &BucketKey,
        entry: &QueueEntry,
    ) -> Result<(), QueueRepositoryError> {
        lock(&self.state).push_unclaimed(bucket, entry.clone());
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn pop_front(
        &self,
        bucket: &BucketKey,
    ) -> Result<Option<ClaimedEntry>, QueueRepositoryError> {
        Ok(self.try_claim_any(std::slice::from_ref(bucket)))
    }

    async fn pop_blocking(
        &self,
        buckets: &[BucketKey],
        timeout: Duration,
    ) -> Result<Option<ClaimedEntry>, QueueRepositoryError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // Register interest before looking so a push in between is not lost.
            let pushed = self.pushed.notified();
            tokio::pin!(pushed);
            pushed.as_mut().enable();

            if let Some(claim) = self.try_claim_any(buckets) {
                return Ok(Some(claim));
            }

            if tokio::time::timeout_at(deadline, pushed).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn acknowledge(&self, claim: &ClaimedEntry) -> Result<bool, QueueRepositoryError> {
        Ok(lock(&self.state).take_claimed(claim).is_some())
    }

    async fn requeue(&self, claim: &ClaimedEntry) -> Result<bool, QueueRepositoryError> {
        {
            let mut state = lock(&self.state);
            let Some(slot) = state.take_claimed(claim) else {
                return Ok(false);
            };
            state.push_unclaimed(&claim.bucket, slot.entry);
        }
        self.pushed.notify_waiters();
        Ok(true)
    }

    async fn remove(
        &self,
        bucket: &BucketKey,
        schedule_id: &str,
    ) -> Result<bool, QueueRepositoryError> {
        let mut state = lock(&self.state);
        let Some(queue) = state.buckets.get_mut(bucket) else {
            return Ok(false);
        };
        let before = queue.len();
        queue.retain(|slot| slot.entry.schedule_id != schedule_id);
        Ok(queue.len() != before)
    }

    async fn list(&self, bucket: &BucketKey) -> Result<Vec<QueueEntry>, QueueRepositoryError> {
        Ok(lock(&self.state)
            .buckets
            .get(bucket)
            .map(|queue| queue.iter().map(|slot| slot.entry.clone()).collect())
            .unwrap_or_default())
    }

    async fn buckets(&self) -> Result<Vec<BucketKey>, QueueRepositoryError> {
        Ok(lock(&self.state).buckets.keys().cloned().collect())
    }
}

#[derive(Default)]
struct ScheduleState {
    schedules: HashMap<String, ScheduleRecord>,
    matches: Vec<MatchRecord>,
}

#[derive(Default)]
pub struct InMemoryScheduleRepository {
    state: Mutex<ScheduleState>,
}

impl InMemoryScheduleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stands in for the scheduling service creating a record.
    pub fn insert_schedule(&self, record: ScheduleRecord) {
        lock(&self.state)
            .schedules
            .insert(record.schedule_id.clone(), record);
    }

    pub fn matches(&self) -> Vec<MatchRecord> {
        lock(&self.state).matches.clone()
    }

    pub fn status_of(&self, schedule_id: &str) -> Option<ScheduleStatus> {
        lock(&self.state)
            .schedules
            .get(schedule_id)
            .map(|record| record.status)
    }
}

#[async_trait]
impl ScheduleRepository for InMemoryScheduleRepository {
    async fn get_schedule(
        &self,
        schedule_id: &str,
    ) -> Result<ScheduleRecord, ScheduleRepositoryError> {
        lock(&self.state)
            .schedules
            .get(schedule_id)
            .cloned()
            .ok_or(ScheduleRepositoryError::NotFound)
    }

    async fn compare_and_swap_status(
        &self,
        schedule_id: &str,
        expected: ScheduleStatus,
        next: ScheduleStatus,
    ) -> Result<bool, ScheduleRepositoryError> {
        let mut state = lock(&self.state);
        match state.schedules.get_mut(schedule_id) {
            Some(record) if record.status == expected => {
                record.status = next;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn create_match(
        &self,
        a: &ScheduleRecord,
        b: &ScheduleRecord,
        room_name: &str,
        session_id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<MatchRecord, ScheduleRepositoryError> {
        let mut state = lock(&self.state);

        for schedule_id in [&a.schedule_id, &b.schedule_id] {
            match state.schedules.get(schedule_id) {
                Some(record) if record.status == ScheduleStatus::Searching => {}
                Some(_) => return Err(ScheduleRepositoryError::Conflict),
                None => return Err(ScheduleRepositoryError::NotFound),
            }
        }

        let record = MatchRecord::new(a, b, room_name, session_id, created_at);
        for schedule_id in [&a.schedule_id, &b.schedule_id] {
            if let Some(schedule) = state.schedules.get_mut(schedule_id) {
                schedule.status = ScheduleStatus::Matched;
                schedule.match_id = Some(record.match_id.clone());
            }
        }
        state.matches.push(record.clone());

        Ok(record)
    }

    async fn get_match(&self, match_id: &str) -> Result<MatchRecord, ScheduleRepositoryError> {
        lock(&self.state)
            .matches
            .iter()
            .find(|record| record.match_id == match_id)
            .cloned()
            .ok_or(ScheduleRepositoryError::NotFound)
    }
}

pub struct InMemoryNotificationRepository {
    sender: broadcast::Sender<MatchmakingEvent>,
}

impl Default for InMemoryNotificationRepository {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }
}

impl InMemoryNotificationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationRepository for InMemoryNotificationRepository {
    async fn publish(&self, event: &MatchmakingEvent) -> Result<(), NotificationRepositoryError> {
        // Nobody listening is a delivery miss, not a publish failure.
        let _ = self.sender.send(event.clone());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<MatchmakingEvent> {
        self.sender.subscribe()
    }
}
