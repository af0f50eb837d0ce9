use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use shared::config::WorkerSettings;
use shared::models::match_record::MatchRecord;
use shared::models::policy::MatchPolicy;
use shared::models::queue::{BucketKey, ClaimedEntry, QueueEntry};
use shared::models::schedule::{ScheduleRecord, ScheduleStatus};
use shared::repositories::errors::schedule_repository_errors::ScheduleRepositoryError;
use shared::repositories::{QueueRepository, ScheduleRepository};
use tracing::{debug, error, info, warn};

use crate::compatibility::{check_compatibility, Incompatibility};
use crate::services::errors::MatchmakingServiceError;
use crate::services::match_commit::MatchCommitter;

const REQUEUE_ATTEMPTS: u32 = 3;

/// What one worker iteration did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Nothing was waiting in any bucket.
    Idle,
    /// Only one entry was waiting in the bucket; it went back to the tail.
    LoneSearcher { bucket: BucketKey },
    /// Both popped entries belong to the same user.
    SelfMatch { user_id: String },
    /// Entries whose schedule is gone or no longer searching were dropped.
    Stale { discarded: Vec<String> },
    Incompatible(Incompatibility),
    /// Another writer changed a schedule first; surviving entries were re-queued.
    Conflict,
    Matched(MatchRecord),
}

impl TickOutcome {
    /// Outcomes that leave the bucket unchanged; retrying immediately would spin.
    pub fn should_back_off(&self) -> bool {
        matches!(
            self,
            TickOutcome::LoneSearcher { .. }
                | TickOutcome::SelfMatch { .. }
                | TickOutcome::Incompatible(_)
        )
    }
}

enum PairState {
    Ready(ScheduleRecord, ScheduleRecord),
    Stale(Vec<String>),
}

#[derive(Clone)]
pub struct MatchmakingService {
    queue: Arc<dyn QueueRepository + Send + Sync>,
    schedules: Arc<dyn ScheduleRepository + Send + Sync>,
    committer: MatchCommitter,
    policy: MatchPolicy,
    settings: WorkerSettings,
    rotation: Arc<AtomicUsize>,
}

impl MatchmakingService {
    pub fn new(
        queue: Arc<dyn QueueRepository + Send + Sync>,
        schedules: Arc<dyn ScheduleRepository + Send + Sync>,
        committer: MatchCommitter,
        policy: MatchPolicy,
        settings: WorkerSettings,
    ) -> Self {
        MatchmakingService {
            queue,
            schedules,
            committer,
            policy,
            settings,
            rotation: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Runs iterations forever. Errors are logged and followed by a pause.
    pub async fn run(&self) {
        info!("Matchmaking worker started");

        loop {
            match self.run_once().await {
                Ok(outcome) => {
                    if outcome.should_back_off() {
                        debug!("Backing off after {:?}", outcome);
                        tokio::time::sleep(self.settings.lone_searcher_backoff).await;
                    }
                }
                Err(e) => {
                    error!("Matchmaking iteration failed: {}", e);
                    tokio::time::sleep(self.settings.error_backoff).await;
                }
            }
        }
    }

    /// One pass: claim the head of a bucket, pair it with the next entry of
    /// the same bucket, and commit when both are still eligible. Every claim
    /// is settled before returning: acknowledged once matched or stale,
    /// re-queued otherwise.
    pub async fn run_once(&self) -> Result<TickOutcome, MatchmakingServiceError> {
        let buckets = self.rotated_buckets().await?;

        let Some(first) = self
            .queue
            .pop_blocking(&buckets, self.settings.pop_timeout)
            .await?
        else {
            return Ok(TickOutcome::Idle);
        };
        let bucket = first.bucket.clone();

        let second = match self.queue.pop_front(&bucket).await {
            Ok(Some(claim)) => claim,
            Ok(None) => {
                debug!("{} is alone in bucket {}", first.entry.user_id, bucket);
                self.requeue(&[&first]).await?;
                return Ok(TickOutcome::LoneSearcher { bucket });
            }
            Err(e) => {
                self.requeue_after_error(&[&first]).await;
                return Err(e.into());
            }
        };

        self.try_pair(first, second).await
    }

    async fn try_pair(
        &self,
        first: ClaimedEntry,
        second: ClaimedEntry,
    ) -> Result<TickOutcome, MatchmakingServiceError> {
        if first.entry.user_id == second.entry.user_id {
            debug!(
                "Skipping self-match for {} in bucket {}",
                first.entry.user_id, first.bucket
            );
            self.requeue(&[&first, &second]).await?;
            return Ok(TickOutcome::SelfMatch {
                user_id: first.entry.user_id,
            });
        }

        let (a, b) = match self.load_pair(&first, &second).await? {
            PairState::Ready(a, b) => (a, b),
            PairState::Stale(discarded) => return Ok(TickOutcome::Stale { discarded }),
        };

        if let Err(reason) = check_compatibility(&a, &b, &self.policy) {
            debug!(
                "Schedules {} and {} are incompatible: {}",
                a.schedule_id, b.schedule_id, reason
            );
            self.requeue(&[&first, &second]).await?;
            return Ok(TickOutcome::Incompatible(reason));
        }

        match self.committer.commit(&a, &b).await {
            Ok(committed) => {
                self.acknowledge(&[&first, &second]).await;
                Ok(TickOutcome::Matched(committed.record))
            }
            Err(MatchmakingServiceError::CommitConflict) => {
                warn!(
                    "Commit for {} and {} lost a race; re-validating",
                    a.schedule_id, b.schedule_id
                );
                if let PairState::Ready(..) = self.load_pair(&first, &second).await? {
                    self.requeue(&[&first, &second]).await?;
                }
                Ok(TickOutcome::Conflict)
            }
            Err(e) => {
                self.requeue_after_error(&[&first, &second]).await;
                Err(e)
            }
        }
    }

    /// Fetches both schedules. Stale entries are acknowledged and the other
    /// one re-queued; a fetch failure re-queues both.
    async fn load_pair(
        &self,
        first: &ClaimedEntry,
        second: &ClaimedEntry,
    ) -> Result<PairState, MatchmakingServiceError> {
        let a = match self.live_schedule(&first.entry).await {
            Ok(schedule) => schedule,
            Err(e) => {
                self.requeue_after_error(&[first, second]).await;
                return Err(e.into());
            }
        };
        let b = match self.live_schedule(&second.entry).await {
            Ok(schedule) => schedule,
            Err(e) => {
                self.requeue_after_error(&[first, second]).await;
                return Err(e.into());
            }
        };

        match (a, b) {
            (Some(a), Some(b)) => Ok(PairState::Ready(a, b)),
            (a, b) => {
                let mut discarded = Vec::new();
                let mut live = Vec::new();
                for (claim, schedule) in [(first, a), (second, b)] {
                    if schedule.is_some() {
                        live.push(claim);
                    } else {
                        info!(
                            "Discarding stale entry for schedule {} ({})",
                            claim.entry.schedule_id, claim.entry.user_id
                        );
                        self.acknowledge(&[claim]).await;
                        discarded.push(claim.entry.schedule_id.clone());
                    }
                }
                self.requeue(&live).await?;
                Ok(PairState::Stale(discarded))
            }
        }
    }

    /// `None` when the entry no longer describes a searching schedule of its user.
    async fn live_schedule(
        &self,
        entry: &QueueEntry,
    ) -> Result<Option<ScheduleRecord>, ScheduleRepositoryError> {
        match self.schedules.get_schedule(&entry.schedule_id).await {
            Ok(schedule)
                if schedule.status == ScheduleStatus::Searching
                    && schedule.is_owned_by(&entry.user_id) =>
            {
                Ok(Some(schedule))
            }
            Ok(_) | Err(ScheduleRepositoryError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Returns claimed entries to the tail of their bucket with their original
    /// `enqueued_at`, so the wait budget keeps counting. An entry that cannot
    /// be put back stays stored under its claim: it is poppable again once
    /// the lease runs out and the sweeper still times it out.
    async fn requeue(&self, claims: &[&ClaimedEntry]) -> Result<(), MatchmakingServiceError> {
        let mut stranded = Vec::new();

        for claim in claims {
            let mut attempt = 1;
            loop {
                match self.queue.requeue(claim).await {
                    Ok(true) => break,
                    Ok(false) => {
                        debug!(
                            "Schedule {} left bucket {} while claimed",
                            claim.entry.schedule_id, claim.bucket
                        );
                        break;
                    }
                    Err(e) if attempt < REQUEUE_ATTEMPTS => {
                        warn!(
                            "Re-queue of schedule {} failed (attempt {}): {}",
                            claim.entry.schedule_id, attempt, e
                        );
                        attempt += 1;
                        tokio::time::sleep(self.settings.error_backoff).await;
                    }
                    Err(e) => {
                        error!(
                            "Schedule {} stays claimed in bucket {} until its lease runs out: {}",
                            claim.entry.schedule_id, claim.bucket, e
                        );
                        stranded.push(claim.entry.schedule_id.clone());
                        break;
                    }
                }
            }
        }

        if stranded.is_empty() {
            Ok(())
        } else {
            Err(MatchmakingServiceError::RequeueFailed(stranded))
        }
    }

    /// Re-queue on a path that already failed. The original error is the one
    /// reported; `requeue` logs its own failures.
    async fn requeue_after_error(&self, claims: &[&ClaimedEntry]) {
        let _ = self.requeue(claims).await;
    }

    /// Drops settled entries. A failed acknowledgement leaves the entry
    /// claimed; after the lease it is popped again and discarded as stale.
    async fn acknowledge(&self, claims: &[&ClaimedEntry]) {
        for claim in claims {
            match self.queue.acknowledge(claim).await {
                Ok(true) => {}
                Ok(false) => debug!(
                    "Schedule {} already left bucket {}",
                    claim.entry.schedule_id, claim.bucket
                ),
                Err(e) => warn!(
                    "Failed to acknowledge schedule {} in bucket {}: {}",
                    claim.entry.schedule_id, claim.bucket, e
                ),
            }
        }
    }

    async fn rotated_buckets(&self) -> Result<Vec<BucketKey>, MatchmakingServiceError> {
        let mut buckets = self.queue.buckets().await?;
        if !buckets.is_empty() {
            let offset = self.rotation.fetch_add(1, Ordering::Relaxed) % buckets.len();
            buckets.rotate_left(offset);
        }
        Ok(buckets)
    }
}
