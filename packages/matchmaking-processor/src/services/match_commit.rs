use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use shared::clock::Clock;
use shared::models::events::{MatchParticipant, MatchmakingEvent};
use shared::models::match_record::MatchRecord;
use shared::models::schedule::ScheduleRecord;
use shared::models::video::VideoCredential;
use shared::repositories::{NotificationRepository, ScheduleRepository};
use shared::services::video_room_service::VideoRoomProvider;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::services::errors::MatchmakingServiceError;

const CREDENTIAL_ATTEMPTS: u32 = 3;
const PUBLISH_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Result of a committed match. `notified` is false when the `matched` event
/// could not be published; clients then learn the outcome by polling.
#[derive(Debug, Clone)]
pub struct CommittedMatch {
    pub record: MatchRecord,
    pub participants: Vec<MatchParticipant>,
    pub notified: bool,
}

#[derive(Clone)]
pub struct MatchCommitter {
    schedules: Arc<dyn ScheduleRepository + Send + Sync>,
    video_room: Arc<dyn VideoRoomProvider + Send + Sync>,
    notifications: Arc<dyn NotificationRepository + Send + Sync>,
    clock: Arc<dyn Clock>,
}

impl MatchCommitter {
    pub fn new(
        schedules: Arc<dyn ScheduleRepository + Send + Sync>,
        video_room: Arc<dyn VideoRoomProvider + Send + Sync>,
        notifications: Arc<dyn NotificationRepository + Send + Sync>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        MatchCommitter {
            schedules,
            video_room,
            notifications,
            clock,
        }
    }

    /// Persists the match and both status transitions in one write, then
    /// issues credentials and publishes a single `matched` event. Only the
    /// persistence step can fail the commit.
    pub async fn commit(
        &self,
        a: &ScheduleRecord,
        b: &ScheduleRecord,
    ) -> Result<CommittedMatch, MatchmakingServiceError> {
        let room_name = Uuid::new_v4().to_string();
        let session_id = Uuid::new_v4().to_string();

        let record = self
            .schedules
            .create_match(a, b, &room_name, &session_id, self.clock.now())
            .await?;

        info!(
            "Matched {} ({}) with {} ({}) in room {}",
            a.owner_user_id, a.schedule_id, b.owner_user_id, b.schedule_id, record.room_name
        );

        let mut participants = Vec::with_capacity(2);
        for schedule in [a, b] {
            let credential = self
                .issue_with_retry(&schedule.owner_user_id, &record.room_name)
                .await;
            participants.push(MatchParticipant {
                user_id: schedule.owner_user_id.clone(),
                schedule_id: schedule.schedule_id.clone(),
                credential,
            });
        }

        let event = MatchmakingEvent::Matched {
            match_id: record.match_id.clone(),
            room_name: record.room_name.clone(),
            session_id: record.session_id.clone(),
            participants: participants.clone(),
        };
        let notified = self.publish_with_retry(&event).await;

        Ok(CommittedMatch {
            record,
            participants,
            notified,
        })
    }

    async fn issue_with_retry(&self, identity: &str, room_name: &str) -> Option<VideoCredential> {
        for attempt in 1..=CREDENTIAL_ATTEMPTS {
            match self.video_room.issue_credential(identity, room_name).await {
                Ok(credential) => return Some(credential),
                Err(e) => {
                    warn!(
                        "Credential issuance for {} in room {} failed (attempt {}/{}): {}",
                        identity, room_name, attempt, CREDENTIAL_ATTEMPTS, e
                    );
                    if attempt < CREDENTIAL_ATTEMPTS {
                        tokio::time::sleep(retry_delay(attempt)).await;
                    }
                }
            }
        }

        error!(
            "Giving up on credential for {} in room {}; client must re-request it",
            identity, room_name
        );
        None
    }

    async fn publish_with_retry(&self, event: &MatchmakingEvent) -> bool {
        for attempt in 1..=PUBLISH_ATTEMPTS {
            match self.notifications.publish(event).await {
                Ok(()) => return true,
                Err(e) => {
                    warn!(
                        "Publishing match event failed (attempt {}/{}): {}",
                        attempt, PUBLISH_ATTEMPTS, e
                    );
                    if attempt < PUBLISH_ATTEMPTS {
                        tokio::time::sleep(retry_delay(attempt)).await;
                    }
                }
            }
        }

        error!("Match event was not delivered: {:?}", event);
        false
    }
}

/// Exponential backoff with up to 50% jitter.
fn retry_delay(attempt: u32) -> Duration {
    let base = RETRY_BASE_DELAY * 2u32.pow(attempt.saturating_sub(1));
    let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis() as u64 / 2);
    base + Duration::from_millis(jitter_ms)
}
