use shared::repositories::errors::notification_repository_errors::NotificationRepositoryError;
use shared::repositories::errors::queue_repository_errors::QueueRepositoryError;
use shared::repositories::errors::schedule_repository_errors::ScheduleRepositoryError;

#[derive(Debug)]
pub enum MatchmakingServiceError {
    /// A schedule left `searching` (or disappeared) before the commit landed.
    CommitConflict,
    /// A collaborator (queue, schedule store, topic) failed.
    Downstream(String),
    /// Claimed entries for these schedules could not be put back. They stay
    /// stored under their claim until the lease runs out.
    RequeueFailed(Vec<String>),
}

impl std::fmt::Display for MatchmakingServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchmakingServiceError::CommitConflict => {
                write!(f, "Match commit conflicted with a concurrent status change")
            }
            MatchmakingServiceError::Downstream(msg) => write!(f, "Downstream error: {}", msg),
            MatchmakingServiceError::RequeueFailed(schedule_ids) => write!(
                f,
                "Could not return schedules {} to the queue",
                schedule_ids.join(", ")
            ),
        }
    }
}

impl std::error::Error for MatchmakingServiceError {}

impl From<QueueRepositoryError> for MatchmakingServiceError {
    fn from(error: QueueRepositoryError) -> Self {
        MatchmakingServiceError::Downstream(error.to_string())
    }
}

impl From<ScheduleRepositoryError> for MatchmakingServiceError {
    fn from(error: ScheduleRepositoryError) -> Self {
        match error {
            ScheduleRepositoryError::Conflict | ScheduleRepositoryError::NotFound => {
                MatchmakingServiceError::CommitConflict
            }
            other => MatchmakingServiceError::Downstream(other.to_string()),
        }
    }
}

impl From<NotificationRepositoryError> for MatchmakingServiceError {
    fn from(error: NotificationRepositoryError) -> Self {
        MatchmakingServiceError::Downstream(error.to_string())
    }
}
