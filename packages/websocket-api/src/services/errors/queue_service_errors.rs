use shared::repositories::errors::notification_repository_errors::NotificationRepositoryError;
use shared::repositories::errors::queue_repository_errors::QueueRepositoryError;
use shared::repositories::errors::schedule_repository_errors::ScheduleRepositoryError;
use shared::services::errors::video_room_errors::VideoRoomError;

#[derive(Debug, PartialEq, Eq)]
pub enum QueueServiceError {
    /// No such schedule, or it belongs to someone else.
    NotFound,
    InvalidState(String),
    Downstream(String),
}

impl std::fmt::Display for QueueServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueServiceError::NotFound => write!(f, "Schedule not found"),
            QueueServiceError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            QueueServiceError::Downstream(msg) => write!(f, "Downstream error: {}", msg),
        }
    }
}

impl std::error::Error for QueueServiceError {}

impl From<ScheduleRepositoryError> for QueueServiceError {
    fn from(error: ScheduleRepositoryError) -> Self {
        match error {
            ScheduleRepositoryError::NotFound => QueueServiceError::NotFound,
            other => QueueServiceError::Downstream(other.to_string()),
        }
    }
}

impl From<QueueRepositoryError> for QueueServiceError {
    fn from(error: QueueRepositoryError) -> Self {
        QueueServiceError::Downstream(error.to_string())
    }
}

impl From<NotificationRepositoryError> for QueueServiceError {
    fn from(error: NotificationRepositoryError) -> Self {
        QueueServiceError::Downstream(error.to_string())
    }
}

impl From<VideoRoomError> for QueueServiceError {
    fn from(error: VideoRoomError) -> Self {
        QueueServiceError::Downstream(error.to_string())
    }
}
