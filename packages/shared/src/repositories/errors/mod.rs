pub mod notification_repository_errors;
pub mod queue_repository_errors;
pub mod schedule_repository_errors;
