#[derive(Debug)]
pub enum ScheduleRepositoryError {
    NotFound,
    /// A conditional write lost against a concurrent status change.
    Conflict,
    Serialization(String),
    DynamoDb(String),
}

impl std::fmt::Display for ScheduleRepositoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleRepositoryError::NotFound => write!(f, "Record not found"),
            ScheduleRepositoryError::Conflict => {
                write!(f, "Conditional update lost against a concurrent change")
            }
            ScheduleRepositoryError::Serialization(msg) => {
                write!(f, "Serialization error: {}", msg)
            }
            ScheduleRepositoryError::DynamoDb(msg) => write!(f, "DynamoDB error: {}", msg),
        }
    }
}

impl std::error::Error for ScheduleRepositoryError {}
